pub mod invocation;

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use log::trace;
use crate::core::{ContextError, ContextValues, Result, Value};
use crate::metadata::check_arity;

pub use invocation::{Invocation, MapCall, Outcome, ProxyRef};

/// Input handed to a [`ComputeEvaluator`].
#[derive(Debug)]
pub struct ComputeRequest<'a> {
    pub entity: &'a str,
    pub method: &'a str,
    /// Context key the result is cached under
    pub key: &'a str,
    pub values: &'a ContextValues,
    pub args: &'a [Value],
}

/// User-supplied derivation of computed values (scripts, expressions).
///
/// Returning `None` falls back to the entity's own compute method.
pub trait ComputeEvaluator: Send + Sync {
    fn evaluate(&self, request: &ComputeRequest<'_>) -> Option<Result<Value>>;
}

impl<F> ComputeEvaluator for F
where
    F: Fn(&ComputeRequest<'_>) -> Option<Result<Value>> + Send + Sync,
{
    fn evaluate(&self, request: &ComputeRequest<'_>) -> Option<Result<Value>> {
        self(request)
    }
}

/// Owns the context of one bound entity and serves every intercepted call.
///
/// Not synchronized: a handler belongs to one logical flow at a time.
pub struct ContextHandler {
    values: ContextValues,
    /// Keys whose values were filled in by compute dispatch
    computed: BTreeSet<String>,
    evaluator: Option<Arc<dyn ComputeEvaluator>>,
}

impl ContextHandler {
    pub fn new(values: ContextValues) -> Self {
        Self {
            values,
            computed: BTreeSet::new(),
            evaluator: None,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ComputeEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn values(&self) -> &ContextValues {
        &self.values
    }

    pub fn into_values(self) -> ContextValues {
        self.values
    }

    pub fn is_computed(&self, key: &str) -> bool {
        self.computed.contains(key)
    }

    /// Generic entry point for every call intercepted on a bound proxy.
    pub fn intercept<T: 'static>(&mut self, proxy: ProxyRef<'_, T>, invocation: Invocation<'_>) -> Result<Outcome> {
        trace!("{}: {}", proxy.entity_name(), invocation);
        match invocation {
            Invocation::Get { property } => self.get_property(&proxy, property).map(Outcome::Value),
            Invocation::Set { property, value } => {
                self.set_property(&proxy, property, value).map(|_| Outcome::Unit)
            }
            Invocation::Compute { method, args } => self.compute(&proxy, method, args).map(Outcome::Value),
            Invocation::Map(call) => self.map_call(&proxy, call),
        }
    }

    /// Materializes a typed entity from the current context.
    pub fn context_entity<T: 'static>(&self, proxy: ProxyRef<'_, T>) -> Result<T> {
        proxy.proxy_type.materialize(&self.values)
    }

    fn get_property<T: 'static>(&mut self, proxy: &ProxyRef<'_, T>, property: &str) -> Result<Value> {
        let entity = proxy.entity_name();
        let slot = proxy
            .proxy_type
            .property(property)
            .ok_or_else(|| ContextError::dispatch(entity, property, "no such property"))?;
        let getter = slot
            .getter
            .ok_or_else(|| ContextError::dispatch(entity, property, "property is write-only"))?;

        if let Some(value) = self.values.get(property) {
            return slot
                .kind
                .coerce(value.clone())
                .map_err(|err| ContextError::dispatch(entity, property, err.to_string()));
        }
        if let Some(method) = slot.compute {
            return self.compute(proxy, method, &[]);
        }
        Ok(getter(proxy.base))
    }

    fn set_property<T: 'static>(&mut self, proxy: &ProxyRef<'_, T>, property: &str, value: Value) -> Result<()> {
        let entity = proxy.entity_name();
        let slot = proxy
            .proxy_type
            .property(property)
            .ok_or_else(|| ContextError::dispatch(entity, property, "no such property"))?;
        if slot.setter.is_none() {
            return Err(ContextError::dispatch(entity, property, "property is read-only"));
        }

        let value = slot
            .kind
            .coerce(value)
            .map_err(|err| ContextError::dispatch(entity, property, err.to_string()))?;
        self.store(property.to_string(), value);
        Ok(())
    }

    fn compute<T: 'static>(&mut self, proxy: &ProxyRef<'_, T>, method: &str, args: &[Value]) -> Result<Value> {
        let entity = proxy.entity_name();
        let slot = proxy
            .proxy_type
            .compute(method)
            .ok_or_else(|| ContextError::dispatch(entity, method, "not a compute method"))?;
        check_arity(method, args, slot.arity)
            .map_err(|err| ContextError::dispatch(entity, method, err.to_string()))?;

        let cacheable = args.is_empty();
        if cacheable && self.computed.contains(&slot.key) {
            if let Some(value) = self.values.get(&slot.key) {
                return Ok(value.clone());
            }
        }

        let request = ComputeRequest {
            entity,
            method,
            key: &slot.key,
            values: &self.values,
            args,
        };
        let evaluated = self
            .evaluator
            .as_ref()
            .and_then(|evaluator| evaluator.evaluate(&request));
        let value = match evaluated {
            Some(result) => result,
            None => proxy
                .proxy_type
                .materialize(&self.values)
                .and_then(|instance| (slot.call)(&instance, args)),
        }
        .map_err(|err| match err {
            dispatch @ ContextError::DispatchFailure { .. } => dispatch,
            other => ContextError::dispatch(entity, method, other.to_string()),
        })?;

        // A compute backing a property answers with the property's kind.
        let value = match proxy.proxy_type.property(&slot.key) {
            Some(property) if property.compute == Some(method) => property
                .kind
                .coerce(value)
                .map_err(|err| ContextError::dispatch(entity, method, err.to_string()))?,
            _ => value,
        };

        // Values supplied by the caller win over derived ones.
        let supplied = self.values.contains_key(&slot.key) && !self.computed.contains(&slot.key);
        if cacheable && !supplied {
            self.values.insert(slot.key.clone(), value.clone());
            self.computed.insert(slot.key.clone());
        }
        Ok(value)
    }

    fn map_call<T: 'static>(&mut self, proxy: &ProxyRef<'_, T>, call: MapCall<'_>) -> Result<Outcome> {
        let entity = proxy.entity_name();
        let Some(attrs_key) = proxy.proxy_type.dynamic_attributes_key() else {
            return Err(ContextError::dispatch(
                entity,
                call.name(),
                "map view is not available for this type",
            ));
        };

        match call {
            MapCall::Get(key) => match self.values.get(key) {
                Some(value) => self
                    .map_entry(proxy, key, value.clone())
                    .map(|value| Outcome::Entry(Some(value))),
                None => Ok(Outcome::Entry(self.dynamic_attribute(attrs_key, key))),
            },
            MapCall::Insert(key, value) => {
                let value = match proxy.proxy_type.property(key) {
                    Some(slot) => slot
                        .kind
                        .coerce(value)
                        .map_err(|err| ContextError::dispatch(entity, key, err.to_string()))?,
                    None => value,
                };
                Ok(Outcome::Entry(self.store(key.to_string(), value)))
            }
            MapCall::Remove(key) => {
                self.invalidate_computed(key);
                self.computed.remove(key);
                Ok(Outcome::Entry(self.values.remove(key)))
            }
            MapCall::ContainsKey(key) => Ok(Outcome::Flag(
                self.values.contains_key(key) || self.dynamic_attribute(attrs_key, key).is_some(),
            )),
            MapCall::Len => Ok(Outcome::Count(self.values.len())),
            MapCall::Keys => Ok(Outcome::Keys(self.values.keys().cloned().collect())),
            MapCall::Entries => self
                .values
                .iter()
                .map(|(key, value)| {
                    self.map_entry(proxy, key, value.clone())
                        .map(|value| (key.clone(), value))
                })
                .collect::<Result<Vec<_>>>()
                .map(Outcome::Entries),
            MapCall::Clear => {
                self.values.clear();
                self.computed.clear();
                Ok(Outcome::Unit)
            }
        }
    }

    /// Stored value as seen through the map view: declared properties read
    /// with their declared kind, other keys as stored.
    fn map_entry<T: 'static>(&self, proxy: &ProxyRef<'_, T>, key: &str, value: Value) -> Result<Value> {
        match proxy.proxy_type.property(key) {
            Some(slot) => slot
                .kind
                .coerce(value)
                .map_err(|err| ContextError::dispatch(proxy.entity_name(), key, err.to_string())),
            None => Ok(value),
        }
    }

    /// Looks `key` up inside the dynamic-attributes bag, stored either as a
    /// JSON object or as its serialized text.
    fn dynamic_attribute(&self, attrs_key: &str, key: &str) -> Option<Value> {
        let found = match self.values.get(attrs_key)? {
            Value::Json(serde_json::Value::Object(attrs)) => attrs.get(key).cloned(),
            Value::Json(serde_json::Value::String(raw)) | Value::Text(raw) => {
                let attrs: serde_json::Value = serde_json::from_str(raw).ok()?;
                attrs.get(key).cloned()
            }
            _ => None,
        };
        found.map(Value::from_json)
    }

    fn store(&mut self, key: String, value: Value) -> Option<Value> {
        self.invalidate_computed(&key);
        self.computed.remove(&key);
        self.values.insert(key, value)
    }

    /// Drops derived values once anything else in the context changes.
    fn invalidate_computed(&mut self, written: &str) {
        for key in std::mem::take(&mut self.computed) {
            if key == written {
                self.computed.insert(key);
            } else {
                self.values.remove(&key);
            }
        }
    }
}

impl fmt::Debug for ContextHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextHandler")
            .field("values", &self.values)
            .field("computed", &self.computed)
            .field("evaluator", &self.evaluator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProxyConfig;
    use crate::core::{ContextValue, DataType};
    use crate::metadata::{
        ContextModel, DeclaredMetadata, EntityClass, MethodDef, PropertyDef, Visibility,
    };
    use crate::proxy::{ProxyType, ProxyTypeGenerator};
    use serde_json::json;

    #[derive(Debug, Default)]
    struct Person {
        first_name: String,
        last_name: String,
        age: i64,
        attrs: serde_json::Value,
    }

    impl Person {
        fn compute_full_name(&self) -> String {
            format!("{} {}", self.first_name, self.last_name)
        }

        fn compute_age_in(&self, years: i64) -> i64 {
            self.age + years
        }
    }

    impl ContextModel for Person {
        fn entity_class() -> EntityClass<Self> {
            EntityClass::builder("Person")
                .property(
                    PropertyDef::new("first_name", DataType::Text, Visibility::Public)
                        .getter(|p: &Person| p.first_name.to_value())
                        .setter(|p: &mut Person, v: Value| {
                            p.first_name = String::from_value(v)?;
                            Ok(())
                        }),
                )
                .property(
                    PropertyDef::new("last_name", DataType::Text, Visibility::Public)
                        .getter(|p: &Person| p.last_name.to_value())
                        .setter(|p: &mut Person, v: Value| {
                            p.last_name = String::from_value(v)?;
                            Ok(())
                        }),
                )
                .property(
                    PropertyDef::new("age", DataType::Integer, Visibility::Public)
                        .getter(|p: &Person| p.age.to_value())
                        .setter(|p: &mut Person, v: Value| {
                            p.age = i64::from_value(v)?;
                            Ok(())
                        }),
                )
                .property(
                    PropertyDef::new("full_name", DataType::Text, Visibility::Public)
                        .getter(|p: &Person| p.compute_full_name().to_value()),
                )
                .property(
                    PropertyDef::new("attrs", DataType::Json, Visibility::Public)
                        .getter(|p: &Person| p.attrs.to_value())
                        .setter(|p: &mut Person, v: Value| {
                            p.attrs = serde_json::Value::from_value(v)?;
                            Ok(())
                        }),
                )
                .method(MethodDef::new("compute_full_name", Visibility::Protected, 0, |p: &Person, _: &[Value]| {
                    Ok(p.compute_full_name().to_value())
                }))
                .method(MethodDef::new("compute_age_in", Visibility::Protected, 1, |p: &Person, args: &[Value]| {
                    let years = i64::from_value(args[0].clone())?;
                    Ok(p.compute_age_in(years).to_value())
                }))
                .constructor(|| Ok(Person::default()))
                .build()
        }
    }

    fn person_type() -> ProxyType<Person> {
        ProxyTypeGenerator::new(&ProxyConfig::default(), Arc::new(DeclaredMetadata))
            .generate::<Person>()
            .unwrap()
    }

    fn values(pairs: &[(&str, Value)]) -> ContextValues {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    fn get(handler: &mut ContextHandler, proxy_type: &ProxyType<Person>, base: &Person, property: &str) -> Result<Value> {
        match handler.intercept(ProxyRef::new(proxy_type, base), Invocation::Get { property })? {
            Outcome::Value(value) => Ok(value),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    fn map(handler: &mut ContextHandler, proxy_type: &ProxyType<Person>, base: &Person, call: MapCall<'_>) -> Result<Outcome> {
        handler.intercept(ProxyRef::new(proxy_type, base), Invocation::Map(call))
    }

    #[test]
    fn get_reads_context_or_declared_default() {
        let proxy_type = person_type();
        let base = Person::default();
        let mut handler = ContextHandler::new(values(&[("first_name", Value::Text("Ada".into()))]));

        assert_eq!(get(&mut handler, &proxy_type, &base, "first_name").unwrap(), Value::Text("Ada".into()));
        assert_eq!(get(&mut handler, &proxy_type, &base, "age").unwrap(), Value::Integer(0));
    }

    #[test]
    fn set_coerces_to_declared_kind() {
        let proxy_type = person_type();
        let base = Person::default();
        let mut handler = ContextHandler::new(ContextValues::new());

        handler
            .intercept(
                ProxyRef::new(&proxy_type, &base),
                Invocation::Set { property: "age", value: Value::Text("36".into()) },
            )
            .unwrap();
        assert_eq!(handler.values()["age"], Value::Integer(36));

        let err = handler
            .intercept(
                ProxyRef::new(&proxy_type, &base),
                Invocation::Set { property: "age", value: Value::Text("old".into()) },
            )
            .unwrap_err();
        assert!(matches!(err, ContextError::DispatchFailure { .. }));
        assert_eq!(handler.values()["age"], Value::Integer(36));
    }

    #[test]
    fn unknown_and_read_only_properties_fail() {
        let proxy_type = person_type();
        let base = Person::default();
        let mut handler = ContextHandler::new(ContextValues::new());

        assert!(get(&mut handler, &proxy_type, &base, "nickname").is_err());
        let err = handler
            .intercept(
                ProxyRef::new(&proxy_type, &base),
                Invocation::Set { property: "full_name", value: Value::Text("x".into()) },
            )
            .unwrap_err();
        assert!(err.to_string().contains("read-only"));
    }

    #[test]
    fn compute_is_cached_and_invalidated() {
        let proxy_type = person_type();
        let base = Person::default();
        let mut handler = ContextHandler::new(values(&[
            ("first_name", Value::Text("Ada".into())),
            ("last_name", Value::Text("Lovelace".into())),
        ]));

        assert_eq!(
            get(&mut handler, &proxy_type, &base, "full_name").unwrap(),
            Value::Text("Ada Lovelace".into())
        );
        assert!(handler.is_computed("full_name"));

        handler
            .intercept(
                ProxyRef::new(&proxy_type, &base),
                Invocation::Set { property: "last_name", value: Value::Text("King".into()) },
            )
            .unwrap();
        assert!(!handler.values().contains_key("full_name"));
        assert_eq!(
            get(&mut handler, &proxy_type, &base, "full_name").unwrap(),
            Value::Text("Ada King".into())
        );
    }

    #[test]
    fn compute_with_arguments_is_not_cached() {
        let proxy_type = person_type();
        let base = Person::default();
        let mut handler = ContextHandler::new(values(&[("age", Value::Integer(30))]));

        let outcome = handler
            .intercept(
                ProxyRef::new(&proxy_type, &base),
                Invocation::Compute { method: "compute_age_in", args: &[Value::Integer(5)] },
            )
            .unwrap();
        assert_eq!(outcome, Outcome::Value(Value::Integer(35)));
        assert!(!handler.values().contains_key("age_in"));

        let err = handler
            .intercept(
                ProxyRef::new(&proxy_type, &base),
                Invocation::Compute { method: "compute_age_in", args: &[] },
            )
            .unwrap_err();
        assert!(matches!(err, ContextError::DispatchFailure { .. }));
    }

    #[test]
    fn supplied_value_wins_over_compute() {
        let proxy_type = person_type();
        let base = Person::default();
        let mut handler = ContextHandler::new(values(&[
            ("first_name", Value::Text("Ada".into())),
            ("full_name", Value::Text("Countess".into())),
        ]));

        assert_eq!(
            get(&mut handler, &proxy_type, &base, "full_name").unwrap(),
            Value::Text("Countess".into())
        );
        let outcome = handler
            .intercept(
                ProxyRef::new(&proxy_type, &base),
                Invocation::Compute { method: "compute_full_name", args: &[] },
            )
            .unwrap();
        assert_eq!(outcome, Outcome::Value(Value::Text("Ada ".into())));
        assert_eq!(handler.values()["full_name"], Value::Text("Countess".into()));
    }

    #[test]
    fn evaluator_takes_precedence() {
        let proxy_type = person_type();
        let base = Person::default();
        let evaluator = |request: &ComputeRequest<'_>| -> Option<Result<Value>> {
            (request.method == "compute_full_name").then(|| Ok(Value::Text(format!("[{}]", request.key))))
        };
        let mut handler = ContextHandler::new(ContextValues::new()).with_evaluator(Arc::new(evaluator));

        assert_eq!(
            get(&mut handler, &proxy_type, &base, "full_name").unwrap(),
            Value::Text("[full_name]".into())
        );
    }

    #[test]
    fn compute_result_takes_the_property_kind() {
        let proxy_type = person_type();
        let base = Person::default();
        let evaluator = |request: &ComputeRequest<'_>| -> Option<Result<Value>> {
            (request.method == "compute_full_name").then(|| Ok(Value::Integer(42)))
        };
        let mut handler = ContextHandler::new(ContextValues::new()).with_evaluator(Arc::new(evaluator));

        let first = get(&mut handler, &proxy_type, &base, "full_name").unwrap();
        assert_eq!(first, Value::Text("42".into()));
        assert_eq!(handler.values()["full_name"], Value::Text("42".into()));
        assert_eq!(get(&mut handler, &proxy_type, &base, "full_name").unwrap(), first);
    }

    #[test]
    fn uncoercible_compute_result_fails_every_read() {
        let proxy_type = person_type();
        let base = Person::default();
        let evaluator = |request: &ComputeRequest<'_>| -> Option<Result<Value>> {
            (request.method == "compute_full_name").then(|| Ok(Value::Json(json!({"first": "Ada"}))))
        };
        let mut handler = ContextHandler::new(ContextValues::new()).with_evaluator(Arc::new(evaluator));

        for _ in 0..2 {
            let err = get(&mut handler, &proxy_type, &base, "full_name").unwrap_err();
            assert!(matches!(err, ContextError::DispatchFailure { ref member, .. } if member == "compute_full_name"));
        }
        assert!(!handler.is_computed("full_name"));
        assert!(!handler.values().contains_key("full_name"));
    }

    #[test]
    fn map_get_agrees_with_contains_key() {
        let proxy_type = person_type();
        let base = Person::default();
        let mut handler = ContextHandler::new(ContextValues::new());

        assert_eq!(map(&mut handler, &proxy_type, &base, MapCall::Get("age")).unwrap(), Outcome::Entry(None));
        assert_eq!(map(&mut handler, &proxy_type, &base, MapCall::ContainsKey("age")).unwrap(), Outcome::Flag(false));
        assert_eq!(map(&mut handler, &proxy_type, &base, MapCall::Len).unwrap(), Outcome::Count(0));

        // Stored text reads back with the declared kind.
        map(&mut handler, &proxy_type, &base, MapCall::Insert("nickname", Value::Text("Ada".into()))).unwrap();
        handler.values.insert("age".to_string(), Value::Text("36".into()));
        assert_eq!(
            map(&mut handler, &proxy_type, &base, MapCall::Get("age")).unwrap(),
            Outcome::Entry(Some(Value::Integer(36)))
        );
        assert_eq!(map(&mut handler, &proxy_type, &base, MapCall::ContainsKey("age")).unwrap(), Outcome::Flag(true));
        assert_eq!(
            map(&mut handler, &proxy_type, &base, MapCall::Entries).unwrap(),
            Outcome::Entries(vec![
                ("age".to_string(), Value::Integer(36)),
                ("nickname".to_string(), Value::Text("Ada".into())),
            ])
        );
    }

    #[test]
    fn map_view_shares_the_store() {
        let proxy_type = person_type();
        let base = Person::default();
        let mut handler = ContextHandler::new(ContextValues::new());

        map(&mut handler, &proxy_type, &base, MapCall::Insert("first_name", Value::Text("Grace".into()))).unwrap();
        assert_eq!(
            get(&mut handler, &proxy_type, &base, "first_name").unwrap(),
            Value::Text("Grace".into())
        );

        handler
            .intercept(
                ProxyRef::new(&proxy_type, &base),
                Invocation::Set { property: "age", value: Value::Integer(85) },
            )
            .unwrap();
        assert_eq!(
            map(&mut handler, &proxy_type, &base, MapCall::Get("age")).unwrap(),
            Outcome::Entry(Some(Value::Integer(85)))
        );
        assert_eq!(map(&mut handler, &proxy_type, &base, MapCall::Len).unwrap(), Outcome::Count(2));

        assert_eq!(
            map(&mut handler, &proxy_type, &base, MapCall::Remove("age")).unwrap(),
            Outcome::Entry(Some(Value::Integer(85)))
        );
        assert_eq!(get(&mut handler, &proxy_type, &base, "age").unwrap(), Value::Integer(0));
    }

    #[test]
    fn map_reads_fall_back_to_dynamic_attributes() {
        let proxy_type = person_type();
        let base = Person::default();
        let mut handler = ContextHandler::new(values(&[
            ("attrs", Value::Json(json!({"color": "teal", "size": 3}))),
            ("_model", Value::Text("com.example.Person".into())),
        ]));

        assert_eq!(
            map(&mut handler, &proxy_type, &base, MapCall::Get("color")).unwrap(),
            Outcome::Entry(Some(Value::Text("teal".into())))
        );
        assert_eq!(
            map(&mut handler, &proxy_type, &base, MapCall::Get("_model")).unwrap(),
            Outcome::Entry(Some(Value::Text("com.example.Person".into())))
        );
        assert_eq!(
            map(&mut handler, &proxy_type, &base, MapCall::ContainsKey("size")).unwrap(),
            Outcome::Flag(true)
        );
        assert_eq!(
            map(&mut handler, &proxy_type, &base, MapCall::Get("missing")).unwrap(),
            Outcome::Entry(None)
        );
    }

    #[test]
    fn text_encoded_attributes_are_parsed() {
        let proxy_type = person_type();
        let base = Person::default();
        let mut handler = ContextHandler::new(values(&[(
            "attrs",
            Value::Text(r#"{"tier":"gold"}"#.into()),
        )]));

        assert_eq!(
            map(&mut handler, &proxy_type, &base, MapCall::Get("tier")).unwrap(),
            Outcome::Entry(Some(Value::Text("gold".into())))
        );
    }
}
