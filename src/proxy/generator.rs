use std::any::TypeId;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use log::{debug, warn};
use tracing::info_span;
use crate::config::ProxyConfig;
use crate::core::{ContextError, ContextValues, DataType, Result, Value};
use crate::metadata::{
    Constructor, ContextModel, EntityMetadataProvider, Getter, MethodDef, MethodFn, PropertyMeta,
    Setter, Visibility,
};

/// Name of the slot every proxy reserves for its handler.
pub const HANDLER_SLOT: &str = "context_handler";

/// Intercepted getter/setter pair.
pub(crate) struct PropertySlot<T> {
    pub kind: DataType,
    pub getter: Option<Getter<T>>,
    pub setter: Option<Setter<T>>,
    /// Compute method that derives this property while it is absent from the context
    pub compute: Option<&'static str>,
}

/// Intercepted `compute*` method.
pub(crate) struct ComputeSlot<T> {
    pub key: String,
    pub arity: usize,
    pub call: MethodFn<T>,
}

/// Dispatch table standing in for a generated subtype of `T`.
///
/// One `ProxyType` exists per entity type; every bound proxy of that type
/// shares it through an `Arc`.
pub struct ProxyType<T> {
    entity: &'static str,
    base_type: TypeId,
    properties: BTreeMap<&'static str, PropertySlot<T>>,
    hidden_properties: Vec<&'static str>,
    computes: BTreeMap<&'static str, ComputeSlot<T>>,
    passthrough: BTreeMap<&'static str, MethodDef<T>>,
    constructor: Option<Constructor<T>>,
    dynamic_attributes_key: Option<String>,
}

impl<T: 'static> ProxyType<T> {
    pub fn entity_name(&self) -> &'static str {
        self.entity
    }

    /// Whether instances of this proxy can stand in for a `U`.
    pub fn is_subtype_of<U: 'static>(&self) -> bool {
        TypeId::of::<U>() == self.base_type
    }

    /// Intercepted property names
    pub fn property_names(&self) -> Vec<&'static str> {
        self.properties.keys().copied().collect()
    }

    /// Properties declared on the entity but not visible to the proxy
    pub fn hidden_property_names(&self) -> &[&'static str] {
        &self.hidden_properties
    }

    pub fn compute_methods(&self) -> Vec<&'static str> {
        self.computes.keys().copied().collect()
    }

    /// Every method of the original type, intercepted or not.
    pub fn method_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self
            .computes
            .keys()
            .chain(self.passthrough.keys())
            .copied()
            .collect();
        names.sort_unstable();
        names
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.properties.contains_key(name)
    }

    pub fn is_map_capable(&self) -> bool {
        self.dynamic_attributes_key.is_some()
    }

    pub fn dynamic_attributes_key(&self) -> Option<&str> {
        self.dynamic_attributes_key.as_deref()
    }

    pub(crate) fn property(&self, name: &str) -> Option<&PropertySlot<T>> {
        self.properties.get(name)
    }

    pub(crate) fn compute(&self, method: &str) -> Option<&ComputeSlot<T>> {
        self.computes.get(method)
    }

    pub(crate) fn passthrough(&self, method: &str) -> Option<&MethodDef<T>> {
        self.passthrough.get(method)
    }

    /// Default-constructs the base instance.
    pub fn instantiate(&self) -> Result<T> {
        let constructor = self.constructor.ok_or_else(|| {
            ContextError::instantiation(self.entity, "type has no default constructor")
        })?;
        constructor().map_err(|err| ContextError::instantiation(self.entity, err.to_string()))
    }

    /// Fresh instance with the context applied through the original setters.
    pub fn materialize(&self, values: &ContextValues) -> Result<T> {
        let mut entity = self.instantiate()?;
        for (name, slot) in &self.properties {
            let (Some(setter), Some(value)) = (slot.setter, values.get(*name)) else {
                continue;
            };
            let value = slot
                .kind
                .coerce(value.clone())
                .map_err(|err| ContextError::dispatch(self.entity, name, err.to_string()))?;
            setter(&mut entity, value)
                .map_err(|err| ContextError::dispatch(self.entity, name, err.to_string()))?;
        }
        Ok(entity)
    }

    /// Runs a method that is not intercepted on a materialized instance.
    pub(crate) fn call_original(&self, method: &MethodDef<T>, values: &ContextValues, args: &[Value]) -> Result<Value> {
        let entity = self.materialize(values)?;
        method
            .invoke(&entity, args)
            .map_err(|err| ContextError::dispatch(self.entity, method.name, err.to_string()))
    }
}

impl<T> fmt::Debug for ProxyType<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyType")
            .field("entity", &self.entity)
            .field("properties", &self.properties.keys().collect::<Vec<_>>())
            .field("computes", &self.computes.keys().collect::<Vec<_>>())
            .field("passthrough", &self.passthrough.keys().collect::<Vec<_>>())
            .field("dynamic_attributes_key", &self.dynamic_attributes_key)
            .finish()
    }
}

/// Builds [`ProxyType`]s from registered entity classes.
pub struct ProxyTypeGenerator {
    provider: Arc<dyn EntityMetadataProvider>,
    compute_prefix: String,
    dynamic_attributes_key: String,
}

impl ProxyTypeGenerator {
    pub fn new(config: &ProxyConfig, provider: Arc<dyn EntityMetadataProvider>) -> Self {
        Self {
            provider,
            compute_prefix: config.compute_prefix.clone(),
            dynamic_attributes_key: config.dynamic_attributes_key.clone(),
        }
    }

    pub fn compute_prefix(&self) -> &str {
        &self.compute_prefix
    }

    /// `compute_full_name` → `full_name`; a bare prefix keys on itself.
    pub fn compute_key(&self, method: &str) -> String {
        let key = method
            .strip_prefix(self.compute_prefix.as_str())
            .unwrap_or(method)
            .trim_start_matches('_');
        if key.is_empty() {
            method.to_string()
        } else {
            key.to_string()
        }
    }

    fn is_compute_method<T>(&self, method: &MethodDef<T>) -> bool {
        method.visibility == Visibility::Protected && method.name.starts_with(self.compute_prefix.as_str())
    }

    pub fn generate<T: ContextModel>(&self) -> Result<ProxyType<T>> {
        let class = T::entity_class();
        let entity = class.name;
        let span = info_span!("proxy_generate", entity = entity);
        let _guard = span.enter();

        if class.sealed {
            return Err(ContextError::generation(entity, "type is sealed and cannot be extended"));
        }

        let mut declared = Vec::with_capacity(class.properties.len());
        let mut properties = BTreeMap::new();
        let mut hidden_properties = Vec::new();

        for property in class.properties {
            if property.name == HANDLER_SLOT {
                return Err(ContextError::generation(
                    entity,
                    format!("property '{}' collides with the handler slot", HANDLER_SLOT),
                ));
            }
            if declared.iter().any(|meta: &PropertyMeta| meta.name == property.name) {
                return Err(ContextError::generation(
                    entity,
                    format!("property '{}' is declared more than once", property.name),
                ));
            }
            declared.push(PropertyMeta::new(property.name, property.kind));

            let accessible = property.getter.is_some() || property.setter.is_some();
            if !property.is_public() || !accessible {
                hidden_properties.push(property.name);
                continue;
            }
            properties.insert(
                property.name,
                PropertySlot {
                    kind: property.kind,
                    getter: property.getter,
                    setter: property.setter,
                    compute: None,
                },
            );
        }

        let mut seen = BTreeSet::new();
        let mut computes = BTreeMap::new();
        let mut passthrough = BTreeMap::new();

        for method in class.methods {
            if method.name == HANDLER_SLOT {
                return Err(ContextError::generation(
                    entity,
                    format!("method '{}' collides with the handler slot", HANDLER_SLOT),
                ));
            }
            if !seen.insert(method.name) {
                return Err(ContextError::generation(
                    entity,
                    format!("method '{}' is ambiguous", method.name),
                ));
            }

            if !self.is_compute_method(&method) {
                passthrough.insert(method.name, method);
                continue;
            }

            let key = self.compute_key(method.name);
            if let Some(slot) = properties.get_mut(key.as_str()) {
                if slot.getter.is_some() && method.arity == 0 {
                    slot.compute = Some(method.name);
                }
            }
            computes.insert(
                method.name,
                ComputeSlot {
                    key,
                    arity: method.arity,
                    call: method.call,
                },
            );
        }

        let map_capable = match self.provider.describe(entity, &declared) {
            Ok(metadata) => metadata.has_dynamic_attributes(&self.dynamic_attributes_key),
            Err(err) => {
                warn!("Generating '{}' proxy without map view: {}", entity, err);
                false
            }
        };

        debug!(
            "Generated proxy type for '{}': {} properties, {} compute methods, {} pass-through, map view: {}",
            entity,
            properties.len(),
            computes.len(),
            passthrough.len(),
            map_capable
        );

        Ok(ProxyType {
            entity,
            base_type: TypeId::of::<T>(),
            properties,
            hidden_properties,
            computes,
            passthrough,
            constructor: class.constructor,
            dynamic_attributes_key: map_capable.then(|| self.dynamic_attributes_key.clone()),
        })
    }
}
