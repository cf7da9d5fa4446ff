use std::fmt;
use std::sync::Arc;
use crate::core::{ContextError, ContextValue, ContextValues, Result, Value};
use crate::handler::{ContextHandler, Invocation, MapCall, Outcome, ProxyRef};
use crate::proxy::ProxyType;

/// Attach and retrieve the handler of a bound proxy.
pub trait HandlerAccessor {
    fn context_handler(&self) -> Option<&ContextHandler>;

    fn context_handler_mut(&mut self) -> Option<&mut ContextHandler>;

    /// Installs `handler`, returning the previously attached one.
    fn set_context_handler(&mut self, handler: ContextHandler) -> Option<ContextHandler>;
}

/// Marker for values whose state lives in a context rather than in fields.
pub trait ContextEntity {
    type Entity;

    fn entity_name(&self) -> &str;

    /// Snapshot of the backing context.
    fn context_map(&self) -> Result<ContextValues>;

    /// Plain entity instance carrying the context's values.
    fn context_entity(&self) -> Result<Self::Entity>;
}

/// A `T` whose accessors are served by an attached [`ContextHandler`].
pub struct ContextProxy<T: 'static> {
    base: T,
    proxy_type: Arc<ProxyType<T>>,
    context_handler: Option<ContextHandler>,
}

impl<T: 'static> ContextProxy<T> {
    pub(crate) fn new(base: T, proxy_type: Arc<ProxyType<T>>) -> Self {
        Self {
            base,
            proxy_type,
            context_handler: None,
        }
    }

    pub fn proxy_type(&self) -> &Arc<ProxyType<T>> {
        &self.proxy_type
    }

    /// A proxy is always an instance of its entity type.
    pub fn is_instance_of<U: 'static>(&self) -> bool {
        self.proxy_type.is_subtype_of::<U>()
    }

    pub fn handler(&self) -> Result<&ContextHandler> {
        self.context_handler
            .as_ref()
            .ok_or_else(|| self.detached(super::HANDLER_SLOT))
    }

    pub fn into_handler(self) -> Option<ContextHandler> {
        self.context_handler
    }

    fn detached(&self, member: &str) -> ContextError {
        ContextError::dispatch(self.proxy_type.entity_name(), member, "no context handler attached")
    }

    fn dispatch(&mut self, invocation: Invocation<'_>) -> Result<Outcome> {
        let Some(handler) = self.context_handler.as_mut() else {
            return Err(self.detached(invocation.member()));
        };
        handler.intercept(ProxyRef::new(&self.proxy_type, &self.base), invocation)
    }

    pub fn get_value(&mut self, property: &str) -> Result<Value> {
        match self.dispatch(Invocation::Get { property })? {
            Outcome::Value(value) => Ok(value),
            other => Err(other.unexpected(self.proxy_type.entity_name(), property)),
        }
    }

    pub fn get<V: ContextValue>(&mut self, property: &str) -> Result<V> {
        let value = self.get_value(property)?;
        V::from_value(value).map_err(|err| {
            ContextError::dispatch(self.proxy_type.entity_name(), property, err.to_string())
        })
    }

    pub fn set_value(&mut self, property: &str, value: Value) -> Result<()> {
        match self.dispatch(Invocation::Set { property, value })? {
            Outcome::Unit => Ok(()),
            other => Err(other.unexpected(self.proxy_type.entity_name(), property)),
        }
    }

    pub fn set<V: ContextValue>(&mut self, property: &str, value: V) -> Result<()> {
        self.set_value(property, value.to_value())
    }

    /// Calls an intercepted `compute*` method.
    pub fn compute(&mut self, method: &str, args: &[Value]) -> Result<Value> {
        match self.dispatch(Invocation::Compute { method, args })? {
            Outcome::Value(value) => Ok(value),
            other => Err(other.unexpected(self.proxy_type.entity_name(), method)),
        }
    }

    /// Calls any method of the entity. Compute methods go through the
    /// handler; the rest run unmodified on an instance carrying the context.
    pub fn invoke(&mut self, method: &str, args: &[Value]) -> Result<Value> {
        if self.proxy_type.compute(method).is_some() {
            return self.compute(method, args);
        }
        let entity = self.proxy_type.entity_name();
        let original = self
            .proxy_type
            .passthrough(method)
            .ok_or_else(|| ContextError::dispatch(entity, method, "no such method"))?;
        let handler = self.handler()?;
        self.proxy_type.call_original(original, handler.values(), args)
    }

    /// String-keyed view over the same context; `None` unless the entity
    /// carries a dynamic-attributes property.
    pub fn as_map(&mut self) -> Option<ContextMap<'_, T>> {
        if self.proxy_type.is_map_capable() {
            Some(ContextMap { proxy: self })
        } else {
            None
        }
    }
}

impl<T: 'static> HandlerAccessor for ContextProxy<T> {
    fn context_handler(&self) -> Option<&ContextHandler> {
        self.context_handler.as_ref()
    }

    fn context_handler_mut(&mut self) -> Option<&mut ContextHandler> {
        self.context_handler.as_mut()
    }

    fn set_context_handler(&mut self, handler: ContextHandler) -> Option<ContextHandler> {
        self.context_handler.replace(handler)
    }
}

impl<T: 'static> ContextEntity for ContextProxy<T> {
    type Entity = T;

    fn entity_name(&self) -> &str {
        self.proxy_type.entity_name()
    }

    fn context_map(&self) -> Result<ContextValues> {
        Ok(self.handler()?.values().clone())
    }

    fn context_entity(&self) -> Result<T> {
        self.handler()?
            .context_entity(ProxyRef::new(&self.proxy_type, &self.base))
    }
}

impl<T: 'static> fmt::Debug for ContextProxy<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextProxy")
            .field("entity", &self.proxy_type.entity_name())
            .field("handler", &self.context_handler)
            .finish()
    }
}

/// Map view of a bound proxy. Every call is a [`MapCall`] dispatched to
/// the proxy's handler.
pub struct ContextMap<'a, T: 'static> {
    proxy: &'a mut ContextProxy<T>,
}

impl<T: 'static> ContextMap<'_, T> {
    fn call(&mut self, call: MapCall<'_>) -> Result<Outcome> {
        self.proxy.dispatch(Invocation::Map(call))
    }

    fn entity(&self) -> &'static str {
        self.proxy.proxy_type.entity_name()
    }

    pub fn get(&mut self, key: &str) -> Result<Option<Value>> {
        match self.call(MapCall::Get(key))? {
            Outcome::Entry(entry) => Ok(entry),
            other => Err(other.unexpected(self.entity(), key)),
        }
    }

    /// Returns the previous value stored under `key`.
    pub fn insert(&mut self, key: &str, value: impl Into<Value>) -> Result<Option<Value>> {
        match self.call(MapCall::Insert(key, value.into()))? {
            Outcome::Entry(previous) => Ok(previous),
            other => Err(other.unexpected(self.entity(), key)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Result<Option<Value>> {
        match self.call(MapCall::Remove(key))? {
            Outcome::Entry(previous) => Ok(previous),
            other => Err(other.unexpected(self.entity(), key)),
        }
    }

    pub fn contains_key(&mut self, key: &str) -> Result<bool> {
        match self.call(MapCall::ContainsKey(key))? {
            Outcome::Flag(found) => Ok(found),
            other => Err(other.unexpected(self.entity(), key)),
        }
    }

    pub fn len(&mut self) -> Result<usize> {
        match self.call(MapCall::Len)? {
            Outcome::Count(len) => Ok(len),
            other => Err(other.unexpected(self.entity(), "len")),
        }
    }

    pub fn is_empty(&mut self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn keys(&mut self) -> Result<Vec<String>> {
        match self.call(MapCall::Keys)? {
            Outcome::Keys(keys) => Ok(keys),
            other => Err(other.unexpected(self.entity(), "keys")),
        }
    }

    pub fn entries(&mut self) -> Result<Vec<(String, Value)>> {
        match self.call(MapCall::Entries)? {
            Outcome::Entries(entries) => Ok(entries),
            other => Err(other.unexpected(self.entity(), "entries")),
        }
    }

    pub fn clear(&mut self) -> Result<()> {
        match self.call(MapCall::Clear)? {
            Outcome::Unit => Ok(()),
            other => Err(other.unexpected(self.entity(), "clear")),
        }
    }
}
