use std::fmt;
use crate::core::{ContextError, Value};
use crate::proxy::ProxyType;

/// A single intercepted call, as seen by [`ContextHandler::intercept`].
///
/// [`ContextHandler::intercept`]: crate::handler::ContextHandler::intercept
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation<'a> {
    Get { property: &'a str },
    Set { property: &'a str, value: Value },
    Compute { method: &'a str, args: &'a [Value] },
    Map(MapCall<'a>),
}

impl Invocation<'_> {
    /// Property, method or map operation being invoked.
    pub fn member(&self) -> &str {
        match self {
            Self::Get { property } | Self::Set { property, .. } => *property,
            Self::Compute { method, .. } => *method,
            Self::Map(call) => call.name(),
        }
    }
}

impl fmt::Display for Invocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get { property } => write!(f, "get {}", property),
            Self::Set { property, value } => write!(f, "set {} = {}", property, value),
            Self::Compute { method, args } => write!(f, "compute {}({} args)", method, args.len()),
            Self::Map(call) => write!(f, "map.{}", call.name()),
        }
    }
}

/// Operations of the string-keyed map view.
#[derive(Debug, Clone, PartialEq)]
pub enum MapCall<'a> {
    Get(&'a str),
    Insert(&'a str, Value),
    Remove(&'a str),
    ContainsKey(&'a str),
    Len,
    Keys,
    Entries,
    Clear,
}

impl MapCall<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Get(_) => "get",
            Self::Insert(..) => "insert",
            Self::Remove(_) => "remove",
            Self::ContainsKey(_) => "contains_key",
            Self::Len => "len",
            Self::Keys => "keys",
            Self::Entries => "entries",
            Self::Clear => "clear",
        }
    }
}

/// Result of an intercepted call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Unit,
    Value(Value),
    Entry(Option<Value>),
    Flag(bool),
    Count(usize),
    Keys(Vec<String>),
    Entries(Vec<(String, Value)>),
}

impl Outcome {
    pub(crate) fn unexpected(&self, entity: &str, member: &str) -> ContextError {
        ContextError::dispatch(entity, member, format!("unexpected dispatch outcome {:?}", self))
    }
}

/// Non-owning back-reference from a handler to the proxy it serves.
pub struct ProxyRef<'a, T> {
    pub(crate) proxy_type: &'a ProxyType<T>,
    pub(crate) base: &'a T,
}

impl<'a, T: 'static> ProxyRef<'a, T> {
    pub fn new(proxy_type: &'a ProxyType<T>, base: &'a T) -> Self {
        Self { proxy_type, base }
    }

    pub fn entity_name(&self) -> &'static str {
        self.proxy_type.entity_name()
    }

    pub fn proxy_type(&self) -> &'a ProxyType<T> {
        self.proxy_type
    }
}
