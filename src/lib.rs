// ============================================================================
// entity_context Library
// ============================================================================

// Lets the derive macros name `::entity_context` from inside this crate.
extern crate self as entity_context;

pub mod core;
pub mod config;
pub mod metadata;
pub mod proxy;
pub mod handler;
pub mod factory;

// Re-export main types for convenience
pub use crate::core::{ContextError, ContextValue, ContextValues, DataType, Result, Value};
pub use crate::config::ProxyConfig;
pub use metadata::{
    ContextModel, DeclaredMetadata, DeclaredMethods, EntityClass, EntityMetadata,
    EntityMetadataProvider, MappedMetadata, MethodDef, PropertyDef, PropertyMeta, Visibility,
};
pub use proxy::{
    CacheStats, ContextEntity, ContextMap, ContextProxy, HandlerAccessor, ProxyType,
    ProxyTypeCache, ProxyTypeGenerator, HANDLER_SLOT,
};
pub use handler::{ComputeEvaluator, ComputeRequest, ContextHandler, Invocation, MapCall, Outcome, ProxyRef};
pub use factory::{new_handler, ContextHandlerFactory};

// Compile-time entity registration
pub use entity_context_derive::{context_methods, ContextModel};
