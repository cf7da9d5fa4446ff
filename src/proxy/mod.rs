pub mod cache;
pub mod generator;
pub mod instance;

pub use cache::{CacheStats, ProxyTypeCache};
pub use generator::{ProxyType, ProxyTypeGenerator, HANDLER_SLOT};
pub use instance::{ContextEntity, ContextMap, ContextProxy, HandlerAccessor};
