use std::sync::Arc;
use lazy_static::lazy_static;
use log::debug;
use crate::config::ProxyConfig;
use crate::core::{ContextError, ContextValues, Result, Value};
use crate::handler::{ComputeEvaluator, ContextHandler};
use crate::metadata::{ContextModel, DeclaredMetadata, EntityMetadataProvider};
use crate::proxy::{ContextProxy, HandlerAccessor, ProxyType, ProxyTypeCache, ProxyTypeGenerator};

// Process-wide factory backing `new_handler`
lazy_static! {
    static ref GLOBAL_FACTORY: ContextHandlerFactory = ContextHandlerFactory::new(ProxyConfig::default())
        .expect("default proxy configuration is valid");
}

/// Creates context handlers bound to proxies of entity types.
///
/// Proxy types are generated once per entity type and shared by every
/// handler the factory hands out. The factory is `Send + Sync`; handlers and
/// proxies are owned by their caller.
pub struct ContextHandlerFactory {
    config: ProxyConfig,
    cache: ProxyTypeCache,
    generator: ProxyTypeGenerator,
    evaluator: Option<Arc<dyn ComputeEvaluator>>,
}

impl ContextHandlerFactory {
    pub fn new(config: ProxyConfig) -> Result<Self> {
        config.validate()?;
        let cache = ProxyTypeCache::new(config.max_cached_types)?;
        let generator = ProxyTypeGenerator::new(&config, Arc::new(DeclaredMetadata));
        Ok(Self {
            config,
            cache,
            generator,
            evaluator: None,
        })
    }

    /// Get the global factory instance
    pub fn global() -> &'static ContextHandlerFactory {
        &GLOBAL_FACTORY
    }

    /// Replaces the metadata source consulted during generation.
    ///
    /// Proxy types already cached keep the metadata they were built with.
    pub fn with_metadata_provider(mut self, provider: Arc<dyn EntityMetadataProvider>) -> Self {
        self.generator = ProxyTypeGenerator::new(&self.config, provider);
        self
    }

    /// Evaluator installed on every handler this factory creates.
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ComputeEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    pub fn cache(&self) -> &ProxyTypeCache {
        &self.cache
    }

    /// Cached proxy type for `T`, generated on first use.
    pub fn proxy_type<T: ContextModel>(&self) -> Result<Arc<ProxyType<T>>> {
        self.cache.get_or_generate(|| self.generator.generate::<T>())
    }

    /// Binds a fresh handler over `values` to a new proxy of `T`.
    pub fn new_handler<T: ContextModel>(&self, values: ContextValues) -> Result<ContextProxy<T>> {
        let proxy_type = self.proxy_type::<T>()?;
        let base = proxy_type.instantiate()?;

        let mut handler = ContextHandler::new(values);
        if let Some(evaluator) = &self.evaluator {
            handler = handler.with_evaluator(Arc::clone(evaluator));
        }

        debug!(
            "Bound context handler to '{}' proxy ({} context values)",
            proxy_type.entity_name(),
            handler.values().len()
        );

        let mut proxy = ContextProxy::new(base, proxy_type);
        proxy.set_context_handler(handler);
        Ok(proxy)
    }

    /// Like [`new_handler`](Self::new_handler), with the context taken from a
    /// JSON object.
    pub fn new_handler_from_json<T: ContextModel>(&self, context: &serde_json::Value) -> Result<ContextProxy<T>> {
        let serde_json::Value::Object(fields) = context else {
            return Err(ContextError::TypeMismatch(format!(
                "context must be a JSON object, got {}",
                context
            )));
        };
        let values: ContextValues = fields
            .iter()
            .map(|(key, value)| (key.clone(), Value::from_json(value.clone())))
            .collect();
        self.new_handler(values)
    }
}

/// Binds a handler using the global factory.
pub fn new_handler<T: ContextModel>(values: ContextValues) -> Result<ContextProxy<T>> {
    ContextHandlerFactory::global().new_handler(values)
}
