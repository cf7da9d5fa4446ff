use std::collections::HashMap;
use std::sync::RwLock;
use serde::{Deserialize, Serialize};
use crate::core::{ContextError, DataType, Result};

/// Mapped kind of a single property.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyMeta {
    pub name: String,
    pub kind: DataType,
}

impl PropertyMeta {
    pub fn new(name: &str, kind: DataType) -> Self {
        Self {
            name: name.to_string(),
            kind,
        }
    }
}

/// What the persistence layer knows about an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub entity: String,
    pub properties: Vec<PropertyMeta>,
}

impl EntityMetadata {
    pub fn new(entity: &str, properties: Vec<PropertyMeta>) -> Self {
        Self {
            entity: entity.to_string(),
            properties,
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyMeta> {
        self.properties.iter().find(|property| property.name == name)
    }

    /// True when `key` names a property mapped as free-form JSON.
    pub fn has_dynamic_attributes(&self, key: &str) -> bool {
        self.property(key)
            .map(|property| property.kind == DataType::Json)
            .unwrap_or(false)
    }
}

/// Source of mapped entity metadata, normally the persistence layer.
///
/// Queried once per entity type when its proxy type is generated.
pub trait EntityMetadataProvider: Send + Sync {
    fn describe(&self, entity: &str, declared: &[PropertyMeta]) -> Result<EntityMetadata>;
}

/// Answers from the properties the entity declares itself.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclaredMetadata;

impl EntityMetadataProvider for DeclaredMetadata {
    fn describe(&self, entity: &str, declared: &[PropertyMeta]) -> Result<EntityMetadata> {
        Ok(EntityMetadata::new(entity, declared.to_vec()))
    }
}

/// Explicit registry of mapped entities; unknown entities are unavailable.
#[derive(Debug, Default)]
pub struct MappedMetadata {
    entities: RwLock<HashMap<String, EntityMetadata>>,
}

impl MappedMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, metadata: EntityMetadata) -> Result<()> {
        let mut entities = self.entities.write()?;
        entities.insert(metadata.entity.clone(), metadata);
        Ok(())
    }

    pub fn with(self, metadata: EntityMetadata) -> Result<Self> {
        self.register(metadata)?;
        Ok(self)
    }
}

impl EntityMetadataProvider for MappedMetadata {
    fn describe(&self, entity: &str, _declared: &[PropertyMeta]) -> Result<EntityMetadata> {
        let entities = self.entities.read()?;
        entities
            .get(entity)
            .cloned()
            .ok_or_else(|| ContextError::MetadataUnavailable {
                entity: entity.to_string(),
                reason: "entity is not mapped".to_string(),
            })
    }
}
