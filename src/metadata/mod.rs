pub mod class;
pub mod provider;

pub use class::{
    check_arity, Constructor, ContextModel, DeclaredMethods, EntityClass, EntityClassBuilder,
    Getter, MethodDef, MethodFn, PropertyDef, Setter, Visibility,
};
pub use provider::{
    DeclaredMetadata, EntityMetadata, EntityMetadataProvider, MappedMetadata, PropertyMeta,
};
