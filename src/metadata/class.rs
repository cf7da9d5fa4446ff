use std::fmt;
use serde::{Deserialize, Serialize};
use crate::core::{ContextError, DataType, Result, Value};

pub type Getter<T> = fn(&T) -> Value;
pub type Setter<T> = fn(&mut T, Value) -> Result<()>;
pub type MethodFn<T> = fn(&T, &[Value]) -> Result<Value>;
pub type Constructor<T> = fn() -> Result<T>;

/// `pub` members are public; anything narrower counts as protected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Protected,
}

/// A declared property with its accessor functions.
pub struct PropertyDef<T> {
    pub name: &'static str,
    pub kind: DataType,
    pub visibility: Visibility,
    pub getter: Option<Getter<T>>,
    pub setter: Option<Setter<T>>,
}

impl<T> PropertyDef<T> {
    pub fn new(name: &'static str, kind: DataType, visibility: Visibility) -> Self {
        Self {
            name,
            kind,
            visibility,
            getter: None,
            setter: None,
        }
    }

    pub fn getter(mut self, getter: Getter<T>) -> Self {
        self.getter = Some(getter);
        self
    }

    pub fn setter(mut self, setter: Setter<T>) -> Self {
        self.setter = Some(setter);
        self
    }

    pub fn is_public(&self) -> bool {
        self.visibility == Visibility::Public
    }
}

impl<T> fmt::Debug for PropertyDef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyDef")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("visibility", &self.visibility)
            .field("getter", &self.getter.is_some())
            .field("setter", &self.setter.is_some())
            .finish()
    }
}

/// A declared method callable with context values as arguments.
pub struct MethodDef<T> {
    pub name: &'static str,
    pub visibility: Visibility,
    pub arity: usize,
    pub call: MethodFn<T>,
}

impl<T> MethodDef<T> {
    pub fn new(name: &'static str, visibility: Visibility, arity: usize, call: MethodFn<T>) -> Self {
        Self {
            name,
            visibility,
            arity,
            call,
        }
    }

    pub fn invoke(&self, target: &T, args: &[Value]) -> Result<Value> {
        check_arity(self.name, args, self.arity)?;
        (self.call)(target, args)
    }
}

impl<T> fmt::Debug for MethodDef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDef")
            .field("name", &self.name)
            .field("visibility", &self.visibility)
            .field("arity", &self.arity)
            .finish()
    }
}

/// Used by generated method wrappers before indexing into `args`.
pub fn check_arity(method: &str, args: &[Value], arity: usize) -> Result<()> {
    if args.len() != arity {
        return Err(ContextError::TypeMismatch(format!(
            "Method '{}' expects {} argument(s), got {}",
            method,
            arity,
            args.len()
        )));
    }
    Ok(())
}

/// Everything the proxy generator needs to know about an entity type.
pub struct EntityClass<T> {
    pub name: &'static str,
    pub properties: Vec<PropertyDef<T>>,
    pub methods: Vec<MethodDef<T>>,
    pub constructor: Option<Constructor<T>>,
    pub sealed: bool,
}

impl<T> EntityClass<T> {
    pub fn builder(name: &'static str) -> EntityClassBuilder<T> {
        EntityClassBuilder {
            class: EntityClass {
                name,
                properties: Vec::new(),
                methods: Vec::new(),
                constructor: None,
                sealed: false,
            },
        }
    }

    pub fn property(&self, name: &str) -> Option<&PropertyDef<T>> {
        self.properties.iter().find(|property| property.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodDef<T>> {
        self.methods.iter().find(|method| method.name == name)
    }
}

impl<T> fmt::Debug for EntityClass<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityClass")
            .field("name", &self.name)
            .field("properties", &self.properties)
            .field("methods", &self.methods)
            .field("constructor", &self.constructor.is_some())
            .field("sealed", &self.sealed)
            .finish()
    }
}

pub struct EntityClassBuilder<T> {
    class: EntityClass<T>,
}

impl<T> EntityClassBuilder<T> {
    pub fn property(mut self, property: PropertyDef<T>) -> Self {
        self.class.properties.push(property);
        self
    }

    pub fn method(mut self, method: MethodDef<T>) -> Self {
        self.class.methods.push(method);
        self
    }

    pub fn methods(mut self, methods: Vec<MethodDef<T>>) -> Self {
        self.class.methods.extend(methods);
        self
    }

    pub fn constructor(mut self, constructor: Constructor<T>) -> Self {
        self.class.constructor = Some(constructor);
        self
    }

    pub fn sealed(mut self, sealed: bool) -> Self {
        self.class.sealed = sealed;
        self
    }

    pub fn build(self) -> EntityClass<T> {
        self.class
    }
}

/// An entity type that can be backed by a context.
///
/// Usually implemented with `#[derive(ContextModel)]`.
pub trait ContextModel: Sized + 'static {
    fn entity_class() -> EntityClass<Self>;
}

/// Methods registered by `#[context_methods]`.
pub trait DeclaredMethods: Sized {
    fn declared_methods() -> Vec<MethodDef<Self>> {
        Vec::new()
    }
}
