//! Type introspection capability used by the container
//!
//! Rust offers no runtime reflection on constructors, so the container relies on the [Reflect] trait
//! to learn which types exist, how they relate to each other and how to build them.
//!
//! * [TypeCatalog] is the provided implementation: types are declared explicitly with a [TypeDescriptor].
//! * A [Constructor] lists the ordered [Parameter] descriptors of a type along with a build function
//!   receiving the resolved [Arguments].
//! * An [Upcast] turns an instance of a concrete type into a trait object of an interface it implements,
//!   which lets constructors receive ```Arc<dyn Trait>``` dependencies.
//!
//! A handful of builtin types (the container contract, the container itself and the resolver)
//! are always part of the type universe, whatever the user-provided catalog declares.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use once_cell::sync::Lazy;

use crate::{Arguments, Container, Instance, Resolver, ServiceId, ServiceLocator, Value, WiringError};

/// Introspection capability: the host "type universe" seen by the container
pub trait Reflect: Send + Sync {
    /// Does a type or interface with this identifier exist at all
    fn exists(&self, id: &ServiceId) -> bool;

    /// Strict and transitive subtype test: ```id``` extends or implements ```of```, and ```id != of```
    fn is_subtype(&self, id: &ServiceId, of: &ServiceId) -> bool;

    /// Concrete type with an accessible constructor
    fn is_instantiable(&self, id: &ServiceId) -> bool;

    /// Public constructor of an instantiable type
    fn constructor(&self, id: &ServiceId) -> Option<Constructor>;

    /// Conversion from instances of the concrete type ```id``` to the interface ```to```
    fn upcast(&self, _id: &ServiceId, _to: &ServiceId) -> Option<Upcast> {
        None
    }

    /// Instance-of test: same type or strict subtype
    fn is_a(&self, id: &ServiceId, of: &ServiceId) -> bool {
        id == of || self.is_subtype(id, of)
    }
}

impl<R: Reflect + ?Sized> Reflect for Arc<R> {
    fn exists(&self, id: &ServiceId) -> bool {
        (**self).exists(id)
    }

    fn is_subtype(&self, id: &ServiceId, of: &ServiceId) -> bool {
        (**self).is_subtype(id, of)
    }

    fn is_instantiable(&self, id: &ServiceId) -> bool {
        (**self).is_instantiable(id)
    }

    fn constructor(&self, id: &ServiceId) -> Option<Constructor> {
        (**self).constructor(id)
    }

    fn upcast(&self, id: &ServiceId, to: &ServiceId) -> Option<Upcast> {
        (**self).upcast(id, to)
    }
}

/// Declared type of a constructor parameter
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParamType {
    /// Primitive type (int, string, ...), never looked up in the container
    Builtin(&'static str),
    /// Class or interface, resolved through the container
    Service(ServiceId),
}

/// Descriptor of a single constructor parameter
///
/// A parameter is optional exactly when it declares a default value.
#[derive(Clone, Debug)]
pub struct Parameter {
    name: String,
    ty: Option<ParamType>,
    default: Option<Value>,
}

impl Parameter {
    pub fn untyped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ty: None,
            default: None,
        }
    }

    pub fn builtin(name: impl Into<String>, ty: &'static str) -> Self {
        Self {
            ty: Some(ParamType::Builtin(ty)),
            ..Self::untyped(name)
        }
    }

    pub fn service(name: impl Into<String>, id: impl Into<ServiceId>) -> Self {
        Self {
            ty: Some(ParamType::Service(id.into())),
            ..Self::untyped(name)
        }
    }

    /// Parameter typed with a Rust type or trait object
    pub fn of<T: ?Sized>(name: impl Into<String>) -> Self {
        Self::service(name, ServiceId::of::<T>())
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared_type(&self) -> Option<&ParamType> {
        self.ty.as_ref()
    }

    pub fn is_optional(&self) -> bool {
        self.default.is_some()
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }
}

type BuildFn = dyn Fn(Arguments) -> Result<Instance, WiringError> + Send + Sync;

/// Constructor signature and build function of a concrete type
#[derive(Clone)]
pub struct Constructor {
    parameters: Arc<[Parameter]>,
    build: Arc<BuildFn>,
}

impl Constructor {
    /// Build function receiving the resolved arguments, in the order of ```parameters```
    pub fn new<T, F>(parameters: Vec<Parameter>, build: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(Arguments) -> Result<T, WiringError> + Send + Sync + 'static,
    {
        Self {
            parameters: parameters.into(),
            build: Arc::new(move |args| build(args).map(Instance::new)),
        }
    }

    /// Zero-parameter constructor relying on [Default]
    pub fn default_of<T: Default + Any + Send + Sync>() -> Self {
        Self::new(Vec::new(), |_| Ok(T::default()))
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn invoke(&self, args: Arguments) -> Result<Instance, WiringError> {
        (self.build)(args)
    }
}

impl fmt::Debug for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constructor")
            .field("parameters", &self.parameters)
            .finish_non_exhaustive()
    }
}

type UpcastFn = dyn Fn(&Instance) -> Option<Arc<dyn Any + Send + Sync>> + Send + Sync;

/// Conversion of a concrete instance into one of the interfaces it implements.
///
/// Rust can only build a trait object where the concrete type is statically known,
/// so each implemented interface comes with its own conversion, usually a plain coercion:
/// ```ignore
/// Upcast::new(|logger: Arc<ConsoleLogger>| logger as Arc<dyn Logger>)
/// ```
/// The resulting ```Arc<dyn Logger>``` shares the allocation of the concrete instance.
#[derive(Clone)]
pub struct Upcast {
    interface: ServiceId,
    cast: Arc<UpcastFn>,
}

impl Upcast {
    pub fn new<C, I, F>(cast: F) -> Self
    where
        C: Any + Send + Sync,
        I: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<C>) -> Arc<I> + Send + Sync + 'static,
    {
        Self {
            interface: ServiceId::of::<I>(),
            cast: Arc::new(move |instance: &Instance| {
                let concrete = instance.downcast::<C>()?;
                Some(Arc::new(cast(concrete)) as Arc<dyn Any + Send + Sync>)
            }),
        }
    }

    /// Target interface
    pub fn interface(&self) -> &ServiceId {
        &self.interface
    }

    /// Attach the interface view to an instance, see [Instance::interface].
    ///
    /// Returns ```None``` if the instance is not of the expected concrete type.
    pub fn apply(&self, instance: &Instance) -> Option<Instance> {
        let view = (self.cast)(instance)?;
        Some(instance.clone().with_view(view))
    }
}

impl fmt::Debug for Upcast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Upcast<{}>", self.interface)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TypeKind {
    Interface,
    Abstract,
    Concrete,
}

/// Everything the container needs to know about one type
#[derive(Clone, Debug)]
pub struct TypeDescriptor {
    id: ServiceId,
    kind: TypeKind,
    parents: Vec<ServiceId>,
    upcasts: Vec<Upcast>,
    constructor: Option<Constructor>,
}

impl TypeDescriptor {
    fn with_kind(id: impl Into<ServiceId>, kind: TypeKind, constructor: Option<Constructor>) -> Self {
        Self {
            id: id.into(),
            kind,
            parents: Vec::new(),
            upcasts: Vec::new(),
            constructor,
        }
    }

    pub fn interface(id: impl Into<ServiceId>) -> Self {
        Self::with_kind(id, TypeKind::Interface, None)
    }

    pub fn abstract_type(id: impl Into<ServiceId>) -> Self {
        Self::with_kind(id, TypeKind::Abstract, None)
    }

    pub fn concrete(id: impl Into<ServiceId>, constructor: Constructor) -> Self {
        Self::with_kind(id, TypeKind::Concrete, Some(constructor))
    }

    /// Concrete type without an accessible constructor: it exists but cannot be autowired
    pub fn sealed(id: impl Into<ServiceId>) -> Self {
        Self::with_kind(id, TypeKind::Concrete, None)
    }

    /// Concrete Rust type
    pub fn of<T: Any + Send + Sync>(constructor: Constructor) -> Self {
        Self::concrete(ServiceId::of::<T>(), constructor)
    }

    /// Declare a direct supertype (parent class or implemented interface)
    pub fn extends(mut self, parent: impl Into<ServiceId>) -> Self {
        self.parents.push(parent.into());
        self
    }

    /// Declare an implemented interface along with the conversion to its trait object.
    ///
    /// ```ignore
    /// TypeDescriptor::of::<ConsoleLogger>(Constructor::default_of::<ConsoleLogger>())
    ///     .implements(|logger: Arc<ConsoleLogger>| logger as Arc<dyn Logger>)
    /// ```
    pub fn implements<C, I, F>(mut self, cast: F) -> Self
    where
        C: Any + Send + Sync,
        I: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<C>) -> Arc<I> + Send + Sync + 'static,
    {
        let upcast = Upcast::new(cast);
        self.parents.push(upcast.interface.clone());
        self.upcasts.push(upcast);
        self
    }

    pub fn id(&self) -> &ServiceId {
        &self.id
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn parents(&self) -> &[ServiceId] {
        &self.parents
    }

    pub fn is_instantiable(&self) -> bool {
        self.kind == TypeKind::Concrete && self.constructor.is_some()
    }
}

/// Explicitly declared type universe
#[derive(Clone, Debug, Default)]
pub struct TypeCatalog {
    types: IndexMap<ServiceId, TypeDescriptor>,
}

impl TypeCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a type, replacing any previous declaration with the same identifier
    pub fn add(&mut self, descriptor: TypeDescriptor) -> &mut Self {
        self.types.insert(descriptor.id.clone(), descriptor);
        self
    }

    pub fn with(mut self, descriptor: TypeDescriptor) -> Self {
        self.add(descriptor);
        self
    }

    pub fn get(&self, id: &ServiceId) -> Option<&TypeDescriptor> {
        self.types.get(id)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeDescriptor> {
        self.types.values()
    }
}

impl Reflect for TypeCatalog {
    fn exists(&self, id: &ServiceId) -> bool {
        self.types.contains_key(id)
    }

    fn is_subtype(&self, id: &ServiceId, of: &ServiceId) -> bool {
        if id == of {
            return false;
        }

        // parent links are user input: guard against loops
        let mut seen = HashSet::new();
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            let Some(descriptor) = self.types.get(current) else {
                continue;
            };
            for parent in &descriptor.parents {
                if parent == of {
                    return true;
                }
                if seen.insert(parent) {
                    pending.push(parent);
                }
            }
        }
        false
    }

    fn is_instantiable(&self, id: &ServiceId) -> bool {
        self.types
            .get(id)
            .map_or(false, TypeDescriptor::is_instantiable)
    }

    fn constructor(&self, id: &ServiceId) -> Option<Constructor> {
        self.types
            .get(id)
            .filter(|d| d.kind == TypeKind::Concrete)
            .and_then(|d| d.constructor.clone())
    }

    /// Only the conversions declared on the type itself: they are not inherited
    fn upcast(&self, id: &ServiceId, to: &ServiceId) -> Option<Upcast> {
        self.types
            .get(id)?
            .upcasts
            .iter()
            .find(|upcast| &upcast.interface == to)
            .cloned()
    }
}

/// Types every container knows about
static BUILTINS: Lazy<TypeCatalog> = Lazy::new(|| {
    TypeCatalog::new()
        .with(TypeDescriptor::interface(ServiceId::of::<dyn ServiceLocator>()))
        .with(
            TypeDescriptor::sealed(ServiceId::of::<Container>())
                .implements(|c: Arc<Container>| c as Arc<dyn ServiceLocator>),
        )
        .with(TypeDescriptor::sealed(ServiceId::of::<Resolver>()))
});

/// User-provided introspection overlaid with the builtin types
pub(crate) struct Universe(Arc<dyn Reflect>);

impl Universe {
    pub(crate) fn new(reflect: Arc<dyn Reflect>) -> Self {
        Self(reflect)
    }
}

impl Reflect for Universe {
    fn exists(&self, id: &ServiceId) -> bool {
        BUILTINS.exists(id) || self.0.exists(id)
    }

    fn is_subtype(&self, id: &ServiceId, of: &ServiceId) -> bool {
        BUILTINS.is_subtype(id, of) || self.0.is_subtype(id, of)
    }

    fn is_instantiable(&self, id: &ServiceId) -> bool {
        self.0.is_instantiable(id)
    }

    fn constructor(&self, id: &ServiceId) -> Option<Constructor> {
        self.0.constructor(id)
    }

    fn upcast(&self, id: &ServiceId, to: &ServiceId) -> Option<Upcast> {
        BUILTINS.upcast(id, to).or_else(|| self.0.upcast(id, to))
    }
}
