//! Identifiers and type-erased values flowing through the container

use std::any::{type_name, Any};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::WiringError;

/// Fully qualified name of a type or interface, used as the registry key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(Cow<'static, str>);

impl ServiceId {
    /// Identifier derived from the Rust type name.
    ///
    /// Works for trait objects too: ```ServiceId::of::<dyn Logger>()``` names the interface.
    pub fn of<T: ?Sized>() -> Self {
        ServiceId(Cow::Borrowed(type_name::<T>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for ServiceId {
    fn from(name: &'static str) -> Self {
        ServiceId(Cow::Borrowed(name))
    }
}

impl From<String> for ServiceId {
    fn from(name: String) -> Self {
        ServiceId(Cow::Owned(name))
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceId({})", self.0)
    }
}

/// Shared, type-erased service instance.
///
/// The instance remembers the identifier of its concrete type, which is what the
/// resolver checks against declared parameter types.
/// Cloning an instance shares the same allocation: identity is preserved.
///
/// An instance injected for an interface parameter also carries a view of itself
/// as that interface (an ```Arc<dyn Trait>``` on the same allocation), see [Instance::interface].
#[derive(Clone)]
pub struct Instance {
    concrete: ServiceId,
    value: Arc<dyn Any + Send + Sync>,
    view: Option<Arc<dyn Any + Send + Sync>>,
}

impl Instance {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self::from_arc(Arc::new(value))
    }

    /// Wrap an already shared value without reallocating it
    pub fn from_arc<T: Any + Send + Sync>(value: Arc<T>) -> Self {
        Self {
            concrete: ServiceId::of::<T>(),
            value,
            view: None,
        }
    }

    /// Attach an interface view, as produced by an [crate::Upcast]
    pub(crate) fn with_view(self, view: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            view: Some(view),
            ..self
        }
    }

    /// The instance seen through the interface it was injected for.
    ///
    /// Only set on instances handed out by the resolver for a parameter declared
    /// with an interface type that the concrete type registered an upcast for.
    pub fn interface<I: ?Sized + 'static>(&self) -> Option<Arc<I>> {
        self.view.as_ref()?.downcast_ref::<Arc<I>>().cloned()
    }

    /// Identifier of the concrete type behind this instance
    pub fn concrete_type(&self) -> &ServiceId {
        &self.concrete
    }

    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.value.clone().downcast::<T>().ok()
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// True if both handles point to the same object
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Instance<{}>", self.concrete)
    }
}

/// Resolved value of a single constructor argument.
///
/// Builtin scalars cover the default values a parameter can declare,
/// [Value::Object] carries injected services (or any object used as a default).
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Object(Instance),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match self {
            Value::Object(instance) => Some(instance),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v.into())
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v.into())
    }
}

impl From<Instance> for Value {
    fn from(v: Instance) -> Self {
        Value::Object(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Ordered constructor arguments, as produced by [crate::Resolver::resolve_all]
#[derive(Clone, Debug, Default)]
pub struct Arguments(Vec<Value>);

impl Arguments {
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn values(&self) -> &[Value] {
        &self.0
    }

    pub fn into_values(self) -> Vec<Value> {
        self.0
    }

    pub fn get(&self, position: usize) -> Result<&Value, WiringError> {
        self.0.get(position).ok_or(WiringError::Argument {
            position,
            expected: "a value",
        })
    }

    /// Injected service at the given position
    pub fn service<T: Any + Send + Sync>(&self, position: usize) -> Result<Arc<T>, WiringError> {
        self.get(position)?
            .as_instance()
            .and_then(Instance::downcast::<T>)
            .ok_or(WiringError::Argument {
                position,
                expected: type_name::<T>(),
            })
    }

    /// Service at the given position, or ```None``` for a null default
    pub fn optional_service<T: Any + Send + Sync>(
        &self,
        position: usize,
    ) -> Result<Option<Arc<T>>, WiringError> {
        if self.get(position)?.is_null() {
            return Ok(None);
        }
        self.service(position).map(Some)
    }

    /// Service injected for an interface parameter, as a trait object.
    ///
    /// ```ignore
    /// let logger: Arc<dyn Logger> = args.interface(0)?;
    /// ```
    pub fn interface<I: ?Sized + 'static>(&self, position: usize) -> Result<Arc<I>, WiringError> {
        self.get(position)?
            .as_instance()
            .and_then(Instance::interface::<I>)
            .ok_or(WiringError::Argument {
                position,
                expected: type_name::<I>(),
            })
    }

    pub fn optional_interface<I: ?Sized + 'static>(
        &self,
        position: usize,
    ) -> Result<Option<Arc<I>>, WiringError> {
        if self.get(position)?.is_null() {
            return Ok(None);
        }
        self.interface(position).map(Some)
    }

    pub fn str(&self, position: usize) -> Result<&str, WiringError> {
        match self.get(position)? {
            Value::Str(s) => Ok(&**s),
            _ => Err(self.mismatch(position, "string")),
        }
    }

    pub fn int(&self, position: usize) -> Result<i64, WiringError> {
        match self.get(position)? {
            Value::Int(v) => Ok(*v),
            _ => Err(self.mismatch(position, "int")),
        }
    }

    /// Float argument. Integers are not coerced, like every other accessor.
    pub fn float(&self, position: usize) -> Result<f64, WiringError> {
        match self.get(position)? {
            Value::Float(v) => Ok(*v),
            _ => Err(self.mismatch(position, "float")),
        }
    }

    pub fn bool(&self, position: usize) -> Result<bool, WiringError> {
        match self.get(position)? {
            Value::Bool(v) => Ok(*v),
            _ => Err(self.mismatch(position, "bool")),
        }
    }

    fn mismatch(&self, position: usize, expected: &'static str) -> WiringError {
        tracing::trace!(
            position,
            expected,
            found = self.0[position].kind(),
            "argument type mismatch"
        );
        WiringError::Argument { position, expected }
    }
}

impl From<Vec<Value>> for Arguments {
    fn from(values: Vec<Value>) -> Self {
        Self(values)
    }
}
