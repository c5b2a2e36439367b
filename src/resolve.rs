//! Constructor parameter resolution
//!
//! The [Resolver] turns the [Parameter] descriptors of a constructor into concrete [Arguments]:
//!
//! * Parameters typed with a class or interface are looked up in the [Container],
//!   recursively building their own dependencies. Services injected for an interface
//!   carry the matching trait object view when the concrete type declares an upcast.
//! * Untyped or primitive parameters fall back to their declared default value.
//! * Anything else can not be resolved and aborts the construction.

use thiserror::Error;

use crate::inject::WeakContainer;
use crate::{Arguments, Container, ParamType, Parameter, ServiceId, Value};

/// Errors triggered during the autowiring process
#[derive(Error, Debug)]
pub enum WiringError {
    #[error("Type '{0}' is not instantiable")]
    NotInstantiable(ServiceId),
    #[error("Unable to find service of type '{0}'")]
    ServiceNotFound(ServiceId),
    #[error("Parameter '{name}' is not resolvable")]
    ParameterNotResolvable {
        name: String,
        #[source]
        source: Option<Box<WiringError>>,
    },
    #[error("Expecting object of type '{}', '{found}' given instead", ServiceId::of::<Resolver>())]
    InvalidResolverType { found: ServiceId },
    #[error("Cyclic dependencies: '{0}' is already being resolved")]
    CyclicResolution(ServiceId),
    #[error("Argument {position} is missing or is not {expected}")]
    Argument {
        position: usize,
        expected: &'static str,
    },
    #[error("Service '{id}' is not a {expected}")]
    UnexpectedType { id: ServiceId, expected: &'static str },
    #[error("The container behind this resolver was dropped")]
    ContainerDropped,
}

impl WiringError {
    fn unresolvable(parameter: &Parameter) -> Self {
        WiringError::ParameterNotResolvable {
            name: parameter.name().to_string(),
            source: None,
        }
    }
}

/// Resolve constructor arguments through a container.
///
/// The resolver does not keep the container alive: it is itself stored in the registry.
pub struct Resolver {
    container: WeakContainer,
}

impl Resolver {
    pub fn new(container: &Container) -> Self {
        Self {
            container: container.downgrade(),
        }
    }

    /// The backing container, unless every handle on it was dropped
    pub fn container(&self) -> Option<Container> {
        self.container.upgrade()
    }

    /// Resolve all parameters in declaration order, stopping at the first failure
    pub fn resolve_all(&self, parameters: &[Parameter]) -> Result<Arguments, WiringError> {
        parameters
            .iter()
            .map(|p| self.resolve(p))
            .collect::<Result<Vec<_>, _>>()
            .map(Arguments::new)
    }

    /// Resolve a single parameter
    pub fn resolve(&self, parameter: &Parameter) -> Result<Value, WiringError> {
        if let Some(ParamType::Service(id)) = parameter.declared_type() {
            let container = self.container().ok_or(WiringError::ContainerDropped)?;
            let instance = match container.get(id) {
                Ok(instance) => instance,
                Err(e @ WiringError::ServiceNotFound(_)) => {
                    return Err(WiringError::ParameterNotResolvable {
                        name: parameter.name().to_string(),
                        source: Some(Box::new(e)),
                    })
                }
                Err(e) => return Err(e),
            };

            // A supertype binding may hold an unrelated object
            let types = container.types();
            if !types.is_a(instance.concrete_type(), id) {
                tracing::debug!(
                    parameter = parameter.name(),
                    expected = %id,
                    found = %instance.concrete_type(),
                    "resolved service does not match the parameter type"
                );
                return Err(WiringError::unresolvable(parameter));
            }

            let instance = match types.upcast(instance.concrete_type(), id) {
                Some(upcast) => upcast.apply(&instance).unwrap_or(instance),
                None => instance,
            };
            return Ok(Value::Object(instance));
        }

        match parameter.default_value() {
            Some(value) => Ok(value.clone()),
            None => Err(WiringError::unresolvable(parameter)),
        }
    }
}
