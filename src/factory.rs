use std::sync::Arc;

use crate::{Container, Constructor, Instance, Reflect, Resolver, ServiceId, WiringError};

/// Deferred unit of work building a service instance
///
/// A producer is invoked at most once per binding: the container replaces it with the produced instance.
pub trait Produce: Send + Sync {
    fn produce(&self, container: &Container) -> Result<Instance, WiringError>;
}

/// Shared trait object implementing [Produce]
pub type Producer = Arc<dyn Produce>;

impl<F> Produce for F
where
    F: Fn(&Container) -> Result<Instance, WiringError> + Send + Sync,
{
    fn produce(&self, container: &Container) -> Result<Instance, WiringError> {
        self(container)
    }
}

/// Autowiring producer bound to one concrete type.
///
/// The type is checked when the factory is created, so a bad binding fails at registration time.
/// Constructor arguments are resolved on invocation, using the [Resolver] currently bound in the container.
#[derive(Clone, Debug)]
pub struct Factory {
    id: ServiceId,
    constructor: Constructor,
}

impl Factory {
    pub fn new(id: ServiceId, types: &dyn Reflect) -> Result<Self, WiringError> {
        match types.constructor(&id) {
            Some(constructor) if types.is_instantiable(&id) => Ok(Self { id, constructor }),
            _ => Err(WiringError::NotInstantiable(id)),
        }
    }

    pub fn id(&self) -> &ServiceId {
        &self.id
    }
}

impl Produce for Factory {
    fn produce(&self, container: &Container) -> Result<Instance, WiringError> {
        let bound = container.get(&ServiceId::of::<Resolver>())?;
        let Some(resolver) = bound.downcast_ref::<Resolver>() else {
            return Err(WiringError::InvalidResolverType {
                found: bound.concrete_type().clone(),
            });
        };

        let args = resolver.resolve_all(self.constructor.parameters())?;
        tracing::trace!(service = %self.id, arguments = args.len(), "constructing");
        self.constructor.invoke(args)
    }
}
