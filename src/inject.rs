use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::{self, ThreadId};

use indexmap::IndexMap;
use once_cell::sync::OnceCell;
use tracing::{debug, trace};

use crate::reflect::Universe;
use crate::*;

/// Abstract contract of a service container
pub trait ServiceLocator: Send + Sync {
    /// Obtain the instance bound to a type, or to one of its supertypes.
    fn get(&self, id: &ServiceId) -> Result<Instance, WiringError>;

    /// Check that a type is known and bound under exactly this identifier.
    fn has(&self, id: &ServiceId) -> bool;
}

/// Bulk registration hook, see [Container::register_with]
///
/// ```parameters``` are static values chosen by the caller (a prefix, a path, a size...)
/// that the provider may use to configure what it binds.
pub trait ServiceProvider {
    fn register(&self, container: &Container, parameters: &Arguments) -> Result<(), WiringError>;
}

impl<F> ServiceProvider for F
where
    F: Fn(&Container, &Arguments) -> Result<(), WiringError>,
{
    fn register(&self, container: &Container, parameters: &Arguments) -> Result<(), WiringError> {
        self(container, parameters)
    }
}

/// Enumerate the types declared under a directory, see [Container::autowire]
pub trait ClassFinder {
    fn find_all(&self, directory: &Path) -> Vec<ServiceId>;
}

impl<F> ClassFinder for F
where
    F: Fn(&Path) -> Vec<ServiceId>,
{
    fn find_all(&self, directory: &Path) -> Vec<ServiceId> {
        self(directory)
    }
}

/// A fixed list of types, whatever the directory
impl ClassFinder for [ServiceId] {
    fn find_all(&self, _directory: &Path) -> Vec<ServiceId> {
        self.to_vec()
    }
}

/// Decoration callback, see [Container::extend]
pub type Extension = Arc<dyn Fn(&Instance, &Container) + Send + Sync>;

/// Binding accepted by [Container::set]
#[derive(Clone)]
pub enum Entry {
    /// Already built instance
    Concrete(Instance),
    /// Producer invoked on first access
    Pending(Producer),
}

impl Entry {
    pub fn producer<F>(producer: F) -> Self
    where
        F: Fn(&Container) -> Result<Instance, WiringError> + Send + Sync + 'static,
    {
        Entry::Pending(Arc::new(producer))
    }
}

impl From<Instance> for Entry {
    fn from(instance: Instance) -> Self {
        Entry::Concrete(instance)
    }
}

impl From<Producer> for Entry {
    fn from(producer: Producer) -> Self {
        Entry::Pending(producer)
    }
}

impl From<Factory> for Entry {
    fn from(factory: Factory) -> Self {
        Entry::Pending(Arc::new(factory))
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entry::Concrete(instance) => f.debug_tuple("Concrete").field(instance).finish(),
            Entry::Pending(_) => f.write_str("Pending"),
        }
    }
}

#[derive(Clone)]
enum Slot {
    Concrete(Instance),
    Pending(Arc<PendingSlot>),
}

/// Producer waiting for its first invocation
struct PendingSlot {
    producer: Producer,
    cell: OnceCell<Instance>,
    /// Thread currently running the producer
    owner: Mutex<Option<ThreadId>>,
}

impl PendingSlot {
    fn new(producer: Producer) -> Self {
        Self {
            producer,
            cell: OnceCell::new(),
            owner: Mutex::default(),
        }
    }

    fn materialize(&self, id: &ServiceId, container: &Container) -> Result<Instance, WiringError> {
        if let Some(instance) = self.cell.get() {
            return Ok(instance.clone());
        }

        // Re-entering the cell from its own initializer would deadlock
        if *lock(&self.owner) == Some(thread::current().id()) {
            return Err(WiringError::CyclicResolution(id.clone()));
        }

        self.cell
            .get_or_try_init(|| {
                let _claim = Claim::new(&self.owner);
                debug!(service = %id, "materializing");
                self.producer.produce(container)
            })
            .cloned()
    }
}

/// Mark the current thread as running a producer until dropped
struct Claim<'a>(&'a Mutex<Option<ThreadId>>);

impl<'a> Claim<'a> {
    fn new(owner: &'a Mutex<Option<ThreadId>>) -> Self {
        *lock(owner) = Some(thread::current().id());
        Self(owner)
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

/// No user code runs under our locks: the guarded data stays consistent after a panic
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Registry {
    entries: Mutex<IndexMap<ServiceId, Slot>>,
    extensions: Mutex<HashMap<ServiceId, Vec<Extension>>>,
    types: Universe,
}

/// Handle on a registry which does not keep it alive
#[derive(Clone)]
pub(crate) struct WeakContainer(Weak<Registry>);

impl WeakContainer {
    pub(crate) fn upgrade(&self) -> Option<Container> {
        self.0.upgrade().map(|registry| Container { registry })
    }
}

/// Dependency injection container.
///
/// Maps type identifiers to instances or to producers building them on first access.
/// Cloning a container gives another handle on the same registry.
///
/// A new container binds itself under the [ServiceLocator] contract and binds a [Resolver] over itself.
/// The resolver only holds a weak handle, so building services does not keep the registry alive.
/// Resolving the [ServiceLocator] contract however stores a strong handle inside the registry:
/// from then on the registry lives until the end of the process.
#[derive(Clone)]
pub struct Container {
    registry: Arc<Registry>,
}

impl Container {
    pub fn new(types: impl Reflect + 'static) -> Self {
        let container = Self {
            registry: Arc::new(Registry {
                entries: Mutex::default(),
                extensions: Mutex::default(),
                types: Universe::new(Arc::new(types)),
            }),
        };

        container.set(
            ServiceId::of::<dyn ServiceLocator>(),
            Entry::producer(|c| Ok(Instance::new(c.clone()))),
        );
        container.set(
            ServiceId::of::<Resolver>(),
            Entry::producer(|c| Ok(Instance::new(Resolver::new(c)))),
        );
        container
    }

    /// Type universe consulted by this container, builtin types included
    pub fn types(&self) -> &dyn Reflect {
        &self.registry.types
    }

    /// True if both handles share the same registry
    pub fn ptr_eq(&self, other: &Container) -> bool {
        Arc::ptr_eq(&self.registry, &other.registry)
    }

    pub(crate) fn downgrade(&self) -> WeakContainer {
        WeakContainer(Arc::downgrade(&self.registry))
    }

    /// Bind an instance or a producer, replacing any previous binding.
    ///
    /// A replaced binding keeps its original position in the registration order.
    pub fn set(&self, id: impl Into<ServiceId>, entry: impl Into<Entry>) {
        let id = id.into();
        let slot = match entry.into() {
            Entry::Concrete(instance) => Slot::Concrete(instance),
            Entry::Pending(producer) => Slot::Pending(Arc::new(PendingSlot::new(producer))),
        };
        trace!(service = %id, pending = matches!(slot, Slot::Pending(_)), "binding service");
        lock(&self.registry.entries).insert(id, slot);
    }

    /// Bind a type to a factory autowiring its own constructor.
    ///
    /// Fails immediately if the type can not be instantiated.
    pub fn bind(&self, id: impl Into<ServiceId>) -> Result<(), WiringError> {
        let factory = Factory::new(id.into(), self.types())?;
        self.set(factory.id().clone(), factory);
        Ok(())
    }

    pub fn has(&self, id: &ServiceId) -> bool {
        self.registry.types.exists(id) && lock(&self.registry.entries).contains_key(id)
    }

    /// Obtain the instance for a type.
    ///
    /// An exact binding wins, otherwise the first binding (in registration order) of a supertype is used.
    /// Only keys naming a known type take part in the lookup.
    /// Pending bindings are materialized once and cached, then the extensions registered for ```id```
    /// run on the instance before it is returned.
    pub fn get(&self, id: &ServiceId) -> Result<Instance, WiringError> {
        let Some((key, slot)) = self.lookup(id) else {
            debug!(service = %id, "service not found");
            return Err(WiringError::ServiceNotFound(id.clone()));
        };

        let instance = self.materialize(&key, slot)?;
        self.decorate(id, &instance);
        Ok(instance)
    }

    /// Typed variant of [Container::get]
    pub fn get_as<T: Any + Send + Sync>(&self, id: &ServiceId) -> Result<Arc<T>, WiringError> {
        self.get(id)?
            .downcast::<T>()
            .ok_or_else(|| WiringError::UnexpectedType {
                id: id.clone(),
                expected: type_name::<T>(),
            })
    }

    /// Obtain the instance bound to a Rust type
    pub fn resolve<T: Any + Send + Sync>(&self) -> Result<Arc<T>, WiringError> {
        self.get_as(&ServiceId::of::<T>())
    }

    /// Variant of [Container::get_as] for interfaces: the instance is returned as an ```Arc<dyn Trait>```.
    ///
    /// The concrete type of the bound instance must declare an upcast to ```I```,
    /// see [TypeDescriptor::implements].
    pub fn get_interface<I: ?Sized + 'static>(&self, id: &ServiceId) -> Result<Arc<I>, WiringError> {
        let instance = self.get(id)?;
        self.registry
            .types
            .upcast(instance.concrete_type(), &ServiceId::of::<I>())
            .and_then(|upcast| upcast.apply(&instance))
            .and_then(|viewed| viewed.interface::<I>())
            .ok_or_else(|| WiringError::UnexpectedType {
                id: id.clone(),
                expected: type_name::<I>(),
            })
    }

    /// Obtain the instance bound to a trait object type
    pub fn resolve_interface<I: ?Sized + 'static>(&self) -> Result<Arc<I>, WiringError> {
        self.get_interface(&ServiceId::of::<I>())
    }

    /// Let a provider bind services in bulk, without parameters
    pub fn register<P: ServiceProvider + ?Sized>(&self, provider: &P) -> Result<(), WiringError> {
        self.register_with(provider, &Arguments::default())
    }

    /// Let a provider bind services in bulk, configured by static parameters
    pub fn register_with<P>(&self, provider: &P, parameters: &Arguments) -> Result<(), WiringError>
    where
        P: ServiceProvider + ?Sized,
    {
        debug!(
            provider = type_name::<P>(),
            parameters = parameters.len(),
            "registering service provider"
        );
        provider.register(self, parameters)
    }

    /// Run ```callback``` on the instance returned by every future ```get(id)```.
    ///
    /// The type does not need to be bound yet.
    pub fn extend<F>(&self, id: impl Into<ServiceId>, callback: F)
    where
        F: Fn(&Instance, &Container) + Send + Sync + 'static,
    {
        let id = id.into();
        trace!(service = %id, "adding extension");
        lock(&self.registry.extensions)
            .entry(id)
            .or_default()
            .push(Arc::new(callback));
    }

    /// Bind every instantiable type found by ```finder``` to a factory for itself.
    ///
    /// Types which can not be instantiated are skipped. Returns the number of bound types.
    pub fn autowire<F>(&self, directory: impl AsRef<Path>, finder: &F) -> usize
    where
        F: ClassFinder + ?Sized,
    {
        let directory = directory.as_ref();
        let mut bound = 0;
        for id in finder.find_all(directory) {
            match Factory::new(id, self.types()) {
                Ok(factory) => {
                    self.set(factory.id().clone(), factory);
                    bound += 1;
                }
                Err(e) => trace!(directory = %directory.display(), reason = %e, "skipping type"),
            }
        }
        debug!(directory = %directory.display(), bound, "autowired directory");
        bound
    }

    fn lookup(&self, id: &ServiceId) -> Option<(ServiceId, Slot)> {
        let types = &self.registry.types;
        let entries = lock(&self.registry.entries);
        if types.exists(id) {
            if let Some(slot) = entries.get(id) {
                return Some((id.clone(), slot.clone()));
            }
        }

        let (key, slot) = entries
            .iter()
            .find(|(key, _)| types.exists(key) && types.is_subtype(id, key))?;
        trace!(service = %id, binding = %key, "using supertype binding");
        Some((key.clone(), slot.clone()))
    }

    fn materialize(&self, key: &ServiceId, slot: Slot) -> Result<Instance, WiringError> {
        let pending = match slot {
            Slot::Concrete(instance) => return Ok(instance),
            Slot::Pending(pending) => pending,
        };

        let instance = pending.materialize(key, self)?;

        // Promote, unless the binding was replaced in the meantime
        let mut entries = lock(&self.registry.entries);
        if let Some(slot) = entries.get_mut(key) {
            if matches!(slot, Slot::Pending(current) if Arc::ptr_eq(current, &pending)) {
                *slot = Slot::Concrete(instance.clone());
            }
        }
        Ok(instance)
    }

    fn decorate(&self, id: &ServiceId, instance: &Instance) {
        let extensions = lock(&self.registry.extensions)
            .get(id)
            .cloned()
            .unwrap_or_default();
        for extension in &extensions {
            extension(instance, self);
        }
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new(TypeCatalog::new())
    }
}

impl ServiceLocator for Container {
    fn get(&self, id: &ServiceId) -> Result<Instance, WiringError> {
        Container::get(self, id)
    }

    fn has(&self, id: &ServiceId) -> bool {
        Container::has(self, id)
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = lock(&self.registry.entries);
        f.debug_struct("Container")
            .field("services", &entries.keys().collect::<Vec<_>>())
            .finish()
    }
}
