use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing_test::traced_test;

use super::*;

trait Greeter: Send + Sync {
    fn greet(&self) -> String;
}

#[derive(Debug, Default)]
struct Base;

#[derive(Default)]
struct Derived;

/// Implements both the "Left" and "Right" interfaces
#[derive(Default)]
struct Both;

#[derive(Default)]
struct English;

impl Greeter for English {
    fn greet(&self) -> String {
        "hello".to_string()
    }
}

#[derive(Default)]
struct French;

impl Greeter for French {
    fn greet(&self) -> String {
        "bonjour".to_string()
    }
}

/// Declared as a greeter, without a way to view it as one
#[derive(Default)]
struct Mute;

struct Welcome {
    greeter: Arc<dyn Greeter>,
}

struct Service {
    base: Arc<Base>,
}

struct Labeled {
    label: String,
    retries: i64,
}

struct Missing;

struct NeedsMissing {
    _missing: Arc<Missing>,
}

struct Chicken {
    _egg: Arc<Egg>,
}

struct Egg {
    _chicken: Arc<Chicken>,
}

#[derive(Default)]
struct Counter {
    hits: AtomicUsize,
}

fn catalog() -> TypeCatalog {
    TypeCatalog::new()
        .with(TypeDescriptor::interface("Left"))
        .with(TypeDescriptor::interface("Right"))
        .with(TypeDescriptor::interface(ServiceId::of::<dyn Greeter>()))
        .with(TypeDescriptor::abstract_type("Shape"))
        .with(TypeDescriptor::sealed("Sealed"))
        .with(TypeDescriptor::of::<Base>(Constructor::default_of::<Base>()))
        .with(TypeDescriptor::of::<Derived>(Constructor::default_of::<Derived>()).extends(ServiceId::of::<Base>()))
        .with(
            TypeDescriptor::of::<Both>(Constructor::default_of::<Both>())
                .extends("Left")
                .extends("Right"),
        )
        .with(
            TypeDescriptor::of::<English>(Constructor::default_of::<English>())
                .implements(|english: Arc<English>| english as Arc<dyn Greeter>),
        )
        .with(
            TypeDescriptor::of::<French>(Constructor::default_of::<French>())
                .implements(|french: Arc<French>| french as Arc<dyn Greeter>),
        )
        .with(TypeDescriptor::of::<Mute>(Constructor::default_of::<Mute>()).extends(ServiceId::of::<dyn Greeter>()))
        .with(TypeDescriptor::of::<Welcome>(Constructor::new(
            vec![Parameter::of::<dyn Greeter>("greeter")],
            |args| Ok(Welcome { greeter: args.interface(0)? }),
        )))
        .with(TypeDescriptor::of::<Counter>(Constructor::default_of::<Counter>()))
        .with(TypeDescriptor::of::<Service>(Constructor::new(
            vec![Parameter::of::<Base>("base")],
            |args| Ok(Service { base: args.service(0)? }),
        )))
        .with(TypeDescriptor::of::<Labeled>(Constructor::new(
            vec![
                Parameter::untyped("label").with_default("default"),
                Parameter::builtin("retries", "int").with_default(3),
            ],
            |args| {
                Ok(Labeled {
                    label: args.str(0)?.to_string(),
                    retries: args.int(1)?,
                })
            },
        )))
        .with(TypeDescriptor::sealed(ServiceId::of::<Missing>()))
        .with(TypeDescriptor::of::<NeedsMissing>(Constructor::new(
            vec![Parameter::of::<Missing>("missing")],
            |args| Ok(NeedsMissing { _missing: args.service(0)? }),
        )))
        .with(TypeDescriptor::of::<Chicken>(Constructor::new(
            vec![Parameter::of::<Egg>("egg")],
            |args| Ok(Chicken { _egg: args.service(0)? }),
        )))
        .with(TypeDescriptor::of::<Egg>(Constructor::new(
            vec![Parameter::of::<Chicken>("chicken")],
            |args| Ok(Egg { _chicken: args.service(0)? }),
        )))
}

fn container() -> Container {
    Container::new(catalog())
}

fn id<T: ?Sized>() -> ServiceId {
    ServiceId::of::<T>()
}

#[test]
fn concrete_value_is_shared() -> Result<(), WiringError> {
    let container = container();
    let base = Instance::new(Base);
    container.set(id::<Base>(), base.clone());

    let v1 = container.get(&id::<Base>())?;
    let v2 = container.get(&id::<Base>())?;
    assert!(v1.ptr_eq(&base));
    assert!(v1.ptr_eq(&v2));
    Ok(())
}

#[test]
fn producer_runs_once() -> Result<(), WiringError> {
    let container = container();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    container.set(
        id::<Base>(),
        Entry::producer(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Instance::new(Base))
        }),
    );

    let first = container.get(&id::<Base>())?;
    for _ in 0..3 {
        assert!(container.get(&id::<Base>())?.ptr_eq(&first));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn set_replaces_resolved_binding() -> Result<(), WiringError> {
    let container = container();
    container.set(id::<Base>(), Entry::producer(|_| Ok(Instance::new(Base))));
    let first = container.get(&id::<Base>())?;

    let replacement = Instance::new(Base);
    container.set(id::<Base>(), replacement.clone());
    let second = container.get(&id::<Base>())?;
    assert!(!second.ptr_eq(&first));
    assert!(second.ptr_eq(&replacement));
    Ok(())
}

#[test]
fn subtype_resolves_through_supertype_binding() -> Result<(), WiringError> {
    let container = container();
    container.set(id::<Base>(), Entry::producer(|_| Ok(Instance::new(Derived))));

    let derived = container.get(&id::<Derived>())?;
    let base = container.get(&id::<Base>())?;
    assert!(derived.ptr_eq(&base));
    assert!(!container.has(&id::<Derived>()));
    Ok(())
}

#[test]
fn first_registered_supertype_wins() -> Result<(), WiringError> {
    let container = container();
    let right = Instance::new(Both);
    let left = Instance::new(Both);
    container.set("Right", right.clone());
    container.set("Left", left.clone());
    assert!(container.get(&id::<Both>())?.ptr_eq(&right));

    // overwriting keeps the original position
    let newer = Instance::new(Both);
    container.set("Right", newer.clone());
    assert!(container.get(&id::<Both>())?.ptr_eq(&newer));
    Ok(())
}

#[test]
fn has_requires_a_known_type() {
    let container = container();
    assert!(!container.has(&id::<Base>()));

    container.set(id::<Base>(), Instance::new(Base));
    assert!(container.has(&id::<Base>()));

    container.set("service_key", Instance::new(Base));
    assert!(!container.has(&ServiceId::from("service_key")));
    assert!(matches!(
        container.get(&ServiceId::from("service_key")),
        Err(WiringError::ServiceNotFound(_))
    ));
}

#[test]
fn unknown_service_is_not_found() {
    let container = container();
    let err = container.get(&ServiceId::from("NoSuchType")).unwrap_err();
    assert!(matches!(&err, WiringError::ServiceNotFound(id) if id.as_str() == "NoSuchType"));
    assert_eq!(err.to_string(), "Unable to find service of type 'NoSuchType'");
}

#[test]
fn container_registers_itself() -> Result<(), WiringError> {
    let container = container();

    let locator = container.get_as::<Container>(&id::<dyn ServiceLocator>())?;
    assert!(locator.ptr_eq(&container));

    // the concrete type resolves through its contract
    let concrete: Arc<Container> = container.resolve()?;
    assert!(concrete.ptr_eq(&container));
    assert!(container.has(&id::<dyn ServiceLocator>()));
    assert!(!container.has(&id::<Container>()));

    let resolver: Arc<Resolver> = container.resolve()?;
    assert!(resolver.container().is_some_and(|c| c.ptr_eq(&container)));

    // and can be handed out as the contract itself
    let contract: Arc<dyn ServiceLocator> = container.resolve_interface()?;
    assert!(contract.has(&id::<dyn ServiceLocator>()));
    Ok(())
}

#[test]
fn autowire_skips_non_instantiable_types() {
    let container = container();
    let found = [
        id::<Base>(),
        ServiceId::from("Shape"),
        ServiceId::from("Left"),
        ServiceId::from("Sealed"),
        ServiceId::from("Unknown"),
    ];

    let bound = container.autowire("./", &found[..]);
    assert_eq!(bound, 1);
    assert!(container.has(&id::<Base>()));
    assert!(!container.has(&ServiceId::from("Shape")));
    assert!(!container.has(&ServiceId::from("Sealed")));
}

#[test]
fn autowire_wires_constructor_dependencies() -> Result<(), WiringError> {
    let container = container();
    let finder = |dir: &Path| {
        assert_eq!(dir, Path::new("src/services"));
        vec![id::<Service>(), id::<Base>(), id::<Labeled>()]
    };
    assert_eq!(container.autowire("src/services", &finder), 3);

    let service: Arc<Service> = container.resolve()?;
    let base: Arc<Base> = container.resolve()?;
    assert!(Arc::ptr_eq(&service.base, &base));

    let labeled: Arc<Labeled> = container.resolve()?;
    assert_eq!(labeled.label, "default");
    assert_eq!(labeled.retries, 3);
    Ok(())
}

#[test]
#[traced_test]
fn autowire_is_logged() {
    let container = container();
    container.autowire("lib", &[id::<Base>()][..]);
    assert!(logs_contain("autowired directory"));
}

#[test]
fn bind_checks_instantiability() -> Result<(), WiringError> {
    let container = container();
    container.bind(id::<Base>())?;
    assert!(container.has(&id::<Base>()));

    for name in ["Shape", "Left", "Sealed", "Unknown"] {
        let err = container.bind(name).unwrap_err();
        assert!(matches!(err, WiringError::NotInstantiable(id) if id.as_str() == name));
    }
    Ok(())
}

#[test]
fn factory_needs_a_resolver() {
    let container = container();
    container.bind(id::<Service>()).unwrap();
    container.set(id::<Resolver>(), Instance::new(Base));

    let err = container.get(&id::<Service>()).unwrap_err();
    assert!(matches!(err, WiringError::InvalidResolverType { found } if found == id::<Base>()));
}

#[test]
fn factory_uses_the_bound_resolver() -> Result<(), WiringError> {
    let container = container();
    let other = Container::new(catalog());
    other.set(id::<Base>(), Instance::new(Base));
    container.set(id::<Resolver>(), Instance::new(Resolver::new(&other)));
    container.bind(id::<Service>())?;

    let service: Arc<Service> = container.resolve()?;
    let base: Arc<Base> = other.resolve()?;
    assert!(Arc::ptr_eq(&service.base, &base));
    assert!(!container.has(&id::<Base>()));
    Ok(())
}

#[test]
fn optional_parameter_uses_default() -> Result<(), WiringError> {
    let container = container();
    let resolver: Arc<Resolver> = container.resolve()?;

    let value = resolver.resolve(&Parameter::untyped("label").with_default("default"))?;
    assert!(matches!(value, Value::Str(s) if &*s == "default"));

    let value = resolver.resolve(&Parameter::untyped("nothing").with_default(Value::Null))?;
    assert!(value.is_null());

    let value = resolver.resolve(&Parameter::builtin("port", "int").with_default(8080))?;
    assert!(matches!(value, Value::Int(8080)));
    Ok(())
}

#[test]
fn required_parameter_without_binding_fails() -> Result<(), WiringError> {
    let container = container();
    let resolver: Arc<Resolver> = container.resolve()?;

    let err = resolver.resolve(&Parameter::of::<Missing>("missing")).unwrap_err();
    assert_eq!(err.to_string(), "Parameter 'missing' is not resolvable");
    assert!(matches!(
        err,
        WiringError::ParameterNotResolvable { name, source: Some(source) }
            if name == "missing" && matches!(*source, WiringError::ServiceNotFound(_))
    ));

    for parameter in [Parameter::untyped("raw"), Parameter::builtin("port", "int")] {
        let err = resolver.resolve(&parameter).unwrap_err();
        assert!(matches!(err, WiringError::ParameterNotResolvable { source: None, .. }));
    }
    Ok(())
}

#[test]
fn resolved_service_must_match_parameter_type() -> Result<(), WiringError> {
    let container = container();
    container.set(id::<dyn Greeter>(), Instance::new(Base));
    let resolver: Arc<Resolver> = container.resolve()?;

    let err = resolver.resolve(&Parameter::of::<dyn Greeter>("greeter")).unwrap_err();
    assert!(matches!(err, WiringError::ParameterNotResolvable { name, source: None } if name == "greeter"));

    container.set(id::<dyn Greeter>(), Instance::new(English));
    let value = resolver.resolve(&Parameter::of::<dyn Greeter>("greeter"))?;
    let english = value.as_instance().and_then(Instance::downcast::<English>).unwrap();
    assert_eq!(english.greet(), "hello");

    let greeter = value.as_instance().and_then(Instance::interface::<dyn Greeter>).unwrap();
    assert_eq!(Arc::as_ptr(&greeter) as *const (), Arc::as_ptr(&english) as *const ());
    Ok(())
}

#[test]
fn interface_dependencies_follow_the_binding() -> Result<(), WiringError> {
    let container = container();
    container.bind(id::<Welcome>())?;
    container.set(id::<dyn Greeter>(), Factory::new(id::<English>(), container.types())?);

    let english: Arc<Welcome> = container.resolve()?;
    assert_eq!(english.greeter.greet(), "hello");
    let bound: Arc<dyn Greeter> = container.resolve_interface()?;
    assert_eq!(Arc::as_ptr(&bound) as *const (), Arc::as_ptr(&english.greeter) as *const ());

    // same consumer, other implementation
    container.set(id::<dyn Greeter>(), Instance::new(French));
    container.bind(id::<Welcome>())?;
    let french: Arc<Welcome> = container.resolve()?;
    assert_eq!(french.greeter.greet(), "bonjour");
    assert!(!Arc::ptr_eq(&english, &french));
    Ok(())
}

#[test]
fn interface_view_needs_a_declared_upcast() -> Result<(), WiringError> {
    let container = container();
    container.set(id::<dyn Greeter>(), Instance::new(Mute));
    container.bind(id::<Welcome>())?;

    assert!(matches!(
        container.resolve::<Welcome>(),
        Err(WiringError::Argument { position: 0, .. })
    ));
    assert!(matches!(
        container.resolve_interface::<dyn Greeter>(),
        Err(WiringError::UnexpectedType { .. })
    ));
    Ok(())
}

#[test]
fn resolve_all_keeps_order_and_fails_fast() -> Result<(), WiringError> {
    let container = container();
    let base = Instance::new(Base);
    container.set(id::<Base>(), base.clone());
    let resolver: Arc<Resolver> = container.resolve()?;

    let args = resolver.resolve_all(&[
        Parameter::builtin("retries", "int").with_default(2),
        Parameter::of::<Base>("base"),
        Parameter::untyped("label").with_default("x"),
    ])?;
    assert_eq!(args.len(), 3);
    assert_eq!(args.int(0)?, 2);
    assert!(Arc::ptr_eq(&args.service::<Base>(1)?, &base.downcast::<Base>().unwrap()));
    assert_eq!(args.str(2)?, "x");

    let err = resolver
        .resolve_all(&[
            Parameter::of::<Base>("base"),
            Parameter::untyped("raw"),
            Parameter::of::<Missing>("missing"),
        ])
        .unwrap_err();
    assert!(matches!(err, WiringError::ParameterNotResolvable { name, .. } if name == "raw"));
    Ok(())
}

#[test]
fn missing_dependency_aborts_construction() -> Result<(), WiringError> {
    let container = container();
    container.bind(id::<NeedsMissing>())?;

    let err = container.get(&id::<NeedsMissing>()).unwrap_err();
    assert!(matches!(err, WiringError::ParameterNotResolvable { name, .. } if name == "missing"));

    // the binding stays pending and succeeds once the dependency exists
    container.set(id::<Missing>(), Instance::new(Missing));
    assert!(container.resolve::<NeedsMissing>().is_ok());
    Ok(())
}

#[test]
fn cyclic_dependencies_are_detected() -> Result<(), WiringError> {
    let container = container();
    container.bind(id::<Chicken>())?;
    container.bind(id::<Egg>())?;

    let err = container.get(&id::<Chicken>()).unwrap_err();
    assert!(matches!(err, WiringError::CyclicResolution(id) if id == ServiceId::of::<Chicken>()));
    Ok(())
}

#[test]
fn extensions_run_on_every_get() -> Result<(), WiringError> {
    let container = container();
    container.extend(id::<Counter>(), |instance, _| {
        if let Some(counter) = instance.downcast_ref::<Counter>() {
            counter.hits.fetch_add(1, Ordering::SeqCst);
        }
    });
    container.bind(id::<Counter>())?;

    let first: Arc<Counter> = container.resolve()?;
    let second: Arc<Counter> = container.resolve()?;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.hits.load(Ordering::SeqCst), 2);
    Ok(())
}

#[test]
fn extensions_follow_the_requested_type() -> Result<(), WiringError> {
    let container = container();
    let seen = Arc::new(AtomicUsize::new(0));
    let base_seen = seen.clone();
    let derived_seen = seen.clone();
    container.extend(id::<Base>(), move |_, _| {
        base_seen.fetch_add(1, Ordering::SeqCst);
    });
    container.extend(id::<Derived>(), move |_, _| {
        derived_seen.fetch_add(10, Ordering::SeqCst);
    });
    container.extend(id::<Derived>(), |_, c| assert!(c.has(&id::<Base>())));
    container.set(id::<Base>(), Instance::new(Derived));

    container.get(&id::<Derived>())?;
    assert_eq!(seen.load(Ordering::SeqCst), 10);
    container.get(&id::<Base>())?;
    assert_eq!(seen.load(Ordering::SeqCst), 11);
    Ok(())
}

#[test]
fn providers_register_in_bulk() -> Result<(), WiringError> {
    struct Services;

    impl ServiceProvider for Services {
        fn register(&self, container: &Container, _: &Arguments) -> Result<(), WiringError> {
            container.bind(ServiceId::of::<Base>())?;
            container.bind(ServiceId::of::<Service>())
        }
    }

    let container = container();
    container.register(&Services)?;
    assert!(container.has(&id::<Base>()));
    assert!(container.resolve::<Service>().is_ok());

    let failing = |c: &Container, _: &Arguments| c.bind("Shape");
    assert!(matches!(container.register(&failing), Err(WiringError::NotInstantiable(_))));
    Ok(())
}

#[test]
fn providers_receive_parameters() -> Result<(), WiringError> {
    let labels = |c: &Container, parameters: &Arguments| -> Result<(), WiringError> {
        let label = parameters.str(0)?.to_string();
        let retries = parameters.int(1)?;
        c.set(id::<Labeled>(), Instance::new(Labeled { label, retries }));
        Ok(())
    };

    let container = container();
    container.register_with(&labels, &Arguments::new(vec!["custom".into(), 5.into()]))?;
    let labeled: Arc<Labeled> = container.resolve()?;
    assert_eq!(labeled.label, "custom");
    assert_eq!(labeled.retries, 5);

    // without parameters
    assert!(matches!(
        container.register(&labels),
        Err(WiringError::Argument { position: 0, .. })
    ));
    Ok(())
}

#[test]
fn resolver_does_not_keep_the_container_alive() -> Result<(), WiringError> {
    let container = container();
    container.bind(id::<Base>())?;
    container.bind(id::<Service>())?;
    let _service: Arc<Service> = container.resolve()?;
    let resolver: Arc<Resolver> = container.resolve()?;

    let handle = container.downgrade();
    drop(container);
    assert!(handle.upgrade().is_none());
    assert!(resolver.container().is_none());
    assert!(matches!(
        resolver.resolve(&Parameter::of::<Base>("base")),
        Err(WiringError::ContainerDropped)
    ));
    Ok(())
}

#[test]
fn typed_lookup_checks_the_instance_type() {
    let container = container();
    container.set(id::<Base>(), Instance::new(Derived));
    let err = container.get_as::<Base>(&id::<Base>()).unwrap_err();
    assert!(matches!(err, WiringError::UnexpectedType { id, .. } if id == ServiceId::of::<Base>()));
}

#[test]
fn concurrent_first_access_builds_once() -> Result<(), WiringError> {
    let container = container();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    container.set(
        id::<Base>(),
        Entry::producer(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            Ok(Instance::new(Base))
        }),
    );

    let instances = thread::scope(|s| {
        let handles: Vec<_> = (0..8)
            .map(|_| s.spawn(|| container.get(&id::<Base>())))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .collect::<Result<Vec<_>, _>>()
    })?;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(instances.iter().all(|i| i.ptr_eq(&instances[0])));
    Ok(())
}

#[test]
fn catalog_subtypes_are_strict_and_transitive() {
    let types = TypeCatalog::new()
        .with(TypeDescriptor::interface("A"))
        .with(TypeDescriptor::abstract_type("B").extends("A"))
        .with(TypeDescriptor::concrete("C", Constructor::default_of::<Base>()).extends("B"))
        // malformed loop
        .with(TypeDescriptor::interface("X").extends("Y"))
        .with(TypeDescriptor::interface("Y").extends("X"));

    let (a, b, c) = (ServiceId::from("A"), ServiceId::from("B"), ServiceId::from("C"));
    assert!(types.is_subtype(&c, &a));
    assert!(types.is_subtype(&b, &a));
    assert!(!types.is_subtype(&a, &c));
    assert!(!types.is_subtype(&a, &a));
    assert!(types.is_a(&a, &a));
    assert!(!types.is_subtype(&ServiceId::from("X"), &a));

    assert!(types.is_instantiable(&c));
    assert!(!types.is_instantiable(&b));
    assert!(types.constructor(&a).is_none());
}

#[test]
fn arguments_are_checked() {
    let args = Arguments::new(vec![Value::from(3), Value::Null, Value::from(true)]);
    assert!(matches!(args.int(0), Ok(3)));
    assert!(matches!(args.float(0), Err(WiringError::Argument { position: 0, expected: "float" })));
    assert!(matches!(args.str(0), Err(WiringError::Argument { position: 0, expected: "string" })));
    assert!(matches!(args.optional_service::<Base>(1), Ok(None)));
    assert!(matches!(args.service::<Base>(2), Err(WiringError::Argument { position: 2, .. })));
    assert!(matches!(args.bool(2), Ok(true)));
    assert!(args.get(5).is_err());

    let args = Arguments::new(vec![Value::from(2.5), Value::Null]);
    assert!(matches!(args.float(0), Ok(v) if v == 2.5));
    assert!(matches!(args.int(0), Err(WiringError::Argument { position: 0, expected: "int" })));
    assert!(matches!(args.optional_interface::<dyn Greeter>(1), Ok(None)));
    assert!(matches!(args.interface::<dyn Greeter>(0), Err(WiringError::Argument { position: 0, .. })));
}
