//! Runtime service container with constructor autowiring.
//!
//! # Simple use case
//!
//! ```
//! # use std::sync::Arc;
//! # use wiring::*;
//! trait Greeter: Send + Sync {
//!     fn greet(&self) -> String;
//! }
//!
//! #[derive(Default)]
//! struct English;
//!
//! impl Greeter for English {
//!     fn greet(&self) -> String {
//!         "Hello world".to_string()
//!     }
//! }
//!
//! struct Welcome {
//!     greeter: Arc<dyn Greeter>,
//! }
//!
//! # fn main() -> Result<(), WiringError> {
//! // Describe the types and their constructors
//! let types = TypeCatalog::new()
//!     .with(TypeDescriptor::interface(ServiceId::of::<dyn Greeter>()))
//!     .with(
//!         TypeDescriptor::of::<English>(Constructor::default_of::<English>())
//!             .implements(|english: Arc<English>| english as Arc<dyn Greeter>),
//!     )
//!     .with(TypeDescriptor::of::<Welcome>(Constructor::new(
//!         vec![Parameter::of::<dyn Greeter>("greeter")],
//!         |args| Ok(Welcome { greeter: args.interface(0)? }),
//!     )));
//!
//! // Bind the interface to an implementation, then autowire the consumer
//! let container = Container::new(types);
//! let english = Factory::new(ServiceId::of::<English>(), container.types())?;
//! container.set(ServiceId::of::<dyn Greeter>(), english);
//! container.bind(ServiceId::of::<Welcome>())?;
//!
//! let welcome: Arc<Welcome> = container.resolve()?;
//! assert_eq!(welcome.greeter.greet(), "Hello world");
//!
//! // Instances are cached: the injected helper is the bound one
//! let greeter: Arc<dyn Greeter> = container.resolve_interface()?;
//! assert_eq!(Arc::as_ptr(&greeter) as *const (), Arc::as_ptr(&welcome.greeter) as *const ());
//! # Ok(())
//! # }
//! ```
//!
//! # Mechanism
//!
//! * The [Container] maps a [ServiceId] to an [Entry]: either a concrete [Instance] or a [Producer]
//!   invoked on first access. The produced instance replaces the producer, so each binding is built once.
//! * A lookup without exact binding falls back to the first bound supertype of the requested type,
//!   in registration order.
//! * Extensions registered with [Container::extend] run on the resolved instance at every lookup.
//! * A [Factory] is the producer used for autowiring: it asks the [Resolver] bound in the container
//!   for its constructor arguments, which recursively resolves the dependencies.
//! * The [Reflect] trait provides the type information Rust can not discover at runtime:
//!   which types exist, their supertypes and their constructors. [TypeCatalog] implements it
//!   from explicit [TypeDescriptor] declarations.
//! * An implemented interface is declared with its [Upcast], the coercion to its trait object.
//!   Services injected for an interface parameter are read back with [Arguments::interface].

mod factory;
mod inject;
mod reflect;
mod resolve;
mod value;

pub use factory::{Factory, Produce, Producer};
pub use inject::{ClassFinder, Container, Entry, Extension, ServiceLocator, ServiceProvider};
pub use reflect::{
    Constructor, ParamType, Parameter, Reflect, TypeCatalog, TypeDescriptor, TypeKind, Upcast,
};
pub use resolve::{Resolver, WiringError};
pub use value::{Arguments, Instance, ServiceId, Value};

#[cfg(test)]
mod tests;
