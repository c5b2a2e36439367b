use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use tracing_subscriber::EnvFilter;
use wiring::*;

// Define regular traits and implementor structs

trait Logger: Send + Sync {
    fn log(&self, content: &str);
}

#[derive(Default)]
struct ConsoleLogger {
    lines: AtomicUsize,
}

impl Logger for ConsoleLogger {
    fn log(&self, content: &str) {
        let line = self.lines.fetch_add(1, Ordering::Relaxed);
        println!("[{line}] {content}");
    }
}

struct DateLogger {
    logger: Arc<dyn Logger>,
    prefix: String,
}

impl DateLogger {
    fn log_date(&self) {
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.logger.log(&format!("{}{}s since epoch", self.prefix, now));
    }
}

/// Describe the types the container may build
fn types() -> TypeCatalog {
    TypeCatalog::new()
        .with(TypeDescriptor::interface(ServiceId::of::<dyn Logger>()))
        .with(
            TypeDescriptor::of::<ConsoleLogger>(Constructor::default_of::<ConsoleLogger>())
                .implements(|console: Arc<ConsoleLogger>| console as Arc<dyn Logger>),
        )
        .with(TypeDescriptor::of::<DateLogger>(Constructor::new(
            vec![
                Parameter::of::<dyn Logger>("logger"),
                Parameter::builtin("prefix", "string").with_default("now: "),
            ],
            |args| {
                Ok(DateLogger {
                    logger: args.interface(0)?,
                    prefix: args.str(1)?.to_string(),
                })
            },
        )))
}

/// Bind the logging interface to its console implementation.
///
/// The first parameter, if any, is the message logged whenever a date logger is requested.
struct LoggingProvider;

impl ServiceProvider for LoggingProvider {
    fn register(&self, container: &Container, parameters: &Arguments) -> Result<(), WiringError> {
        let console = Factory::new(ServiceId::of::<ConsoleLogger>(), container.types())?;
        container.set(ServiceId::of::<dyn Logger>(), console);

        let notice = if parameters.is_empty() {
            "date logger requested".to_string()
        } else {
            parameters.str(0)?.to_string()
        };
        container.extend(ServiceId::of::<DateLogger>(), move |instance, _| {
            if let Some(logger) = instance.downcast_ref::<DateLogger>() {
                logger.logger.log(&notice);
            }
        });
        Ok(())
    }
}

fn main() -> Result<(), WiringError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("WIRING_LOG").unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    let container = Container::new(types());
    let notice = Arguments::new(vec!["someone asked for the date".into()]);
    container.register_with(&LoggingProvider, &notice)?;

    // A hand-written class list stands in for a directory scanner
    let finder = |_: &Path| vec![ServiceId::of::<DateLogger>(), ServiceId::of::<dyn Logger>()];
    container.autowire("demos", &finder);

    let date_logger: Arc<DateLogger> = container.resolve()?;
    date_logger.log_date();

    let again: Arc<DateLogger> = container.resolve()?;
    assert!(Arc::ptr_eq(&date_logger, &again));

    Ok(())
}
