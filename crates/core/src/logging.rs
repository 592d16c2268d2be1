//! Structured logging (C11): a stdout sink, a syslog sink, or both, gated by
//! a 0-2 verbosity level. Both sinks are optional so a host embedding the
//! engine can run fully silent.

use std::sync::Mutex;
use std::sync::OnceLock;

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::SyncConfig;

static TRACING_INIT: OnceLock<()> = OnceLock::new();

fn level_filter(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

/// A `tracing_subscriber` layer that mirrors events into a local syslog
/// connection, mapping `tracing::Level` to the nearest syslog severity.
struct SyslogLayer {
    logger: Mutex<syslog::Logger<syslog::LoggerBackend, String>>,
}

impl SyslogLayer {
    fn connect() -> std::io::Result<Self> {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_USER,
            hostname: None,
            process: "azure-sync".into(),
            pid: std::process::id(),
        };
        let logger =
            syslog::unix(formatter).map_err(|e| std::io::Error::other(e.to_string()))?;
        Ok(Self {
            logger: Mutex::new(logger),
        })
    }
}

struct MessageVisitor(String);

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.0 = format!("{value:?}");
        }
    }
}

impl<S> Layer<S> for SyslogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor(String::new());
        event.record(&mut visitor);
        let message = format!("{} {}", event.metadata().target(), visitor.0);

        let mut logger = match self.logger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let result = match *event.metadata().level() {
            Level::ERROR => logger.err(message),
            Level::WARN => logger.warning(message),
            Level::INFO => logger.info(message),
            Level::DEBUG | Level::TRACE => logger.debug(message),
        };
        if let Err(e) = result {
            eprintln!("azure-sync: syslog write failed: {e}");
        }
    }
}

/// Install the global tracing subscriber according to `config`. Idempotent
/// within a process; later calls are no-ops.
pub fn init(config: &SyncConfig) {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_new(level_filter(config.verbose))
            .unwrap_or_else(|_| EnvFilter::new("warn"));

        let registry = Registry::default().with(filter);

        let stdout_layer = config.log_stdout.then(|| {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_writer(std::io::stdout)
        });

        let syslog_layer = if config.log_syslog {
            match SyslogLayer::connect() {
                Ok(layer) => Some(layer),
                Err(e) => {
                    eprintln!("azure-sync: could not connect to syslog, disabling: {e}");
                    None
                }
            }
        } else {
            None
        };

        let _ = registry.with(stdout_layer).with(syslog_layer).try_init();
    });
}
