//! Logging initialization
//!
//! Installs a `tracing` subscriber for embedders that do not bring their
//! own. Filtering uses the standard tracing directive syntax (so per-target
//! overrides like `warn,hippool=trace` work from either variable), and
//! output can be switched to JSON for log shippers.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: standard tracing directives, checked first
//! - `HIPPOOL_LOG_LEVEL`: directives applied when `RUST_LOG` is unset
//! - `HIPPOOL_LOG_FORMAT`: `json` emits one JSON object per event;
//!   anything else keeps plain text

use once_cell::sync::OnceCell;
use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// One-shot guard: a second `init_from_env` must not install a second
/// subscriber
static SUBSCRIBER_GUARD: OnceCell<()> = OnceCell::new();

const LEVEL_ENV: &str = "HIPPOOL_LOG_LEVEL";
const FORMAT_ENV: &str = "HIPPOOL_LOG_FORMAT";

/// Directives applied when neither filter variable is set
const DEFAULT_DIRECTIVES: &str = "info";

/// How log events are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Plain formatted text for terminals (default)
    #[default]
    Text,
    /// One JSON object per event, for log shippers
    Json,
}

impl OutputFormat {
    /// Read `HIPPOOL_LOG_FORMAT`; only an explicit `json` switches away
    /// from text output.
    pub fn from_env() -> Self {
        match std::env::var(FORMAT_ENV) {
            Ok(value) if value.eq_ignore_ascii_case("json") => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

/// Initialize logging from the environment.
///
/// Filter precedence: `RUST_LOG`, then `HIPPOOL_LOG_LEVEL`, then plain
/// `info`. Idempotent: repeat calls do nothing, and if the embedder already
/// installed a subscriber this one yields to it.
pub fn init_from_env() {
    SUBSCRIBER_GUARD.get_or_init(|| {
        let filter = env_filter();

        // try_init fails when an embedder already installed a subscriber;
        // defer to it in that case
        let _ = match OutputFormat::from_env() {
            OutputFormat::Json => {
                let layer = fmt::layer().json().with_target(false);
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init()
            }
            OutputFormat::Text => {
                let layer = fmt::layer().with_target(true);
                tracing_subscriber::registry()
                    .with(filter)
                    .with(layer)
                    .try_init()
            }
        };
    });
}

/// Resolve the event filter, skipping any variable whose directives fail
/// to parse
fn env_filter() -> EnvFilter {
    for var in ["RUST_LOG", LEVEL_ENV] {
        if let Ok(directives) = std::env::var(var) {
            if let Ok(filter) = EnvFilter::try_new(directives) {
                return filter;
            }
        }
    }
    EnvFilter::new(DEFAULT_DIRECTIVES)
}

/// Check if tracing has been initialized by this crate
pub fn is_initialized() -> bool {
    SUBSCRIBER_GUARD.get().is_some()
}
