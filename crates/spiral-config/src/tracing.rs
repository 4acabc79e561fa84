use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

const ENV_CHROME: &str = "SPIRAL_TRACE_CHROME";
const DEFAULT_FILTER: &str = "info";

static INITIALISED: OnceLock<()> = OnceLock::new();
static CHROME_GUARD: OnceLock<Mutex<Option<tracing_chrome::FlushGuard>>> = OnceLock::new();

/// Subscriber settings. `RUST_LOG` always wins over `default_filter`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TracingOptions {
    pub default_filter: String,
    /// Chrome trace output, written when the guard drops at process exit.
    pub chrome_trace: Option<PathBuf>,
}

impl Default for TracingOptions {
    fn default() -> Self {
        Self {
            default_filter: DEFAULT_FILTER.to_string(),
            chrome_trace: None,
        }
    }
}

impl TracingOptions {
    /// Default filter plus the chrome path from `SPIRAL_TRACE_CHROME`.
    pub fn from_env() -> Result<Self, InitError> {
        Ok(Self {
            chrome_trace: chrome_trace_path()?,
            ..Self::default()
        })
    }
}

/// Configures the global tracing subscriber from the environment.
pub fn init_tracing() -> Result<(), InitError> {
    init_tracing_with(TracingOptions::from_env()?)
}

/// Configures the global tracing subscriber with explicit options.
pub fn init_tracing_with(options: TracingOptions) -> Result<(), InitError> {
    INITIALISED
        .set(())
        .map_err(|_| InitError::AlreadyInitialised)?;

    let ansi = std::io::stdout().is_terminal();
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(options.default_filter.as_str()));
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(ansi);

    match options.chrome_trace {
        Some(path) => {
            let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
                .file(path)
                .include_args(true)
                .build();
            let cell = CHROME_GUARD.get_or_init(|| Mutex::new(None));
            if let Ok(mut slot) = cell.lock() {
                *slot = Some(guard);
            }
            Registry::default()
                .with(filter)
                .with(fmt_layer)
                .with(chrome_layer)
                .try_init()
                .map_err(|err| InitError::Subscriber(err.to_string()))?;
        }
        None => {
            Registry::default()
                .with(filter)
                .with(fmt_layer)
                .try_init()
                .map_err(|err| InitError::Subscriber(err.to_string()))?;
        }
    }

    Ok(())
}

fn chrome_trace_path() -> Result<Option<PathBuf>, InitError> {
    match std::env::var(ENV_CHROME) {
        Ok(raw) if !raw.trim().is_empty() => Ok(Some(PathBuf::from(raw.trim()))),
        Ok(_) => Ok(None),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(InitError::Env(err)),
    }
}

/// Errors emitted when configuring the tracing subscriber.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("tracing has already been initialised")]
    AlreadyInitialised,
    #[error("failed to read SPIRAL_TRACE_CHROME: {0}")]
    Env(std::env::VarError),
    #[error("another global subscriber is installed: {0}")]
    Subscriber(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_use_info_filter() {
        let options = TracingOptions::default();
        assert_eq!(options.default_filter, "info");
        assert!(options.chrome_trace.is_none());
    }

    #[test]
    fn second_initialisation_is_rejected() {
        let first = init_tracing_with(TracingOptions::default());
        let second = init_tracing_with(TracingOptions::default());
        assert!(first.is_ok() || matches!(first, Err(InitError::Subscriber(_))));
        assert!(matches!(second, Err(InitError::AlreadyInitialised)));
    }
}
