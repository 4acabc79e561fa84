// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Log setup for drivers streaming chunks through spiral stacks.

use std::sync::OnceLock;

use spiral_config::tracing::{init_tracing_with, InitError, TracingOptions};
use tracing::{warn, Level};

static INIT_GUARD: OnceLock<Result<(), InitError>> = OnceLock::new();

/// Filter applied when `RUST_LOG` is unset: dependencies stay at `warn`
/// while this crate reports at `level`. `debug` exposes carry resets,
/// refresh toggles and per-chunk decay reports; `trace` adds every chunk.
pub fn default_filter(level: Level) -> String {
    format!("warn,st_nn={}", level.as_str().to_ascii_lowercase())
}

/// Subscriber options for this crate, with the chrome trace path still
/// taken from `SPIRAL_TRACE_CHROME`.
pub fn tracing_options(level: Level) -> Result<TracingOptions, InitError> {
    Ok(TracingOptions {
        default_filter: default_filter(level),
        ..TracingOptions::from_env()?
    })
}

/// [`init_tracing_at`] with `info`, enough for degenerate-decay warnings.
pub fn init_tracing() {
    init_tracing_at(Level::INFO);
}

/// Installs the process subscriber once. Later calls, whatever their level,
/// and subscribers installed elsewhere are left in place.
pub fn init_tracing_at(level: Level) {
    let result = INIT_GUARD.get_or_init(|| {
        match tracing_options(level).and_then(init_tracing_with) {
            Ok(()) | Err(InitError::AlreadyInitialised) => Ok(()),
            Err(err) => Err(err),
        }
    });

    if let Err(err) = result {
        warn!("failed to initialise tracing subscriber: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::EnvFilter;

    #[test]
    fn default_filter_scopes_level_to_this_crate() {
        assert_eq!(default_filter(Level::DEBUG), "warn,st_nn=debug");
        assert_eq!(default_filter(Level::TRACE), "warn,st_nn=trace");
        for level in [Level::WARN, Level::INFO, Level::TRACE] {
            assert!(EnvFilter::try_new(default_filter(level)).is_ok());
        }
    }

    #[test]
    fn options_carry_the_crate_filter() {
        let options = tracing_options(Level::DEBUG).unwrap();
        assert_eq!(options.default_filter, "warn,st_nn=debug");
    }

    #[test]
    fn repeated_initialisation_is_harmless() {
        init_tracing_at(Level::DEBUG);
        init_tracing();
        assert!(INIT_GUARD.get().is_some());
    }
}
