//! Log subscriber bootstrap.
//!
//! Everything goes to stderr so streamed replies on stdout stay clean. Engine
//! output arrives under the `engine` target.

use std::env;

use anyhow::anyhow;
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "ENGINE_HOST_LOG";
pub const DEFAULT_FILTER: &str = "info";

/// Picks the filter directive: `--log`, then `ENGINE_HOST_LOG`, then `info`.
pub fn select_directive(flag: Option<&str>, env_value: Option<&str>) -> String {
    [flag, env_value]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or(DEFAULT_FILTER)
        .to_owned()
}

pub fn build_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|error| {
        eprintln!("invalid log filter {directive:?} ({error}); using {DEFAULT_FILTER}");
        EnvFilter::new(DEFAULT_FILTER)
    })
}

pub fn init_logging(flag: Option<&str>) -> anyhow::Result<()> {
    let env_value = env::var(LOG_ENV).ok();
    let directive = select_directive(flag, env_value.as_deref());
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(&directive))
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| anyhow!("installing log subscriber: {error}"))
}

#[cfg(test)]
mod tests {
    use super::select_directive;

    #[test]
    fn flag_beats_env_beats_default() {
        assert_eq!(select_directive(Some("debug"), Some("warn")), "debug");
        assert_eq!(select_directive(None, Some("warn")), "warn");
        assert_eq!(select_directive(Some("  "), None), "info");
        assert_eq!(select_directive(None, None), "info");
    }
}
