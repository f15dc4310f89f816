//! Logging utilities
//!
//! The backend logs exclusively through the `log` facade; whichever logger the host
//! installs is the sink. These helpers install `env_logger` for binaries that have no
//! logger of their own.

pub use log::{debug, error, info, trace, warn, LevelFilter};

/// Initialize the logging system from `RUST_LOG`
pub fn init() {
    env_logger::init();
}

/// Initialize the logging system with a default filter
///
/// `RUST_LOG`, when set, still overrides `default_level`. Calling this more than once
/// is harmless; later calls are ignored.
pub fn init_with_level(default_level: LevelFilter) {
    let _ = env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .format_timestamp_millis()
        .try_init();
}

/// Parse a level name such as `"info"` or `"debug"`
pub fn parse_level(name: &str) -> Option<LevelFilter> {
    name.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("info"), Some(LevelFilter::Info));
        assert_eq!(parse_level(" Debug "), Some(LevelFilter::Debug));
        assert_eq!(parse_level("loud"), None);
    }
}
