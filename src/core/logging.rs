use tracing::Level;

use super::config::EngineConfig;

/// Install a fmt subscriber at the configured level.
///
/// Returns `false` when a global subscriber was already installed.
pub fn init_tracing(config: &EngineConfig) -> bool {
    tracing_subscriber::fmt()
        .with_max_level(parse_level(&config.log_level))
        .with_target(true)
        .try_init()
        .is_ok()
}

pub(crate) fn parse_level(level: &str) -> Level {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("warn"), Level::WARN);
        assert_eq!(parse_level("whatever"), Level::INFO);
    }
}
