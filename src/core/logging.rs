//! Subscriber setup for binaries and tests

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install a global fmt subscriber at `level`.
///
/// Returns false when a global subscriber is already installed, so tests can
/// call this freely.
pub fn init(level: Level) -> bool {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_ok()
}

/// Parse a level name (`trace` .. `error`), falling back to `info`
pub fn level_from_str(name: &str) -> Level {
    name.parse().unwrap_or(Level::INFO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init(Level::DEBUG);
        assert!(!init(Level::DEBUG));
    }

    #[test]
    fn test_level_names() {
        assert_eq!(level_from_str("warn"), Level::WARN);
        assert_eq!(level_from_str("nonsense"), Level::INFO);
    }
}
