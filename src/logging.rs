// src/logging.rs
// Tracing subscriber setup for workers embedding the engine

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Initialize a global tracing subscriber writing to stderr.
///
/// Level comes from `KIRO_LOG_LEVEL` when set (off/error/warn/info/debug),
/// otherwise the provided default. Safe to call more than once; only the
/// first call installs a subscriber.
pub fn init(default_level: Level) {
    let level = match std::env::var("KIRO_LOG_LEVEL")
        .unwrap_or_default()
        .to_lowercase()
        .as_str()
    {
        "off" => None,
        "error" => Some(Level::ERROR),
        "warn" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" | "trace" => Some(Level::DEBUG),
        _ => Some(default_level),
    };

    if let Some(level) = level {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(false)
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    }
}
