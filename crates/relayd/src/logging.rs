use tracing::Level;
use tracing_subscriber::fmt::time::ChronoLocal;

/// Line-oriented logging to stdout: local `YYYY-MM-DD HH:MM:SS` timestamp,
/// level name, message. Events below `level` are suppressed.
pub fn init(level: Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S".to_string()))
        .with_target(false)
        .with_ansi(false)
        .init();
}
