use tracing::Level;

/// Initializes the global tracing subscriber. Call once at process start,
/// before any component begins logging.
pub fn initialize_tracing(level: Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_thread_names(true)
        .init();
}
