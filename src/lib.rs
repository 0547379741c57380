// Scream Skip Core - shout at an ad to skip it
// Ad-state watching, microphone loud-event detection and page actions,
// tied together by a single coordinator

// Module declarations
pub mod action;
pub mod audio;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod messages;
pub mod settings;
pub mod telemetry;
pub mod testing;
pub mod watcher;

use std::sync::Once;

// Re-exports for convenience
pub use coordinator::{Coordinator, CoordinatorDeps, CoordinatorHandle};
pub use messages::{CoordinatorMessage, CoordinatorReply};
pub use settings::Settings;

static LOGGING: Once = Once::new();

/// Install the global subscriber once. `RUST_LOG` overrides the default
/// `info` filter; `log` records are bridged into tracing.
pub fn init_logging() {
    LOGGING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
