//! Development-time tracing for debugging the fleet.
//!
//! # Separation of Concerns
//!
//! - **Tracing (this module)**: Dev diagnostics via `RUST_LOG`, output to stderr.
//!   Not persisted, not part of fleet product output.
//!
//! - **Lifecycle telemetry (`io/telemetry`)**: Product events appended to
//!   `.fleet/events.jsonl` by `fleet run`. Unaffected by `RUST_LOG`.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset, by `-v` count.
pub fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "warn",
        1 => "warn,fleet=info,fleet::events=info",
        _ => "fleet=debug,fleet::events=info",
    }
}

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var, falling back to [`default_directive`].
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=fleet::execution=debug cargo run -- run --task robot_1=6,8
/// ```
pub fn init(verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
