//! Process-wide logging setup.

pub mod subscriber;

pub use subscriber::{LogFormat, ParseLogFormatError, init_with};

/// Initialize JSON logging filtered by `RUST_LOG` (default `info`).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    subscriber::init_with(LogFormat::Json);
}
