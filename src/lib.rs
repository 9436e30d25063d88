pub mod completion_tracker;
pub mod config;
pub mod error;
pub mod qvalue;
pub mod range_collection;
pub mod row_auditor;
pub mod shared_file;
pub mod table;
pub mod tabulate;

pub use completion_tracker::{CompletionTracker, TrackerState};
pub use error::*;
pub use range_collection::RangeCollection;
pub use row_auditor::{AuditMode, RowAuditor};
pub use tabulate::{FdrAggregator, TabulateOutcome};

use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, defaulting to `info`.
/// Later calls are ignored.
pub fn init_tracing(service_name: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("[{}] tracing initialised", service_name);
    }
}
