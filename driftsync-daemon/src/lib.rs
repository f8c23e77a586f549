//! driftsync daemon runtime: scheduled sync loop + signal handling.

mod error;
mod runtime;

pub use error::DaemonError;
pub use runtime::{read_tick_status, run, start_blocking, tick_status_path, TickStatus};
