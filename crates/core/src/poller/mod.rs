//! Status poller for documents awaiting extraction.

mod runner;
mod types;

pub use runner::StatusPoller;
pub use types::{PollOutcome, PollerStatus, TickReport};
