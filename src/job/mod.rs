mod handle;
mod poller;
mod state;

pub use handle::{JobHandle, JobKind};
pub use poller::{JobPoller, JobReport, PollSettings};
pub use state::JobFailure;
