pub mod context;
pub mod markers;
pub mod orchestrator;
pub mod review;
pub mod state;
pub mod types;

pub use orchestrator::{ChangeRequest, Orchestrator, WorkflowSettings};
pub use types::{ChangeOutcome, IssueContext, Step};
