pub mod error;
pub mod jobs;
pub mod service;

pub use error::EngineError;
pub use jobs::{JobControl, JobId, JobPool, JobResults, JobSnapshot, JobStatus};
pub use service::{BatchItem, ClassifiedTransaction, Engine};
