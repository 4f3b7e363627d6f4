//! Client for an asynchronous grading queue
//!
//! Packages submissions, enqueues them, follows worker and task state, and
//! turns result artifacts into verdicts, whether they are picked up from the
//! shared task directory or pushed back through a callback.

pub mod archive;
pub mod callback;
pub mod catalog;
pub mod config;
pub mod error;
pub mod queue;
pub mod resolver;
pub mod storage;
pub mod tracker;
pub mod verdict;

pub use archive::{build_submission_from_source, build_submission_tar, SubmissionArtifact};
pub use callback::{callback_url, CallbackReceiver, CallbackServer, CallbackWaiter};
pub use config::Settings;
pub use error::{QueueError, Result};
pub use queue::{AdminClient, QueueApi, QueueClient, Task, Worker, WorkerSeed};
pub use resolver::{resolve_first, Channel, ResolvedVerdict, VerdictResolver};
pub use storage::TaskStorage;
pub use tracker::{wait_until_file_appears, PollOptions, StateTracker};
pub use verdict::{decode_verdict, verdict_from_filename, Verdict, VerdictCode};
