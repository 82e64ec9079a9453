//! Pipeline execution for a single work item: git plumbing, steering sync,
//! the code-generation CLI executor, test running, and the phase
//! orchestrator that ties them together.

pub mod executor;
pub mod git;
pub mod orchestrator;
pub mod pull_request;
pub mod resources;
pub mod steering;
pub mod test_runner;

pub use executor::{ExecutorError, ProcessExecutor, TaskExecutor, TaskOptions};
pub use git::{GitError, GitOperations, GitRunner};
pub use orchestrator::{PipelineConfig, PipelineError, PipelineFailure, PipelineOrchestrator};
pub use pull_request::{PullRequest, PullRequestError, PullRequestTarget};
pub use resources::ResourceTracker;
pub use test_runner::{ShellTestRunner, TestCommandRunner, TestRunOutput};
