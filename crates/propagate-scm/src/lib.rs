pub mod agent;
pub mod error;
pub mod github;
mod retry;

pub use agent::{AgentClient, AgentSession, AgentStatus, PullRequestRef, StructuredOutput};
pub use error::ScmError;
pub use github::{
    ci_outcome_from_check_runs, parse_pr_url, ChangedFile, CheckRun, CiOutcome, GitHubClient, PrHead, PrState, PrUser,
    PullRequest,
};
