//! Service feedback and host lifecycle outcomes.
//!
//! These are the only signals the scheduler and the runtime host reason
//! about: services report feedback after each turn, the host reports why it
//! stopped.

use serde::{Deserialize, Serialize};

/// What a worker service reports after one invocation.
///
/// We serialize as SCREAMING_SNAKE_CASE so the names line up with what the
/// monitoring output shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceFeedback {
    /// More work is known to be pending; call again right away.
    WorkAvailable,

    /// Did something, no opinion about what comes next.
    DontCare,

    /// Nothing to do.
    Skipped,

    /// The turn failed in a way the service handled itself.
    Failed,
}

impl ServiceFeedback {
    /// Should the scheduler keep invoking the same service (greedy continuation)?
    pub fn wants_more(self) -> bool {
        matches!(self, ServiceFeedback::WorkAvailable | ServiceFeedback::DontCare)
    }

    /// Did the turn perform actual work?
    pub fn did_work(self) -> bool {
        !matches!(self, ServiceFeedback::Skipped | ServiceFeedback::Failed)
    }
}

/// Why the runtime host wants the worker process to restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RestartReason {
    /// A new application package was published.
    NewCodeDetected,

    /// Configuration changed underneath the running process.
    ConfigurationChanged,

    /// A service turn failed with an error nobody handled.
    ServiceFailure { service: String, error: String },
}

/// How a runtime host run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostExit {
    /// Stop was requested; the process may exit normally.
    Stopped,

    /// The process should be recycled.
    Restart(RestartReason),
}
