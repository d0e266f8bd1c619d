use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::port::AllocationError;
use crate::process::ExitReport;

/// Why one runtime candidate did not produce a ready engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptFailure {
    SpawnFailed(String),
    ProbeTimedOut(Duration),
    ExitedDuringProbe(ExitReport),
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SpawnFailed(reason) => write!(f, "failed to start: {reason}"),
            Self::ProbeTimedOut(timeout) => {
                write!(f, "not ready after {}ms", timeout.as_millis())
            }
            Self::ExitedDuringProbe(report) => write!(f, "exited during startup ({report})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchAttempt {
    pub runtime: String,
    pub failure: AttemptFailure,
}

impl fmt::Display for LaunchAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.runtime, self.failure)
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(
        "engine unavailable for {}: {}",
        .workspace.display(),
        describe_attempts(.attempts)
    )]
    EngineUnavailable {
        workspace: PathBuf,
        attempts: Vec<LaunchAttempt>,
    },
}

impl SupervisorError {
    /// One-line guidance shown to the user at the point of failure.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Allocation(_) => {
                "could not reserve a local port for the engine; check loopback networking"
                    .to_owned()
            }
            Self::EngineUnavailable { attempts, .. } if attempts.is_empty() => {
                "no engine runtime is configured".to_owned()
            }
            Self::EngineUnavailable { attempts, .. } => {
                let all_missing = attempts
                    .iter()
                    .all(|attempt| matches!(attempt.failure, AttemptFailure::SpawnFailed(_)));
                if all_missing {
                    "engine runtime not found; install Python 3 or configure a runtime".to_owned()
                } else {
                    format!("engine failed to start ({})", describe_attempts(attempts))
                }
            }
        }
    }
}

fn describe_attempts(attempts: &[LaunchAttempt]) -> String {
    if attempts.is_empty() {
        return "no runtime candidates".to_owned();
    }
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use super::{AttemptFailure, LaunchAttempt, SupervisorError};

    #[test]
    fn unavailable_lists_every_attempt() {
        let error = SupervisorError::EngineUnavailable {
            workspace: PathBuf::from("/work"),
            attempts: vec![
                LaunchAttempt {
                    runtime: "python3".to_owned(),
                    failure: AttemptFailure::ProbeTimedOut(Duration::from_millis(15_000)),
                },
                LaunchAttempt {
                    runtime: "python".to_owned(),
                    failure: AttemptFailure::SpawnFailed("not found".to_owned()),
                },
            ],
        };

        assert_eq!(
            error.to_string(),
            "engine unavailable for /work: python3: not ready after 15000ms; python: failed to start: not found"
        );
        assert!(error.user_message().starts_with("engine failed to start"));
    }
}
