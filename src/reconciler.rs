//! Lock command reconciliation.
//!
//! A command is never trusted to have worked: after every press the panel is
//! classified again, and a mismatch is retried a bounded number of times.
//! Exactly one state is published per [`Reconciler::reconcile`] call.
//!
//! ```text
//! Idle -> Dispatching -> Verifying -+-> Success
//!             ^                     +-> Retrying --+
//!             |                     +-> Failed     |
//!             +--------------------------------------+
//! ```

use crate::bus::{PublishedState, StatePublisher};
use crate::classifier::LockState;
use crate::diagnostics::DiagnosticTag;
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// A lock command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockAction {
    /// Lock the door.
    Lock,
    /// Unlock the door.
    Unlock,
}

impl LockAction {
    /// The state this action is expected to produce.
    pub fn target(self) -> LockState {
        match self {
            Self::Lock => LockState::Locked,
            Self::Unlock => LockState::Unlocked,
        }
    }

    /// Lowercase name, used in logs and screenshot file names.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::Unlock => "unlock",
        }
    }
}

impl fmt::Display for LockAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the reconciler drives: press a button, look at the result, and keep
/// evidence when things go wrong.
#[async_trait]
pub trait LockSurface: Send + Sync {
    /// Dispatch `action` and wait for the app to react.
    async fn press(&self, action: LockAction) -> Result<()>;

    /// Classify the current state.
    async fn observe(&self) -> Result<LockState>;

    /// Save a diagnostic screenshot and return its path.
    async fn capture_diagnostic(
        &self,
        action: LockAction,
        tag: DiagnosticTag,
        attempt: u32,
    ) -> Result<PathBuf>;
}

/// Reconciliation phase, recorded in [`ReconcileReport::phases`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Nothing dispatched yet.
    Idle,
    /// Pressing the action button.
    Dispatching,
    /// Classifying the result.
    Verifying,
    /// Mismatch with budget left.
    Retrying,
    /// Target state observed.
    Success,
    /// Terminal without the target state.
    Failed,
}

/// How a reconciliation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The target state was observed.
    Success(LockState),
    /// The app lost the lock hardware; retrying cannot help.
    Unlinked,
    /// The retry budget ran out; `last` is the final observation.
    Exhausted {
        /// Last classified state.
        last: LockState,
    },
    /// The device could not be driven.
    Error(String),
}

impl Resolution {
    /// The value published for this resolution.
    pub fn published_state(&self) -> PublishedState {
        match self {
            Self::Success(state) => PublishedState::from(*state),
            Self::Unlinked => PublishedState::Unlinked,
            Self::Exhausted { .. } => PublishedState::Unknown,
            Self::Error(_) => PublishedState::Error,
        }
    }
}

/// Record of one reconciliation.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    /// The requested action.
    pub action: LockAction,
    /// Final outcome.
    pub resolution: Resolution,
    /// Number of dispatches made.
    pub attempts: u32,
    /// The state published at the end.
    pub published: PublishedState,
    /// Diagnostic screenshots written along the way.
    pub screenshots: Vec<PathBuf>,
    /// Phase trace, oldest first.
    pub phases: Vec<Phase>,
}

impl ReconcileReport {
    /// Returns `true` when the target state was reached.
    pub fn succeeded(&self) -> bool {
        matches!(self.resolution, Resolution::Success(_))
    }
}

/// Drives a [`LockSurface`] towards a target state.
pub struct Reconciler {
    surface: Arc<dyn LockSurface>,
    publisher: Arc<dyn StatePublisher>,
}

impl Reconciler {
    /// Build a reconciler publishing through `publisher`.
    pub fn new(surface: Arc<dyn LockSurface>, publisher: Arc<dyn StatePublisher>) -> Self {
        Self { surface, publisher }
    }

    /// Press `action` until its target state is observed, retrying at most
    /// `max_retries` times after the first dispatch.
    ///
    /// Unlinked ends the loop at once. Channel failures end it with `ERROR`
    /// and are never retried here.
    pub async fn reconcile(&self, action: LockAction, max_retries: u32) -> ReconcileReport {
        let mut run = Run {
            action,
            attempts: 0,
            screenshots: Vec::new(),
            phases: vec![Phase::Idle],
        };
        let target = action.target();
        let mut retries_left = max_retries;

        let resolution = loop {
            run.attempts += 1;
            let attempt = run.attempts;
            info!(%action, attempt, "dispatching lock command");

            run.phases.push(Phase::Dispatching);
            if let Err(e) = self.surface.press(action).await {
                error!(%action, attempt, error = %e, channel = e.is_channel_failure(), "dispatch failed");
                break self.abort(&mut run, e.to_string()).await;
            }

            run.phases.push(Phase::Verifying);
            let observed = match self.surface.observe().await {
                Ok(state) => state,
                Err(e) => {
                    error!(%action, attempt, error = %e, channel = e.is_channel_failure(), "verification failed");
                    break self.abort(&mut run, e.to_string()).await;
                }
            };

            if observed == LockState::Unlinked {
                warn!(%action, attempt, "lock hardware unlinked, not retrying");
                run.phases.push(Phase::Failed);
                break Resolution::Unlinked;
            }
            if observed == target {
                info!(%action, attempt, state = %observed, "lock reached target state");
                run.phases.push(Phase::Success);
                break Resolution::Success(observed);
            }
            if retries_left > 0 {
                retries_left -= 1;
                warn!(
                    %action,
                    attempt,
                    observed = %observed,
                    expected = %target,
                    retries_left,
                    "state mismatch, retrying"
                );
                run.phases.push(Phase::Retrying);
                self.capture(&mut run, DiagnosticTag::Retry, attempt).await;
                continue;
            }

            error!(
                %action,
                attempt,
                observed = %observed,
                expected = %target,
                "state mismatch, retry budget exhausted"
            );
            run.phases.push(Phase::Failed);
            self.capture(&mut run, DiagnosticTag::Failure, attempt).await;
            break Resolution::Exhausted { last: observed };
        };

        let published = resolution.published_state();
        if let Err(e) = self.publisher.publish(published).await {
            error!(%action, state = %published, error = %e, "failed to publish state");
        }

        ReconcileReport {
            action,
            resolution,
            attempts: run.attempts,
            published,
            screenshots: run.screenshots,
            phases: run.phases,
        }
    }

    async fn abort(&self, run: &mut Run, detail: String) -> Resolution {
        run.phases.push(Phase::Failed);
        let attempt = run.attempts;
        self.capture(run, DiagnosticTag::Failure, attempt).await;
        Resolution::Error(detail)
    }

    async fn capture(&self, run: &mut Run, tag: DiagnosticTag, attempt: u32) {
        match self
            .surface
            .capture_diagnostic(run.action, tag, attempt)
            .await
        {
            Ok(path) => run.screenshots.push(path),
            Err(e) => warn!(action = %run.action, %tag, error = %e, "diagnostic screenshot failed"),
        }
    }
}

struct Run {
    action: LockAction,
    attempts: u32,
    screenshots: Vec<PathBuf>,
    phases: Vec<Phase>,
}
