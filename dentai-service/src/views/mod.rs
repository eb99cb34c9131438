//! Server-side view controllers.
//!
//! Each view owns its local state and triggers exactly one gateway operation
//! per user action. A view allows one outstanding request at a time and is
//! tied to a [`ViewLifetime`]: once the view is disposed, late results are
//! dropped instead of being written back.

pub mod chat;
pub mod dashboard;
pub mod imaging;
pub mod referrals;
pub mod research;
pub mod shell;

pub use chat::ChatView;
pub use dashboard::DashboardView;
pub use imaging::ImagingView;
pub use referrals::{LocationSource, ReferralMapView, ReportedLocation};
pub use research::ResearchView;
pub use shell::{MountedView, ViewAction, ViewSnapshot, Workspace};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// The five screens of the clinic console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewKind {
    Dashboard,
    Imaging,
    Research,
    Referrals,
    Assistant,
}

impl ViewKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewKind::Dashboard => "dashboard",
            ViewKind::Imaging => "imaging",
            ViewKind::Research => "research",
            ViewKind::Referrals => "referrals",
            ViewKind::Assistant => "assistant",
        }
    }
}

impl fmt::Display for ViewKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    #[error("A request is already in flight on the {0} view")]
    Busy(ViewKind),

    #[error("The {0} view has been closed")]
    Disposed(ViewKind),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Action '{action}' is not available on the {mounted} view")]
    WrongView {
        action: &'static str,
        mounted: ViewKind,
    },
}

impl ViewError {
    pub fn outcome(&self) -> &'static str {
        match self {
            ViewError::Busy(_) => "busy",
            ViewError::Disposed(_) => "disposed",
            ViewError::InvalidInput(_) => "invalid_input",
            ViewError::WrongView { .. } => "wrong_view",
        }
    }
}

/// Request lifecycle of a single view action.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RequestState<T> {
    Idle,
    Awaiting,
    Succeeded { result: T },
    Failed { message: String },
}

impl<T> RequestState<T> {
    pub fn is_awaiting(&self) -> bool {
        matches!(self, RequestState::Awaiting)
    }

    pub fn result(&self) -> Option<&T> {
        match self {
            RequestState::Succeeded { result } => Some(result),
            _ => None,
        }
    }
}

/// Cancellation scope of a mounted view.
#[derive(Debug, Clone)]
pub struct ViewLifetime {
    kind: ViewKind,
    token: CancellationToken,
}

impl ViewLifetime {
    pub fn new(kind: ViewKind) -> Self {
        Self {
            kind,
            token: CancellationToken::new(),
        }
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    pub fn dispose(&self) {
        self.token.cancel();
    }

    pub fn is_disposed(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn ensure_active(&self) -> Result<(), ViewError> {
        if self.is_disposed() {
            Err(ViewError::Disposed(self.kind))
        } else {
            Ok(())
        }
    }

    /// Drive `future` unless the view is disposed first.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, ViewError> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(ViewError::Disposed(self.kind)),
            output = future => Ok(output),
        }
    }
}

/// Holder of one [`RequestState`] that refuses overlapping requests.
#[derive(Debug)]
pub struct RequestSlot<T> {
    lifetime: ViewLifetime,
    state: Mutex<RequestState<T>>,
}

impl<T: Clone> RequestSlot<T> {
    pub fn new(lifetime: ViewLifetime) -> Self {
        Self {
            lifetime,
            state: Mutex::new(RequestState::Idle),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RequestState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> RequestState<T> {
        self.lock().clone()
    }

    pub fn is_awaiting(&self) -> bool {
        self.lock().is_awaiting()
    }

    /// Move to `Awaiting`, or fail with `Busy` if a request is outstanding.
    pub fn begin(&self) -> Result<(), ViewError> {
        self.lifetime.ensure_active()?;
        let mut state = self.lock();
        if state.is_awaiting() {
            return Err(ViewError::Busy(self.lifetime.kind()));
        }
        *state = RequestState::Awaiting;
        Ok(())
    }

    /// Back to `Idle` unless a request is outstanding.
    pub fn reset(&self) -> Result<(), ViewError> {
        let mut state = self.lock();
        if state.is_awaiting() {
            return Err(ViewError::Busy(self.lifetime.kind()));
        }
        *state = RequestState::Idle;
        Ok(())
    }

    fn settle(&self, settled: RequestState<T>) -> Result<RequestState<T>, ViewError> {
        let mut state = self.lock();
        // Checked under the lock so a dispose racing the settle always wins
        self.lifetime.ensure_active()?;
        *state = settled;
        Ok(state.clone())
    }

    /// Run one request through the slot. Errors are logged and flattened to
    /// `failure_message`; a result arriving after disposal is discarded.
    pub async fn run<F, E>(&self, request: F, failure_message: &str) -> Result<RequestState<T>, ViewError>
    where
        F: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        self.begin()?;

        match self.lifetime.run(request).await? {
            Ok(result) => self.settle(RequestState::Succeeded { result }),
            Err(e) => {
                tracing::warn!(view = %self.lifetime.kind(), error = %e, "View request failed");
                self.settle(RequestState::Failed {
                    message: failure_message.to_string(),
                })
            }
        }
    }
}

/// Reject blank user input before it reaches the gateway.
pub(crate) fn require_input(field: &str, value: &str) -> Result<(), ViewError> {
    if value.trim().is_empty() {
        return Err(ViewError::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(())
}
