//! Source adapters: one per external archive, all behind [`SourceAdapter`].
//!
//! ```text
//!   &[Target] + QueryContext
//!        │
//!        ▼
//!   ┌───────────────┐     TableSource (HTTP / canned)
//!   │ SourceAdapter  │ ◄──────────────────────────────
//!   └───────────────┘
//!        │
//!        ▼
//!   Fragment  |  AdapterError
//! ```

pub mod gaia;
pub mod http;
pub mod synthetic;
pub mod ztf;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::data::model::{Angle, Fragment, Target};

pub use gaia::{GaiaAdapter, GaiaParams};
pub use http::{HttpTableSource, Table, TableSource};
pub use synthetic::{SyntheticAdapter, SyntheticParams};
pub use ztf::{ZtfAdapter, ZtfParams};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why an adapter invocation produced no fragment. "No match" is never an
/// error; adapters return an empty fragment for it.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("network error: {0}")]
    Network(String),
    #[error("archive returned HTTP {status}: {message}")]
    Archive { status: u16, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("query cancelled")]
    Cancelled,
}

impl AdapterError {
    /// Failures that may succeed when retried later.
    pub fn is_transient(&self) -> bool {
        match self {
            AdapterError::Network(_) => true,
            AdapterError::Archive { status, .. } => *status >= 500 || *status == 429,
            AdapterError::Malformed(_) | AdapterError::Cancelled => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag. A child token is cancelled when either it
/// or its parent is.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    own: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&self) -> Self {
        Self {
            own: Arc::new(AtomicBool::new(false)),
            parent: Some(self.own.clone()),
        }
    }

    pub fn cancel(&self) {
        self.own.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.own.load(Ordering::SeqCst)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.load(Ordering::SeqCst))
    }

    /// `Err(Cancelled)` once cancellation has been requested.
    pub fn check(&self) -> Result<(), AdapterError> {
        if self.is_cancelled() {
            Err(AdapterError::Cancelled)
        } else {
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Adapter contract
// ---------------------------------------------------------------------------

/// Per-invocation inputs shared by every archive.
#[derive(Debug, Clone)]
pub struct QueryContext {
    /// Search radius around each target.
    pub radius: Angle,
    pub cancel: CancelToken,
}

impl QueryContext {
    pub fn new(radius: Angle) -> Self {
        Self {
            radius,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// One external time-domain archive.
///
/// Archive-specific parameters live in the implementing type; the contract is
/// only `query`. Implementations must not share mutable state with each other
/// or with the scheduler.
pub trait SourceAdapter: Send + Sync {
    /// Short name, used in job reports and logs.
    fn name(&self) -> &str;

    /// Query the archive for `targets` and convert the result to points.
    fn query(&self, targets: &[Target], ctx: &QueryContext) -> Result<Fragment, AdapterError>;
}
