//! Error types for the Mystic control plane
//!
//! Caller-visible failures are exactly `{Config, RegistryConflict, Blocked,
//! NotFound, Call}`. Observational paths (logger, tracker, analysis) never
//! surface errors; their faults are swallowed, counted, and logged at debug
//! level by the component that caught them.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identity::FunctionIdentity;

/// A serializable record of an error raised by a callable.
///
/// This is the wire form carried in call events, hijack results, and MCP
/// responses. `kind` is a short classifier (`"ValueError"`, `"BlockedError"`,
/// `"IoError"`, ...); `message` is human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct CallError {
    pub kind: String,
    pub message: String,
}

impl CallError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Error kind used by the block strategy when `raise_error` is set.
    pub const BLOCKED_KIND: &'static str = "BlockedError";

    pub fn blocked(reason: impl Into<String>) -> Self {
        Self::new(Self::BLOCKED_KIND, reason)
    }

    pub fn is_blocked(&self) -> bool {
        self.kind == Self::BLOCKED_KIND
    }
}

/// Top-level error type for Mystic operations.
#[derive(Debug, Error)]
pub enum MysticError {
    /// Invalid environment tag or uncreatable directory. Fatal at init.
    #[error("configuration error: {0}")]
    Config(String),

    /// An attempt to re-wrap an identity without `replace = true`.
    #[error("{identity} is already hijacked (pass replace=true to rebind)")]
    RegistryConflict { identity: FunctionIdentity },

    /// Intentional refusal produced by the block strategy.
    #[error("call blocked: {reason}")]
    Blocked { reason: String },

    /// Unknown identity on unhijack/inspect/metrics lookup.
    #[error("function not found: {0}")]
    NotFound(String),

    /// The wrapped callable (or a redirect target) raised.
    #[error(transparent)]
    Call(#[from] CallError),
}

impl MysticError {
    /// Lift a `CallError` into the caller-visible error space, mapping the
    /// block sentinel kind onto `Blocked`.
    pub fn from_call(err: CallError) -> Self {
        if err.is_blocked() {
            MysticError::Blocked {
                reason: err.message,
            }
        } else {
            MysticError::Call(err)
        }
    }
}
