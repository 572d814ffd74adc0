//! Mystic - runtime function-control plane
//!
//! This library interposes on registered callables to provide a pluggable
//! call-interception pipeline (cache/mock/block/redirect/analyze/conditional),
//! structured call logging with correlation IDs and redaction, source-level
//! introspection with JSON-schema generation, low-overhead performance
//! accounting, and a snapshot/timeline state store. The `mcp` module exposes
//! all of it to an external AI client over JSON-RPC.

pub mod cli;
pub mod config;
pub mod correlation;
pub mod error;
pub mod hijacker;
pub mod identity;
pub mod inspector;
pub mod logger;
pub mod mcp;
pub mod redactor;
pub mod state_manager;
pub mod strategies;
pub mod tracker;

pub use config::{Environment, MysticConfig};
pub use error::{CallError, MysticError};
pub use hijacker::{hijack, registry, CallHijacker, HijackRegistry};
pub use identity::FunctionIdentity;
pub use inspector::{FunctionAnalysis, Inspector};
pub use logger::{CallLogger, CallRecord, LogFormat};
pub use redactor::Redactor;
pub use state_manager::{SnapshotKind, StateManager};
pub use strategies::{CallArgs, HijackContext, HijackResult, NativeCall, Priority, Strategy};
pub use tracker::{MetricsEntry, PerformanceTracker};
