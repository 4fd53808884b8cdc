//! Intentful reconciliation engine.
//!
//! Spec writes enter through [`Engine`], which picks a per-kind
//! [`strategy`]. Differ-based kinds are then driven to convergence by two
//! independent loops: the [`DiffResolver`] dispatches intent handlers for
//! outstanding diffs with backoff, and the [`IntentResolver`] reports progress
//! through intent watchers. A [`ChangeListener`] forwards observed changes to
//! the intent resolver between its periodic passes.

pub mod api;
pub mod backoff;
pub mod config;
pub mod diff_resolver;
pub mod error;
pub mod handler;
pub mod intent_resolver;
pub mod listener;
pub mod selection;
pub mod strategy;

pub use api::{Engine, Reconcilers};
pub use backoff::BackoffPolicy;
pub use config::{ConfigError, EngineConfig};
pub use diff_resolver::DiffResolver;
pub use error::{EngineError, HandlerError};
pub use handler::{HandlerRequest, HandlerResponse, HttpIntentHandler, IntentHandler};
pub use intent_resolver::IntentResolver;
pub use listener::ChangeListener;
pub use strategy::{EntityUpdate, IntentfulContext, IntentfulStrategy};
