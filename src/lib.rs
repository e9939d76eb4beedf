//! # mailflow
//!
//! mailflow is a rule-driven email automation backend built in Rust. It
//! consumes email lifecycle events (sent, delivered, opened, clicked,
//! bounced, complained, failed) and decides, per contact, whether to send
//! templated follow-up email, mutate contact state, or advance the contact
//! through a multi-step, time-gated sequence.
//!
//! ## Architecture Overview
//!
//! Two independent consumers process every inbound event:
//!
//! - the **Automation Processor** runs campaign-scoped rules (flat AND-only
//!   conditions, ordered action lists, event-adapted follow-up content);
//! - the **Sequence Engine** drives per-contact executions of predefined
//!   multi-step sequences (structured `all`/`any` conditions, priority
//!   ordering, a paused/active/terminal state machine, and delayed rules).
//!
//! Delayed work is a serializable unit in the scheduled-work storage; a
//! scheduler task queues due units, and a worker task re-evaluates their
//! conditions at fire time before executing. Storage backends and the email
//! transport are trait collaborators injected at construction; the binary
//! owns the process lifecycle.
//!
//! ## Error Handling
//!
//! All error strings use the format: `error-mailflow-<domain>-<number>
//! <message>: <details>`

/// Campaign automation processing: flat-condition rules, ordered actions,
/// and event-adapted follow-up content.
pub mod automation;

/// Configuration management, loaded from environment variables with
/// validated newtype fields.
pub mod config;

pub(crate) mod constants;

/// The rule evaluation engine: condition evaluation, typed actions, rule
/// matching, and action execution.
pub mod engine;

pub mod errors;

/// Normalized provider events and the inbound event router.
pub mod events;

/// Template resolution and email dispatch (organization templates, built-in
/// fallbacks, branding, dev-mode redirection).
pub mod mailer;

/// Queue adapter abstractions for handing scheduled work to the worker.
pub mod queue_adapter;

/// Multi-step sequences: definitions, executions, the predefined catalog,
/// and the sequence engine.
pub mod sequence;

/// Storage layer traits with PostgreSQL and in-memory implementations.
pub mod storage;

/// Background tasks: the delayed-work scheduler and the execution worker.
pub mod tasks;

/// Template variable interpolation (`{{var}}` plus a tiny `{expression}`
/// language).
pub mod template;

/// Outbound email transport abstraction and implementations.
pub mod transport;

/// Load-time validation for sequence definitions and automation rules.
pub mod validation;
