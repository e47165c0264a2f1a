//! `stagehand-runtime` – The Director
//!
//! Turns perception into action: the loop that keeps the latest frame fresh,
//! the waits procedures are written with, and the procedures themselves.
//!
//! # Modules
//!
//! - [`orchestrator`] – [`Orchestrator`][orchestrator::Orchestrator]: owns
//!   the drivers, runs the capture → detect → publish → middleware loop on a
//!   dedicated thread, tracks the current location, swaps detection models
//!   and implements [`ControlSurface`][stagehand_types::ControlSurface] for
//!   the cockpit.
//! - [`conditions`] – [`Conditions`][conditions::Conditions]: polling waits
//!   (`wait_for_label`, `wait_for_modal`, `click_on_label`,
//!   `wait_for_loading`, ...) evaluated against the latest perception, and
//!   the navigation helpers built on them.
//! - [`procedures`] – the built-in tasks (`start_game`,
//!   `collect_expenditure`, `get_gift`, `dispatch_work`) and the
//!   `init_location` middleware that kicks off the first run.
//! - [`demo`] – a scripted game for the simulated window, walking every
//!   screen the built-in tasks visit.
//! - [`streak`] – [`Streak`][streak::Streak]: consecutive-observation counter
//!   used by the waits.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: initialises
//!   the global `tracing` subscriber with an optional OTLP span exporter.
//!
//! # Failure policy
//!
//! A procedure that returns an error or panics marks its task `FAILED` and
//! aborts the rest of the run; one that overruns its timeout is `CANCELED`
//! and the run moves on.  See [`stagehand_kernel::TaskQueue`].

pub mod conditions;
pub mod demo;
pub mod orchestrator;
pub mod procedures;
pub mod streak;
pub mod telemetry;

pub use conditions::{Conditions, WaitTiming};
pub use orchestrator::{
    Middleware, Orchestrator, OrchestratorBuilder, OrchestratorConfig, ProcedureTimeouts,
};
pub use procedures::{register_builtin, register_builtin_middleware};
pub use streak::Streak;
pub use telemetry::{TracerProviderGuard, init_tracing};

// Procedures return this; re-exported so task code needs no direct kernel
// dependency.
pub use stagehand_kernel::TaskOutcome;
