//! `stagehand-cockpit` – The Remote Control Server
//!
//! Boots a lightweight HTTP + WebSocket server (default port `8000`) that:
//!
//! 1. **Answers** plain HTTP `GET` routes (`/start`, `/stop`, `/status`,
//!    `/tasks`, `/tasks/{name}/enable|disable`, `/models/{name}`) with JSON,
//!    by calling the [`ControlSurface`] the orchestrator implements.
//!
//! 2. **Pushes** to every WebSocket observer the JPEG frames published on the
//!    [`EventBus`] frame channel (binary messages, `"{w},{h},"` followed by
//!    the JPEG bytes) and every bus [`Event`] as JSON text.
//!
//! 3. **Accepts** upstream WebSocket commands
//!    `{"op": "start" | "stop" | "status" | "enable" | "disable" | "switch_model", "name"?}`
//!    and answers each with a JSON reply.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use stagehand_cockpit::CockpitServer;
//! use stagehand_middleware::EventBus;
//! use stagehand_types::ControlSurface;
//!
//! async fn serve(control: Arc<dyn ControlSurface>, bus: EventBus) {
//!     if let Err(e) = CockpitServer::new(control, bus).run().await {
//!         eprintln!("cockpit failed: {e}");
//!     }
//! }
//! ```
//!
//! [`ControlSurface`]: stagehand_types::ControlSurface
//! [`EventBus`]: stagehand_middleware::EventBus
//! [`Event`]: stagehand_types::Event

pub mod server;

pub use server::{CockpitServer, DEFAULT_PORT};
