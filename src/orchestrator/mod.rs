//! Session orchestration.
//!
//! The supervisor owns channel lifecycle and the single event loop, the reconciler filters
//! and commits updates, and the controller translates front-end commands into handle calls.

mod controller;
mod reconciler;
mod supervisor;

pub(crate) use controller::{run_controller, shutdown, UiCommand};
pub(crate) use supervisor::{spawn_supervisor, SupervisorParts};
pub use supervisor::SyncHandle;
