//! PID go-to-position control loop and device lifecycle orchestration.
//!
//! - [`pid`] - the control-signal computation used by each go-to-position
//!   cycle.
//! - [`supervisor`] - `TurntableSupervisor`, which owns the devices, the
//!   tracked position, and the in-flight go-to-position task.

pub mod pid;
pub mod supervisor;

pub use supervisor::TurntableSupervisor;
