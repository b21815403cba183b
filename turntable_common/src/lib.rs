//! Shared types for the turntable control core.
//!
//! - [`error`] - `TurntableError`, the common error enum for all device and
//!   protocol failures.
//! - [`consts`] - wire-protocol and physical constants shared by every device.
//! - [`math`] - the signed-angle mapping and voltage clamping helpers.
//! - [`position`] - the supervisor's `Position` value.
//! - [`config`] - `Settings` and `SettingsStore`, loaded from a flat TOML file.
//! - [`zero_point`] - `ZeroPoint` and `ZeroPointStore`, persisted as XML.
//! - [`events`] - `EventBus` and `SupervisorEvent`, the GUI publish boundary.
//! - [`periodic`] - `PeriodicJob`, the cancellable timed-task primitive.

pub mod config;
pub mod consts;
pub mod error;
pub mod events;
pub mod math;
pub mod periodic;
pub mod position;
pub mod prelude;
pub mod zero_point;
