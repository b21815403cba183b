//! Device links for the three pieces of serial-over-TCP hardware the
//! control core drives.
//!
//! - [`link`] - `DeviceLink`, the shared reconnectable TCP transport.
//! - [`watchdog`] - the hardware safety timer.
//! - [`encoder`] - the absolute shaft position sensor.
//! - [`motor`] - the motor controller, which owns a [`watchdog::Watchdog`].

pub mod encoder;
pub mod link;
pub mod motor;
pub mod watchdog;
