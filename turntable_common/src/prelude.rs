//! Convenience re-exports for crates that consume `turntable_common`.

pub use crate::config::{Settings, SettingsStore};
pub use crate::error::TurntableError;
pub use crate::events::{EventBus, SupervisorEvent, Telemetry};
pub use crate::math::{clamp_sort_of_three, EncoderReading};
pub use crate::periodic::PeriodicJob;
pub use crate::position::Position;
pub use crate::zero_point::{ZeroPoint, ZeroPointStore};
