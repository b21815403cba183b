//! Common error type shared by device links, protocols, and stores.

use thiserror::Error;

/// Error kinds produced anywhere in the turntable control core.
///
/// See spec §7 for the propagation policy for each variant: `Timeout` and
/// `BadResponse` drive a device's own `stop()`; `ValidationFailed` is
/// logged and the sample is skipped; `OutOfRange` is a silent clamp;
/// `ParseError` falls back to the current position; `Disconnected` is a
/// no-op write with a log line.
#[derive(Debug, Error)]
pub enum TurntableError {
    /// A `DeviceLink` call did not complete within the configured timeout.
    #[error("timed out waiting for a response from {0}")]
    Timeout(&'static str),

    /// A device replied, but not with the expected bytes.
    #[error("bad response from {device}: {detail}")]
    BadResponse {
        device: &'static str,
        detail: String,
    },

    /// An encoder packet failed its LRC or validity-mask check.
    #[error("encoder packet failed validation")]
    ValidationFailed,

    /// A value was clamped into range; carried only for logging purposes.
    #[error("{field} out of range, clamped to {clamped}")]
    OutOfRange { field: &'static str, clamped: f64 },

    /// A configuration key was absent or malformed; the caller should fall
    /// back to its default.
    #[error("configuration key missing or invalid: {0}")]
    ConfigMissing(String),

    /// A remote command's numeric argument failed to parse.
    #[error("failed to parse remote command argument: {0}")]
    ParseError(String),

    /// An operation was attempted on a link that is not connected.
    #[error("{0} is not connected")]
    Disconnected(&'static str),

    /// Underlying I/O failure (connect/read/write).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
