//! Hardware safety watchdog timer device.
//!
//! Grounded on `original_source/Watchdog.py`. Every `trigger_period`
//! seconds the trigger bit is flipped and the resulting 4-byte command is
//! sent; any bad reply or timeout disables the watchdog. This is a
//! different concept from the process-supervision watchdog trait in the
//! reference control-unit codebase: this one rides the wire to hardware.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{error, info};
use turntable_common::consts::{
    WATCHDOG_ENABLE, WATCHDOG_OK_REPLY, WATCHDOG_STOP, WATCHDOG_TOGGLE, WATCHDOG_TRIGGER_INITIAL,
};
use turntable_common::error::TurntableError;
use turntable_common::periodic::PeriodicJob;

use crate::link::DeviceLink;

fn render_command(command: u32) -> [u8; 8] {
    let hex = format!("{command:08X}");
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(hex.as_bytes());
    bytes
}

/// The watchdog's hardware-facing state and its periodic trigger job.
pub struct Watchdog {
    link: Arc<DeviceLink>,
    trigger_period: Duration,
    trigger_command: Mutex<u32>,
    job: Mutex<Option<PeriodicJob>>,
}

impl Watchdog {
    /// Build a watchdog bound to `link`, ticking every `trigger_period`
    /// once started.
    #[must_use]
    pub fn new(link: Arc<DeviceLink>, trigger_period: Duration) -> Self {
        Self {
            link,
            trigger_period,
            trigger_command: Mutex::new(WATCHDOG_TRIGGER_INITIAL),
            job: Mutex::new(None),
        }
    }

    /// `true` if the enable bit of the current trigger command is set.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        (*self.trigger_command.lock() & WATCHDOG_ENABLE) == WATCHDOG_ENABLE
    }

    /// `true` if the underlying device link is connected.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Connect if necessary, reset the trigger command to its initial
    /// (disabled) value, and start the periodic trigger job.
    pub async fn start(self: &Arc<Self>) {
        if !self.link.is_connected() {
            info!("connecting to the watchdog timer");
            if let Err(err) = self.link.connect().await {
                error!(%err, "failed to connect to the watchdog");
                return;
            }
        }

        if self.job.lock().is_some() {
            return;
        }

        *self.trigger_command.lock() = WATCHDOG_TRIGGER_INITIAL;

        info!(period_s = self.trigger_period.as_secs_f64(), "starting the watchdog trigger job");
        let this = Arc::clone(self);
        let job = PeriodicJob::spawn(self.trigger_period, move || {
            let this = Arc::clone(&this);
            async move { this.trigger().await }
        });
        *self.job.lock() = Some(job);
    }

    /// Stop the trigger job, send [`WATCHDOG_STOP`], then disconnect.
    pub async fn stop(&self) {
        if let Some(job) = self.job.lock().take() {
            info!("stopping the watchdog trigger job");
            job.stop().await;
        }

        self.disable().await;
    }

    /// Same shutdown as `stop`, but for use from inside the trigger job's
    /// own tick: cancels the job instead of joining it, since joining here
    /// would await the very task currently executing and hang forever.
    async fn fail_from_trigger(&self) {
        if let Some(job) = self.job.lock().take() {
            job.cancel();
        }

        self.disable().await;
    }

    async fn disable(&self) {
        if !self.link.is_connected() {
            return;
        }

        *self.trigger_command.lock() = WATCHDOG_STOP;

        info!("sending the stop command to disable all watchdog outputs");
        if self.send_command(WATCHDOG_STOP).await.is_err() {
            error!("unable to disable the watchdog; it is left in an unsafe state");
        }

        info!("disconnecting from the watchdog timer");
        self.link.disconnect();
    }

    /// Flip the enable bit. Reverts and stops on a failed send.
    pub async fn toggle_enable(&self) {
        let command = {
            let mut guard = self.trigger_command.lock();
            *guard ^= WATCHDOG_ENABLE;
            *guard
        };

        if self.send_command(command).await.is_err() {
            error!("failed to toggle the watchdog enable bit; disabling");
            *self.trigger_command.lock() ^= WATCHDOG_ENABLE;
            self.stop().await;
        }
    }

    async fn trigger(&self) {
        let command = {
            let mut guard = self.trigger_command.lock();
            *guard ^= WATCHDOG_TOGGLE;
            *guard
        };

        if self.send_command(command).await.is_err() {
            error!("watchdog trigger failed; stopping");
            self.fail_from_trigger().await;
        }
    }

    async fn send_command(&self, command: u32) -> Result<(), TurntableError> {
        if !self.link.is_connected() {
            error!("not connected to the watchdog; command not sent");
            return Err(TurntableError::Disconnected("watchdog"));
        }

        let reply = self
            .link
            .send_and_receive(&render_command(command), WATCHDOG_OK_REPLY.len())
            .await?;

        if reply != WATCHDOG_OK_REPLY {
            error!("bad reply from the watchdog; stopping and disabling");
            return Err(TurntableError::BadResponse {
                device: "watchdog",
                detail: String::from_utf8_lossy(&reply).into_owned(),
            });
        }

        Ok(())
    }
}
