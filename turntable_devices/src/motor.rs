//! Motor controller device: holds the commanded voltage, owns the
//! hardware watchdog that must be running before any voltage is applied.
//!
//! Grounded on `original_source/MotorControllerModel.py`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, info};
use turntable_common::consts::{MOTOR_ADDRESS, MOTOR_CHANNEL, MOTOR_OK_REPLY};
use turntable_common::error::TurntableError;
use turntable_common::math::clamp_sort_of_three;
use turntable_common::periodic::PeriodicJob;

use crate::link::DeviceLink;
use crate::watchdog::Watchdog;

/// Mirrors `original_source/MotorControllerModel.py`'s `MotorState` enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorState {
    RampingUp,
    RampingDown,
    Running,
    Stopped,
}

impl MotorState {
    /// `Running` if `|target_voltage| > minimum_voltage`, else `Stopped`.
    #[must_use]
    pub fn from_target_voltage(target_voltage: f64, minimum_voltage: f64) -> Self {
        if target_voltage.abs() > minimum_voltage {
            MotorState::Running
        } else {
            MotorState::Stopped
        }
    }
}

fn read_voltage_command() -> Vec<u8> {
    format!("${MOTOR_ADDRESS}8{MOTOR_CHANNEL}\r").into_bytes()
}

fn write_voltage_command(voltage: f64) -> Vec<u8> {
    format!("#{MOTOR_ADDRESS}{MOTOR_CHANNEL}{voltage:+07.3}\r").into_bytes()
}

struct Bounds {
    min_voltage: f64,
    max_voltage: f64,
}

/// The motor controller's current voltage and ramping job.
pub struct MotorController {
    link: Arc<DeviceLink>,
    watchdog: Arc<Watchdog>,
    bounds: RwLock<Bounds>,
    current_voltage: RwLock<f64>,
    state: RwLock<MotorState>,
    update_period: Duration,
    job: Mutex<Option<PeriodicJob>>,
}

impl MotorController {
    #[must_use]
    pub fn new(
        link: Arc<DeviceLink>,
        watchdog: Arc<Watchdog>,
        min_voltage: f64,
        max_voltage: f64,
        update_period: Duration,
    ) -> Self {
        Self {
            link,
            watchdog,
            bounds: RwLock::new(Bounds { min_voltage, max_voltage }),
            current_voltage: RwLock::new(0.0),
            state: RwLock::new(MotorState::Stopped),
            update_period,
            job: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn current_voltage(&self) -> f64 {
        *self.current_voltage.read()
    }

    #[must_use]
    pub fn state(&self) -> MotorState {
        *self.state.read()
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    #[must_use]
    pub fn is_watchdog_connected(&self) -> bool {
        self.watchdog.is_connected()
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.watchdog.is_enabled()
    }

    /// Connect, zero the voltage, start the watchdog, and start the
    /// periodic voltage-readback job.
    pub async fn start(self: &Arc<Self>) {
        if !self.link.is_connected() {
            info!("connecting to the motor controller");
            if let Err(err) = self.link.connect().await {
                error!(%err, "failed to connect to the motor controller");
                return;
            }
        }

        info!("motor controller is connected, starting the watchdog timer");
        self.set_voltage(0.0).await;
        self.watchdog.start().await;

        if self.job.lock().is_some() {
            return;
        }

        info!("starting the motor controller voltage update job");
        let this = Arc::clone(self);
        let job = PeriodicJob::spawn(self.update_period, move || {
            let this = Arc::clone(&this);
            async move { this.update_current_voltage().await }
        });
        *self.job.lock() = Some(job);
    }

    /// Zero the voltage, stop the update job, stop the watchdog, and
    /// disconnect.
    pub async fn stop(&self) {
        if !self.link.is_connected() {
            return;
        }

        self.set_voltage(0.0).await;

        if let Some(job) = self.job.lock().take() {
            info!("stopping the motor controller voltage update job");
            job.stop().await;
        }

        info!("stopping the watchdog timer");
        self.watchdog.stop().await;

        info!("disconnecting from the motor controller");
        self.link.disconnect();
    }

    /// Same shutdown as `stop`, but for use from inside the voltage-update
    /// job's own tick: cancels the job instead of joining it, and sends the
    /// zero-voltage command directly rather than through `set_voltage`
    /// (which would itself call `stop` on a bad reply and recurse into the
    /// same job-joining hazard).
    async fn fail_from_update(&self) {
        if let Some(job) = self.job.lock().take() {
            job.cancel();
        }

        let command = write_voltage_command(0.0);
        let _ = self.link.send_and_receive(&command, MOTOR_OK_REPLY.len()).await;
        *self.current_voltage.write() = 0.0;
        *self.state.write() = MotorState::Stopped;

        info!("stopping the watchdog timer");
        self.watchdog.stop().await;

        info!("disconnecting from the motor controller");
        self.link.disconnect();
    }

    /// Immediately disable the watchdog and drop the connection, bypassing
    /// the normal zero-voltage ramp-down. Only effective if both the
    /// motor controller and watchdog links are currently connected.
    pub async fn emergency_stop(&self) {
        if self.is_watchdog_connected() && self.is_connected() {
            self.watchdog.stop().await;
            self.link.disconnect();
        }
    }

    /// Flip the watchdog's enable bit, if the watchdog is connected.
    pub async fn toggle_enable(&self) {
        if !self.is_watchdog_connected() {
            debug!("watchdog is not connected");
            return;
        }
        self.watchdog.toggle_enable().await;
    }

    /// Clamp `new_voltage` into `[min_voltage, max_voltage]` and send it.
    /// A bad or missing reply stops the motor controller.
    pub async fn set_voltage(&self, new_voltage: f64) {
        if !self.is_connected() {
            debug!("motor controller is not connected");
            return;
        }

        let bounds = self.bounds.read();
        let clamped = clamp_sort_of_three(bounds.min_voltage, new_voltage, bounds.max_voltage);
        drop(bounds);

        let command = write_voltage_command(clamped);
        match self.link.send_and_receive(&command, MOTOR_OK_REPLY.len()).await {
            Ok(reply) if reply == MOTOR_OK_REPLY.as_bytes() => {
                *self.current_voltage.write() = clamped;
                *self.state.write() = MotorState::from_target_voltage(clamped, 0.0);
            }
            _ => {
                error!("bad response received from the motor controller");
                self.stop().await;
                *self.state.write() = MotorState::Stopped;
            }
        }
    }

    async fn update_current_voltage(&self) {
        let command = read_voltage_command();
        // `!` + 7-char signed, zero-padded voltage (matching the write
        // command's own `{:+07.3}` framing) + trailing `\r`.
        let reply_len = 1 + 7 + 1;
        match self.link.send_and_receive(&command, reply_len).await {
            Ok(reply) if reply.first() == Some(&b'!') && reply.last() == Some(&b'\r') => {
                if let Ok(text) = std::str::from_utf8(&reply[1..reply.len() - 1]) {
                    if let Ok(voltage) = text.parse::<f64>() {
                        *self.current_voltage.write() = voltage;
                        return;
                    }
                }
                error!("unable to parse voltage readback from the motor controller");
            }
            _ => {
                error!("bad response received from the motor controller on voltage readback");
                self.fail_from_update().await;
            }
        }
    }
}
