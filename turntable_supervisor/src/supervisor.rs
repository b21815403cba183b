//! `TurntableSupervisor`: connects/disconnects the devices, tracks
//! position, and runs the PID go-to-position loop.
//!
//! Grounded on `original_source/TurnTableController.py`. One behavioral
//! change from the original: a new go-to-position request cancels any
//! run already in flight instead of leaving it racing in the background
//! against a shared stop flag — the original's `_stopTurnTableEvent` is
//! shared across every `gotoPosition` thread it ever spawns, so two
//! overlapping requests fight over the same motor voltage. Here, the
//! second request simply wins and the first is cancelled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::info;
use turntable_common::config::SettingsStore;
use turntable_common::events::{EventBus, SupervisorEvent, Telemetry};
use turntable_common::periodic::PeriodicJob;
use turntable_common::position::Position;
use turntable_common::zero_point::ZeroPointStore;
use turntable_devices::encoder::ShaftEncoder;
use turntable_devices::motor::MotorController;

use crate::pid::{pid_compute, PidGains, PidState};

struct GotoRun {
    cancel: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Orchestrates the motor controller, shaft encoder, and go-to-position
/// control loop. Shared across the remote command server and (in the
/// original) a GUI; here, across the remote command server and the
/// periodic telemetry publisher.
pub struct TurntableSupervisor {
    motor: Arc<MotorController>,
    encoder: Arc<ShaftEncoder>,
    settings: SettingsStore,
    zero_points: ZeroPointStore,
    events: EventBus,
    position: RwLock<Position>,
    goto: Mutex<Option<GotoRun>>,
    gui_job: Mutex<Option<PeriodicJob>>,
    tcp_connected: Arc<AtomicBool>,
}

impl TurntableSupervisor {
    #[must_use]
    pub fn new(
        motor: Arc<MotorController>,
        encoder: Arc<ShaftEncoder>,
        settings: SettingsStore,
        zero_points: ZeroPointStore,
        events: EventBus,
    ) -> Arc<Self> {
        let offset = zero_points.active_offset();
        Arc::new(Self {
            motor,
            encoder,
            settings,
            zero_points,
            events,
            position: RwLock::new(Position {
                offset,
                ..Position::default()
            }),
            goto: Mutex::new(None),
            gui_job: Mutex::new(None),
            tcp_connected: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The shared flag the remote command server flips while its accept
    /// loop is running, so telemetry can report TCP liveness alongside the
    /// device connection flags.
    #[must_use]
    pub fn tcp_connected_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.tcp_connected)
    }

    /// A subscription to this supervisor's published events.
    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SupervisorEvent> {
        self.events.subscribe()
    }

    /// Start publishing periodic telemetry. Distinct from `connect`,
    /// matching `TurnTableController.start` vs `.connect` in the original:
    /// telemetry publication and device connection are independent
    /// lifecycle steps there.
    pub fn start(self: &Arc<Self>) {
        self.start_gui_updates();
    }

    /// Connect the motor controller (which starts its watchdog) and the
    /// shaft encoder. Publishes [`SupervisorEvent::ControlsEnabled`] once
    /// every device is up.
    pub async fn connect(self: &Arc<Self>) {
        self.motor.start().await;
        self.encoder.start().await;

        if self.motor.is_watchdog_connected() && self.motor.is_connected() && self.encoder.is_connected() {
            self.events.publish(SupervisorEvent::ControlsEnabled);
        }
    }

    /// Stop any in-flight go-to-position run, stop both devices, and stop
    /// telemetry publishing.
    pub async fn disconnect(self: &Arc<Self>) {
        self.stop_motion().await;
        self.motor.stop().await;
        self.encoder.stop().await;
        self.stop_gui_updates().await;
        self.events.publish(SupervisorEvent::ControlsDisabled);
    }

    /// `stopMotion` then `disconnect`, matching `TurnTableController.stop`.
    pub async fn stop(self: &Arc<Self>) {
        info!("stopping turntable supervisor");
        self.disconnect().await;
        info!("turntable supervisor stopped");
    }

    /// Cancel any in-flight go-to-position run and zero the motor voltage
    /// if it is nonzero.
    pub async fn stop_motion(&self) {
        if let Some(run) = self.goto.lock().take() {
            run.cancel.store(true, Ordering::SeqCst);
            let _ = run.task.await;
        }

        if self.motor.current_voltage() != 0.0 {
            self.reset_motor_voltage().await;
        }
    }

    /// Toggle the watchdog enable bit off if on, then zero the voltage.
    pub async fn reset_motor_voltage(&self) {
        if self.motor.is_enabled() {
            self.motor.toggle_enable().await;
        }
        self.motor.set_voltage(0.0).await;
    }

    /// Set the zero-point offset to cancel out the current shaft angle,
    /// so the displayed position becomes zero.
    pub fn set_position_offset(&self) {
        self.position.write().offset = -self.encoder.current_angle();
    }

    /// Clear the zero-point offset back to zero.
    pub fn reset_position_offset(&self) {
        self.position.write().offset = 0.0;
    }

    /// Refresh `position.current` from the shaft encoder and return the
    /// displayed (offset-adjusted) position.
    #[must_use]
    pub fn current_position(&self) -> f64 {
        let angle = self.encoder.current_angle();
        let mut position = self.position.write();
        position.current = angle;
        position.displayed()
    }

    /// Azimuth and elevation alias the same single-axis position, as in
    /// the source device (a turntable has one axis).
    #[must_use]
    pub fn current_elevation(&self) -> f64 {
        self.current_position()
    }

    /// Start a go-to-position run toward `target`, cancelling any run
    /// already in flight.
    pub fn goto_position(self: &Arc<Self>, target: f64) {
        self.position.write().target = target;

        let cancel = Arc::new(AtomicBool::new(false));
        let this = Arc::clone(self);
        let cancel_for_task = cancel.clone();
        let task = tokio::spawn(async move { this.run_goto(target, cancel_for_task).await });

        if let Some(previous) = self.goto.lock().replace(GotoRun { cancel, task }) {
            previous.cancel.store(true, Ordering::SeqCst);
        }
    }

    /// `step_position(delta)` issues a go-to-position request for
    /// `current_position() + delta`. `delta` is always explicit here,
    /// never an implicit instance field as in the Python original.
    pub fn step_position(self: &Arc<Self>, delta: f64) {
        let target = self.current_position() + delta;
        self.goto_position(target);
    }

    async fn run_goto(self: Arc<Self>, target: f64, cancel: Arc<AtomicBool>) {
        if !self.motor.is_enabled() {
            self.motor.toggle_enable().await;
        }

        let mut state = PidState::default();

        loop {
            if cancel.load(Ordering::SeqCst) {
                break;
            }

            let settings = self.settings.snapshot();
            let error = {
                let angle = self.encoder.current_angle();
                let mut position = self.position.write();
                position.current = angle;
                position.target = target;
                position.error()
            };

            if error.abs() < settings.pid.max_error {
                break;
            }

            let gains = PidGains {
                kp: settings.pid.kp,
                ki: settings.pid.ki,
                kd: settings.pid.kd,
                max_voltage: settings.motor.max_voltage,
                min_control: settings.pid.min_control,
            };
            let signal = pid_compute(&mut state, &gains, error, settings.motor.update_period);
            self.motor.set_voltage(signal).await;

            tokio::time::sleep(Duration::from_secs_f64(settings.motor.update_period)).await;
        }

        self.motor.set_voltage(0.0).await;
        if self.motor.is_enabled() {
            self.motor.toggle_enable().await;
        }
    }

    fn start_gui_updates(self: &Arc<Self>) {
        if self.gui_job.lock().is_some() {
            return;
        }
        let period = Duration::from_secs_f64(self.settings.snapshot().gui.update_period);
        let this = Arc::clone(self);
        let job = PeriodicJob::spawn(period, move || {
            let this = Arc::clone(&this);
            async move { this.publish_telemetry() }
        });
        *self.gui_job.lock() = Some(job);
    }

    async fn stop_gui_updates(&self) {
        if let Some(job) = self.gui_job.lock().take() {
            job.stop().await;
        }
    }

    fn publish_telemetry(&self) {
        let position = *self.position.read();
        let telemetry = Telemetry {
            shaft: self.encoder.current_reading(),
            motor_voltage: self.motor.current_voltage(),
            current_position: position.displayed(),
            target_position: position.target,
            position_error: position.error(),
            shaft_connected: self.encoder.is_connected(),
            motor_connected: self.motor.is_connected(),
            watchdog_connected: self.motor.is_watchdog_connected(),
            tcp_connected: self.tcp_connected.load(Ordering::SeqCst),
        };
        self.events.publish(SupervisorEvent::Telemetry(telemetry));
    }

    /// Create a new zero point at the current offset and select it,
    /// matching `TurnTableController.saveZeroPosition`.
    pub fn save_zero_position(&self, name: &str) -> Result<(), turntable_common::zero_point::ZeroPointError> {
        let offset = self.position.read().offset;
        self.zero_points.create(name, offset)?;
        Ok(())
    }

    /// Select zero point `index` and adopt its offset, matching
    /// `TurnTableController.loadZeroPosition`.
    pub fn load_zero_position(&self, index: usize) -> Result<(), turntable_common::zero_point::ZeroPointError> {
        self.zero_points.select(index)?;
        self.position.write().offset = self.zero_points.active_offset();
        Ok(())
    }
}
