//! `EventBus`: the publish boundary a future GUI or telemetry subscriber
//! would observe, mirroring `original_source` view classes subscribing to
//! controller updates instead of polling.

use tokio::sync::broadcast;

use crate::math::EncoderReading;

/// A snapshot of everything a GUI view would want to redraw after one
/// supervisor loop iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub shaft: EncoderReading,
    pub motor_voltage: f64,
    pub current_position: f64,
    pub target_position: f64,
    pub position_error: f64,
    /// `true` while the shaft encoder link is connected.
    pub shaft_connected: bool,
    /// `true` while the motor controller link is connected.
    pub motor_connected: bool,
    /// `true` while the hardware watchdog link is connected.
    pub watchdog_connected: bool,
    /// `true` while the remote command server is accepting connections.
    pub tcp_connected: bool,
}

/// Events published by the supervisor for any number of subscribers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SupervisorEvent {
    /// Devices connected and control loops are running.
    ControlsEnabled,
    /// Devices disconnected; control loops are stopped.
    ControlsDisabled,
    /// One loop iteration's worth of state, published every update tick.
    Telemetry(Telemetry),
}

/// Thin wrapper over a broadcast channel. Cloning an `EventBus` shares the
/// same underlying channel; each `subscribe()` call gets an independent
/// receiver, so a slow or absent subscriber never blocks publishing.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<SupervisorEvent>,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` unread events per
    /// subscriber before the oldest are dropped.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to future events. Events published before this call are
    /// never delivered.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.sender.subscribe()
    }

    /// Publish an event. A `SendError` (no subscribers) is swallowed —
    /// running with no GUI attached is a normal operating mode.
    pub fn publish(&self, event: SupervisorEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(SupervisorEvent::ControlsEnabled);
        assert_eq!(rx.recv().await.unwrap(), SupervisorEvent::ControlsEnabled);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(SupervisorEvent::ControlsDisabled);
    }

    #[tokio::test]
    async fn independent_subscribers_each_get_their_own_copy() {
        let bus = EventBus::default();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(SupervisorEvent::ControlsEnabled);
        assert_eq!(a.recv().await.unwrap(), SupervisorEvent::ControlsEnabled);
        assert_eq!(b.recv().await.unwrap(), SupervisorEvent::ControlsEnabled);
    }
}
