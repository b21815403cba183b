//! End-to-end go-to-position scenarios against fake device servers.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use turntable_common::config::SettingsStore;
use turntable_common::consts::ENCODER_POSITION_REQUEST;
use turntable_common::events::{EventBus, SupervisorEvent};
use turntable_devices::encoder::ShaftEncoder;
use turntable_devices::link::DeviceLink;
use turntable_devices::motor::MotorController;
use turntable_devices::watchdog::Watchdog;
use turntable_supervisor::TurntableSupervisor;

/// Spawn a watchdog fake that replies `OK\r\n` to every 8-byte command.
async fn spawn_fake_watchdog() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 8];
                while socket.read_exact(&mut buf).await.is_ok() {
                    if socket.write_all(b"OK\r\n").await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

/// Spawn a motor controller fake that acknowledges voltage writes with
/// `>\r` and reports whatever voltage was last written on a readback
/// query.
async fn spawn_fake_motor() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let last_voltage = Arc::new(Mutex::new(0.0f64));

    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            let last_voltage = last_voltage.clone();
            tokio::spawn(async move {
                loop {
                    let mut header = [0u8; 1];
                    if socket.read_exact(&mut header).await.is_err() {
                        return;
                    }
                    match header[0] {
                        b'#' => {
                            // "#010+NN.FFF\r" — consume address(2) + channel(1) + value(7) + CR(1)
                            let mut rest = [0u8; 11];
                            if socket.read_exact(&mut rest).await.is_err() {
                                return;
                            }
                            let value_str = std::str::from_utf8(&rest[3..10]).unwrap();
                            *last_voltage.lock().await = value_str.parse().unwrap();
                            if socket.write_all(b">\r").await.is_err() {
                                return;
                            }
                        }
                        b'$' => {
                            let mut rest = [0u8; 3];
                            if socket.read_exact(&mut rest).await.is_err() {
                                return;
                            }
                            let voltage = *last_voltage.lock().await;
                            let reply = format!("!{voltage:+07.3}\r");
                            if socket.write_all(reply.as_bytes()).await.is_err() {
                                return;
                            }
                        }
                        _ => return,
                    }
                }
            });
        }
    });
    addr
}

/// Spawn a shaft encoder fake that always reports a fixed reading.
async fn spawn_fake_encoder(revolution: u16, step: u16) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut socket, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut buf = [0u8; ENCODER_POSITION_REQUEST.len()];
                while socket.read_exact(&mut buf).await.is_ok() {
                    let [mt_h, mt_l] = revolution.to_be_bytes();
                    let [st_h, st_l] = step.to_be_bytes();
                    let lrc = 0x02 ^ mt_h ^ mt_l ^ st_h ^ st_l;
                    let packet = [0x01, 0x02, mt_h, mt_l, st_h, st_l, lrc, 0x04];
                    if socket.write_all(&packet).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

async fn build_supervisor() -> Arc<TurntableSupervisor> {
    let watchdog_addr = spawn_fake_watchdog().await;
    let motor_addr = spawn_fake_motor().await;
    let encoder_addr = spawn_fake_encoder(0, 0).await;

    let watchdog_link = Arc::new(DeviceLink::new(
        "watchdog",
        watchdog_addr.ip().to_string(),
        watchdog_addr.port(),
        Duration::from_secs(1),
    ));
    let watchdog = Arc::new(Watchdog::new(watchdog_link, Duration::from_millis(50)));

    let motor_link = Arc::new(DeviceLink::new(
        "motor",
        motor_addr.ip().to_string(),
        motor_addr.port(),
        Duration::from_secs(1),
    ));
    let motor = Arc::new(MotorController::new(
        motor_link,
        watchdog,
        -7.0,
        7.0,
        Duration::from_millis(20),
    ));

    let encoder_link = Arc::new(DeviceLink::new(
        "encoder",
        encoder_addr.ip().to_string(),
        encoder_addr.port(),
        Duration::from_secs(1),
    ));
    let encoder = Arc::new(ShaftEncoder::new(encoder_link, Duration::from_millis(20)));

    let dir = tempfile::tempdir().unwrap();
    let settings = SettingsStore::load_or_create(&dir.path().join("turntable.toml")).unwrap();
    settings.update(|s| {
        s.motor.update_period = 0.02;
        s.pid.kp = 5.0;
        s.pid.ki = 0.0;
        s.pid.kd = 0.0;
        s.pid.max_error = 0.5;
        s.pid.min_control = 1.2;
    });
    let zero_points =
        turntable_common::zero_point::ZeroPointStore::load_or_create(&dir.path().join("zero_points.xml")).unwrap();
    let events = EventBus::default();

    TurntableSupervisor::new(motor, encoder, settings, zero_points, events)
}

#[tokio::test]
async fn connect_publishes_controls_enabled() {
    let supervisor = build_supervisor().await;
    let mut events = supervisor.subscribe();

    supervisor.connect().await;

    let event = events.recv().await.unwrap();
    assert_eq!(event, SupervisorEvent::ControlsEnabled);

    supervisor.stop().await;
}

#[tokio::test]
async fn stop_motion_with_no_active_run_is_a_no_op() {
    let supervisor = build_supervisor().await;
    supervisor.connect().await;

    supervisor.stop_motion().await;
    assert_eq!(supervisor.current_position(), 0.0);

    supervisor.stop().await;
}

#[tokio::test]
async fn position_offset_can_be_set_and_reset() {
    let supervisor = build_supervisor().await;
    supervisor.connect().await;

    supervisor.set_position_offset();
    assert_eq!(supervisor.current_position(), 0.0);

    supervisor.reset_position_offset();
    assert_eq!(supervisor.current_position(), 0.0);

    supervisor.stop().await;
}

#[tokio::test]
async fn superseding_goto_cancels_the_previous_run() {
    let supervisor = build_supervisor().await;
    supervisor.connect().await;

    supervisor.goto_position(100.0);
    tokio::time::sleep(Duration::from_millis(30)).await;
    supervisor.goto_position(0.0);
    tokio::time::sleep(Duration::from_millis(30)).await;

    supervisor.stop_motion().await;
    supervisor.stop().await;
}
