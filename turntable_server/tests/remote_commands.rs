//! End-to-end remote command scenarios against fake device servers and a
//! real TCP client connection to the command server itself.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use turntable_common::config::SettingsStore;
use turntable_common::consts::ENCODER_POSITION_REQUEST;
use turntable_common::events::EventBus;
use turntable_common::zero_point::ZeroPointStore;
use turntable_devices::encoder::ShaftEncoder;
use turntable_devices::link::DeviceLink;
use turntable_devices::motor::MotorController;
use turntable_devices::watchdog::Watchdog;
use turntable_server::RemoteCommandServer;
use turntable_supervisor::TurntableSupervisor;

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

/// A fake encoder whose reading stays fixed at zero, so a `SET_AZIMUTH 0`
/// waiter settles almost immediately.
async fn spawn_fake_encoder() -> std::net::SocketAddr {
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
                    let packet = [0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x02, 0x04];
                    if socket.write_all(&packet).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

async fn build_server() -> (Arc<RemoteCommandServer>, std::net::SocketAddr) {
    let watchdog_addr = spawn_fake_watchdog().await;
    let motor_addr = spawn_fake_motor().await;
    let encoder_addr = spawn_fake_encoder().await;

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
        s.tcp.poll_delay = 0.02;
    });
    let zero_points = ZeroPointStore::load_or_create(&dir.path().join("zero_points.xml")).unwrap();
    let events = EventBus::default();

    let supervisor = TurntableSupervisor::new(motor, encoder, settings.clone(), zero_points, events);
    supervisor.connect().await;
    supervisor.start();

    let server = RemoteCommandServer::new(Arc::clone(&supervisor), settings, supervisor.tcp_connected_flag());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let bind_addr = listener.local_addr().unwrap();

    let server_for_run = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = server_for_run.serve(listener).await;
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    (server, bind_addr)
}

/// Responses are framed as `'\n' + body + '\r'` (matching the original
/// wire format, which a telnet client displays as a blank line followed
/// by the body) rather than being newline-terminated, so read up to the
/// trailing `\r` instead of using `read_line`.
async fn read_one_response(stream: &mut TcpStream) -> String {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    reader.read_until(b'\r', &mut buf).await.unwrap();
    String::from_utf8(buf).unwrap()
}

#[tokio::test]
async fn get_azimuth_reports_current_position() {
    let (_server, addr) = build_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"GET_AZIMUTH\n").await.unwrap();

    let response = read_one_response(&mut client).await;
    assert!(response.contains("CURRENT_AZIMUTH"), "got {response:?}");
}

#[tokio::test]
async fn set_azimuth_eventually_reports_azimuth_found() {
    let (_server, addr) = build_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"SET_AZIMUTH 0.000\n").await.unwrap();

    let response = tokio::time::timeout(Duration::from_secs(2), read_one_response(&mut client))
        .await
        .expect("waiter should reply before the timeout elapses");
    assert!(response.contains("AZIMUTH_FOUND"), "got {response:?}");
}

#[tokio::test]
async fn unknown_command_gets_an_explicit_reply() {
    let (_server, addr) = build_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"PLAY_MUSIC\n").await.unwrap();

    let response = read_one_response(&mut client).await;
    assert!(response.contains("UNKNOWN_COMMAND"), "got {response:?}");
}

#[tokio::test]
async fn halt_stops_the_server_from_accepting_new_connections() {
    let (server, addr) = build_server().await;
    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"HALT\n").await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(TcpStream::connect(addr).await.is_err());
    drop(server);
}
