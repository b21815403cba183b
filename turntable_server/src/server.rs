//! Line-oriented remote command server.
//!
//! Grounded on `original_source/TCPServer.py`'s `CommandHandler`. Two
//! deliberate departures from the original:
//!
//! - `is_connected()` correctly reflects shutdown (the original sets
//!   `_connected = True` instead of `False` in `disconnect`, so it always
//!   reports connected once started).
//! - A `SET_AZIMUTH`/`SET_ELEVATION` on a connection cancels that
//!   connection's previous go-to-position waiter instead of leaving it
//!   running alongside the new one.
//!
//! `AZIMUTH_FOUND` is sent as the waiter's completion response for both
//! axes, matching the source exactly — this is a single-axis turntable,
//! so "elevation" is just an alias for the same position.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use turntable_common::config::SettingsStore;
use turntable_supervisor::TurntableSupervisor;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Axis {
    Azimuth,
    Elevation,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Command {
    GetPosition(Axis),
    SetPosition(Axis, f64),
    SetPositionParseFailed(Axis),
    Stop,
    Halt,
    Unknown,
}

fn parse_command(line: &str) -> Command {
    let line = line.trim();

    if line == "HALT" {
        return Command::Halt;
    }
    if line == "STOP" {
        return Command::Stop;
    }
    if line == "GET_AZIMUTH" {
        return Command::GetPosition(Axis::Azimuth);
    }
    if line == "GET_ELEVATION" {
        return Command::GetPosition(Axis::Elevation);
    }

    for (prefix, axis) in [("SET_AZIMUTH ", Axis::Azimuth), ("SET_ELEVATION ", Axis::Elevation)] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return match rest.trim().parse::<f64>() {
                Ok(value) => Command::SetPosition(axis, value),
                Err(_) => Command::SetPositionParseFailed(axis),
            };
        }
    }

    Command::Unknown
}

struct Waiter {
    cancel: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

/// Accepts remote connections and dispatches line commands against a
/// shared [`TurntableSupervisor`].
pub struct RemoteCommandServer {
    supervisor: Arc<TurntableSupervisor>,
    settings: SettingsStore,
    shutdown: Arc<Notify>,
    listening: Arc<AtomicBool>,
}

impl RemoteCommandServer {
    /// `listening` is shared with the supervisor (see
    /// [`TurntableSupervisor::tcp_connected_flag`]) so telemetry can report
    /// TCP liveness alongside the device connection flags.
    #[must_use]
    pub fn new(supervisor: Arc<TurntableSupervisor>, settings: SettingsStore, listening: Arc<AtomicBool>) -> Arc<Self> {
        Arc::new(Self {
            supervisor,
            settings,
            shutdown: Arc::new(Notify::new()),
            listening,
        })
    }

    /// `true` while the accept loop is running, matching the connection
    /// status other devices report for telemetry.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Bind `addr` and serve connections until a `HALT` command (or an
    /// external call to [`RemoteCommandServer::shutdown`]) is received.
    pub async fn run(self: Arc<Self>, addr: impl ToSocketAddrs) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener).await
    }

    /// Serve connections on an already-bound listener, useful in tests
    /// that need the bound port before the accept loop starts.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        info!(addr = %listener.local_addr()?, "remote command server listening");
        self.listening.store(true, Ordering::SeqCst);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (socket, peer) = accepted?;
                    let this = Arc::clone(&self);
                    tokio::spawn(async move { this.handle_connection(socket, peer).await });
                }
                () = self.shutdown.notified() => {
                    info!("remote command server shutting down");
                    self.listening.store(false, Ordering::SeqCst);
                    return Ok(());
                }
            }
        }
    }

    /// Trigger the same shutdown a `HALT` command would.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    async fn handle_connection(self: Arc<Self>, socket: TcpStream, peer: SocketAddr) {
        debug!(%peer, "remote command connection opened");
        let (read_half, write_half) = socket.into_split();
        let writer = Arc::new(AsyncMutex::new(write_half));
        let mut reader = BufReader::new(read_half);
        let waiter: SyncMutex<Option<Waiter>> = SyncMutex::new(None);

        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    error!(%peer, %err, "error reading from remote command connection");
                    break;
                }
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            debug!(%peer, command = trimmed, "received remote command");

            match parse_command(trimmed) {
                Command::Halt => {
                    self.supervisor.stop().await;
                    self.shutdown.notify_one();
                    break;
                }
                Command::Stop => {
                    self.supervisor.stop_motion().await;
                }
                Command::GetPosition(Axis::Azimuth) => {
                    let value = self.supervisor.current_position();
                    send_response(&writer, &format!("CURRENT_AZIMUTH {value:.3}")).await;
                }
                Command::GetPosition(Axis::Elevation) => {
                    let value = self.supervisor.current_elevation();
                    send_response(&writer, &format!("CURRENT_AZIMUTH {value:.3}")).await;
                }
                Command::SetPosition(axis, value) => {
                    self.start_waiter(&waiter, axis, value, Arc::clone(&writer));
                }
                Command::SetPositionParseFailed(axis) => {
                    error!(%peer, "unable to parse a SET_* command argument, holding current position");
                    let current = match axis {
                        Axis::Azimuth => self.supervisor.current_position(),
                        Axis::Elevation => self.supervisor.current_elevation(),
                    };
                    self.start_waiter(&waiter, axis, current, Arc::clone(&writer));
                }
                Command::Unknown => {
                    send_response(&writer, "UNKNOWN_COMMAND").await;
                }
            }
        }

        if let Some(previous) = waiter.lock().take() {
            previous.cancel.store(true, Ordering::SeqCst);
        }
        debug!(%peer, "remote command connection closed");
    }

    /// Start (or supersede) this connection's go-to-position waiter: the
    /// supervisor begins moving immediately, and once the position
    /// settles within `max_error` the connection is sent
    /// `AZIMUTH_FOUND <value>`.
    fn start_waiter(
        &self,
        waiter: &SyncMutex<Option<Waiter>>,
        axis: Axis,
        target: f64,
        writer: Arc<AsyncMutex<OwnedWriteHalf>>,
    ) {
        self.supervisor.goto_position(target);

        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_for_task = Arc::clone(&cancel);
        let supervisor = Arc::clone(&self.supervisor);
        let snapshot = self.settings.snapshot();
        let poll_delay = Duration::from_secs_f64(snapshot.tcp.poll_delay);
        let max_error = snapshot.pid.max_error;

        let task = tokio::spawn(async move {
            loop {
                if cancel_for_task.load(Ordering::SeqCst) {
                    return;
                }

                let current = match axis {
                    Axis::Azimuth => supervisor.current_position(),
                    Axis::Elevation => supervisor.current_elevation(),
                };

                if (current - target).abs() <= max_error {
                    send_response(&writer, &format!("AZIMUTH_FOUND {current:.3}")).await;
                    return;
                }

                tokio::time::sleep(poll_delay).await;
            }
        });

        if let Some(previous) = waiter.lock().replace(Waiter { cancel, task }) {
            previous.cancel.store(true, Ordering::SeqCst);
        }
    }
}

async fn send_response(writer: &Arc<AsyncMutex<OwnedWriteHalf>>, body: &str) {
    let framed = format!("\n{body}\r");
    if let Err(err) = writer.lock().await.write_all(framed.as_bytes()).await {
        error!(%err, "failed to write remote command response");
    }
}
