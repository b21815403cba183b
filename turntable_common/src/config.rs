//! Settings loading and the shared, read-mostly `SettingsStore`.
//!
//! The configuration file is a flat TOML document whose top-level tables
//! mirror spec §6's INI sections (`TurnTableController`, `MotorController`,
//! `ShaftEncoder`, `Watchdog`, `TCPServer`, `GUI`, `GENERAL`). Unknown keys
//! are ignored; a key present with the wrong type falls back to its default
//! and logs a warning, following spec §6/§7 ("Bad values: fall back to
//! default and log"). A missing file is created with defaults, mirroring
//! `original_source/ConfigurationManager.createDefaultConfigFile`.

use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// Error type for settings file I/O.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read or written.
    #[error("configuration I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file's contents are not valid TOML at all (not just a single
    /// bad field — the document itself doesn't parse).
    #[error("configuration file is not valid TOML: {0}")]
    NotToml(#[from] toml::de::Error),

    /// The default configuration failed to serialize — indicates a bug in
    /// this crate, not a user-facing condition.
    #[error("failed to serialize default configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// `[TurnTableController]` connection and PID/go-to fields.
#[derive(Debug, Clone, PartialEq)]
pub struct TurntableSettings {
    pub ip: String,
    pub timeout_s: f64,
}

/// `[MotorController]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorSettings {
    pub port: u16,
    pub min_voltage: f64,
    pub max_voltage: f64,
    pub min_voltage_step: f64,
    pub max_voltage_step: f64,
    pub voltage_step: f64,
    pub sample_period: f64,
    pub update_period: f64,
    pub min_sample_period: f64,
    pub min_update_period: f64,
}

/// `[ShaftEncoder]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EncoderSettings {
    pub port: u16,
    pub sample_period: f64,
    pub min_sample_period: f64,
}

/// `[Watchdog]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatchdogSettings {
    pub port: u16,
    pub trigger_period: f64,
    pub min_trigger_period: f64,
}

/// PID gains, part of `[TurnTableController]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidSettings {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub max_error: f64,
    pub min_control: f64,
}

/// Go-to-position bounds, part of `[TurnTableController]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GotoSettings {
    pub min: f64,
    pub max: f64,
    pub min_step: f64,
    pub max_step: f64,
}

/// `[TCPServer]`.
#[derive(Debug, Clone, PartialEq)]
pub struct TcpSettings {
    pub ip: String,
    pub port: u16,
    pub poll_delay: f64,
}

/// `[GENERAL]`.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneralSettings {
    pub encoding: String,
    pub byte_order: String,
}

/// `[GUI]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GuiSettings {
    pub update_period: f64,
}

/// The full, process-wide settings bag. Snapshotted by value at the start
/// of each loop iteration — never held across an `await`.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub turntable: TurntableSettings,
    pub motor: MotorSettings,
    pub encoder: EncoderSettings,
    pub watchdog: WatchdogSettings,
    pub pid: PidSettings,
    pub goto: GotoSettings,
    pub tcp: TcpSettings,
    pub general: GeneralSettings,
    pub gui: GuiSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            turntable: TurntableSettings {
                ip: "192.168.22.22".to_string(),
                timeout_s: 1.0,
            },
            motor: MotorSettings {
                port: crate::consts::DEFAULT_MOTOR_PORT,
                min_voltage: -7.0,
                max_voltage: 7.0,
                min_voltage_step: 1.2,
                max_voltage_step: 7.0,
                voltage_step: 0.1,
                sample_period: 0.05,
                update_period: 0.05,
                min_sample_period: 0.03,
                min_update_period: 0.03,
            },
            encoder: EncoderSettings {
                port: crate::consts::DEFAULT_ENCODER_PORT,
                sample_period: 0.05,
                min_sample_period: 0.03,
            },
            watchdog: WatchdogSettings {
                port: crate::consts::DEFAULT_WATCHDOG_PORT,
                trigger_period: 0.5,
                min_trigger_period: 0.05,
            },
            pid: PidSettings {
                kp: 1.0,
                ki: 0.1,
                kd: 0.1,
                max_error: 0.025,
                min_control: 1.2,
            },
            goto: GotoSettings {
                min: -720.0,
                max: 720.0,
                min_step: 0.05,
                max_step: 360.0,
            },
            tcp: TcpSettings {
                ip: "127.0.0.1".to_string(),
                port: crate::consts::DEFAULT_TCP_SERVER_PORT,
                poll_delay: 0.5,
            },
            general: GeneralSettings {
                encoding: "utf-8".to_string(),
                byte_order: "big".to_string(),
            },
            gui: GuiSettings { update_period: 0.1 },
        }
    }
}

impl Settings {
    /// Load settings from `path`, creating it with defaults if absent.
    ///
    /// A key present but of the wrong type falls back to its default value
    /// and logs a warning; the rest of the document is still honored.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            let defaults = Self::default();
            defaults.save(path)?;
            return Ok(defaults);
        }

        let contents = std::fs::read_to_string(path)?;
        let doc: toml::Value = contents.parse::<toml::Value>().unwrap_or_else(|e| {
            warn!("configuration file is not valid TOML, using defaults: {e}");
            toml::Value::Table(Default::default())
        });

        Ok(Self::from_lenient(&doc))
    }

    /// Reconcile a parsed TOML document into `Settings`, falling back to
    /// the default for any field that is missing or of the wrong type.
    fn from_lenient(doc: &toml::Value) -> Self {
        let defaults = Self::default();
        let tt = section(doc, "TurnTableController");
        let mc = section(doc, "MotorController");
        let se = section(doc, "ShaftEncoder");
        let wd = section(doc, "Watchdog");
        let ts = section(doc, "TCPServer");
        let gui = section(doc, "GUI");
        let gen = section(doc, "GENERAL");

        Settings {
            turntable: TurntableSettings {
                ip: get_str(tt, "ip", &defaults.turntable.ip),
                timeout_s: get_f64(tt, "timeout_s", defaults.turntable.timeout_s),
            },
            motor: MotorSettings {
                port: get_u16(mc, "port", defaults.motor.port),
                min_voltage: get_f64(mc, "min_voltage", defaults.motor.min_voltage),
                max_voltage: get_f64(mc, "max_voltage", defaults.motor.max_voltage),
                min_voltage_step: get_f64(mc, "min_voltage_step", defaults.motor.min_voltage_step),
                max_voltage_step: get_f64(mc, "max_voltage_step", defaults.motor.max_voltage_step),
                voltage_step: get_f64(mc, "voltage_step", defaults.motor.voltage_step),
                sample_period: get_f64(mc, "sample_period", defaults.motor.sample_period),
                update_period: get_f64(mc, "update_period", defaults.motor.update_period),
                min_sample_period: get_f64(mc, "min_sample_period", defaults.motor.min_sample_period),
                min_update_period: get_f64(mc, "min_update_period", defaults.motor.min_update_period),
            },
            encoder: EncoderSettings {
                port: get_u16(se, "port", defaults.encoder.port),
                sample_period: get_f64(se, "sample_period", defaults.encoder.sample_period),
                min_sample_period: get_f64(se, "min_sample_period", defaults.encoder.min_sample_period),
            },
            watchdog: WatchdogSettings {
                port: get_u16(wd, "port", defaults.watchdog.port),
                trigger_period: get_f64(wd, "trigger_period", defaults.watchdog.trigger_period),
                min_trigger_period: get_f64(wd, "min_trigger_period", defaults.watchdog.min_trigger_period),
            },
            pid: PidSettings {
                kp: get_f64(tt, "kp", defaults.pid.kp),
                ki: get_f64(tt, "ki", defaults.pid.ki),
                kd: get_f64(tt, "kd", defaults.pid.kd),
                max_error: get_f64(tt, "max_error", defaults.pid.max_error),
                min_control: get_f64(tt, "min_control", defaults.pid.min_control),
            },
            goto: GotoSettings {
                min: get_f64(tt, "goto_min", defaults.goto.min),
                max: get_f64(tt, "goto_max", defaults.goto.max),
                min_step: get_f64(tt, "goto_min_step", defaults.goto.min_step),
                max_step: get_f64(tt, "goto_max_step", defaults.goto.max_step),
            },
            tcp: TcpSettings {
                ip: get_str(ts, "ip", &defaults.tcp.ip),
                port: get_u16(ts, "port", defaults.tcp.port),
                poll_delay: get_f64(ts, "poll_delay", defaults.tcp.poll_delay),
            },
            general: GeneralSettings {
                encoding: get_str(gen, "encoding", &defaults.general.encoding),
                byte_order: get_str(gen, "byte_order", &defaults.general.byte_order),
            },
            gui: GuiSettings {
                update_period: get_f64(gui, "update_period", defaults.gui.update_period),
            },
        }
    }

    /// Serialize this configuration to `path` as TOML.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        #[derive(Serialize)]
        struct TurnTableControllerDoc<'a> {
            ip: &'a str,
            timeout_s: f64,
            kp: f64,
            ki: f64,
            kd: f64,
            max_error: f64,
            min_control: f64,
            goto_min: f64,
            goto_max: f64,
            goto_min_step: f64,
            goto_max_step: f64,
        }

        #[derive(Serialize)]
        struct Doc<'a> {
            #[serde(rename = "TurnTableController")]
            turntable_controller: TurnTableControllerDoc<'a>,
            #[serde(rename = "MotorController")]
            motor_controller: &'a MotorSettings,
            #[serde(rename = "ShaftEncoder")]
            shaft_encoder: &'a EncoderSettings,
            #[serde(rename = "Watchdog")]
            watchdog: &'a WatchdogSettings,
            #[serde(rename = "TCPServer")]
            tcp_server: &'a TcpSettings,
            #[serde(rename = "GUI")]
            gui: &'a GuiSettings,
            #[serde(rename = "GENERAL")]
            general: &'a GeneralSettings,
        }

        let doc = Doc {
            turntable_controller: TurnTableControllerDoc {
                ip: &self.turntable.ip,
                timeout_s: self.turntable.timeout_s,
                kp: self.pid.kp,
                ki: self.pid.ki,
                kd: self.pid.kd,
                max_error: self.pid.max_error,
                min_control: self.pid.min_control,
                goto_min: self.goto.min,
                goto_max: self.goto.max,
                goto_min_step: self.goto.min_step,
                goto_max_step: self.goto.max_step,
            },
            motor_controller: &self.motor,
            shaft_encoder: &self.encoder,
            watchdog: &self.watchdog,
            tcp_server: &self.tcp,
            gui: &self.gui,
            general: &self.general,
        };

        let rendered = toml::to_string_pretty(&doc)?;
        std::fs::write(path, rendered)?;
        Ok(())
    }
}

// serde derives needed only for `save`'s references above.
impl Serialize for MotorSettings {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("MotorController", 10)?;
        s.serialize_field("port", &self.port)?;
        s.serialize_field("min_voltage", &self.min_voltage)?;
        s.serialize_field("max_voltage", &self.max_voltage)?;
        s.serialize_field("min_voltage_step", &self.min_voltage_step)?;
        s.serialize_field("max_voltage_step", &self.max_voltage_step)?;
        s.serialize_field("voltage_step", &self.voltage_step)?;
        s.serialize_field("sample_period", &self.sample_period)?;
        s.serialize_field("update_period", &self.update_period)?;
        s.serialize_field("min_sample_period", &self.min_sample_period)?;
        s.serialize_field("min_update_period", &self.min_update_period)?;
        s.end()
    }
}

impl Serialize for EncoderSettings {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("ShaftEncoder", 3)?;
        s.serialize_field("port", &self.port)?;
        s.serialize_field("sample_period", &self.sample_period)?;
        s.serialize_field("min_sample_period", &self.min_sample_period)?;
        s.end()
    }
}

impl Serialize for WatchdogSettings {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Watchdog", 3)?;
        s.serialize_field("port", &self.port)?;
        s.serialize_field("trigger_period", &self.trigger_period)?;
        s.serialize_field("min_trigger_period", &self.min_trigger_period)?;
        s.end()
    }
}

impl Serialize for TcpSettings {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("TCPServer", 3)?;
        s.serialize_field("ip", &self.ip)?;
        s.serialize_field("port", &self.port)?;
        s.serialize_field("poll_delay", &self.poll_delay)?;
        s.end()
    }
}

impl Serialize for GuiSettings {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("GUI", 1)?;
        s.serialize_field("update_period", &self.update_period)?;
        s.end()
    }
}

impl Serialize for GeneralSettings {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("GENERAL", 2)?;
        s.serialize_field("encoding", &self.encoding)?;
        s.serialize_field("byte_order", &self.byte_order)?;
        s.end()
    }
}

fn section<'a>(doc: &'a toml::Value, name: &str) -> Option<&'a toml::Value> {
    doc.get(name)
}

fn get_f64(section: Option<&toml::Value>, key: &str, default: f64) -> f64 {
    match section.and_then(|s| s.get(key)) {
        None => default,
        Some(v) => v.as_float().or_else(|| v.as_integer().map(|i| i as f64)).unwrap_or_else(|| {
            warn!("configuration key '{key}' has the wrong type, using default {default}");
            default
        }),
    }
}

fn get_u16(section: Option<&toml::Value>, key: &str, default: u16) -> u16 {
    match section.and_then(|s| s.get(key)).and_then(toml::Value::as_integer) {
        None => default,
        Some(v) => u16::try_from(v).unwrap_or_else(|_| {
            warn!("configuration key '{key}' out of u16 range, using default {default}");
            default
        }),
    }
}

fn get_str(section: Option<&toml::Value>, key: &str, default: &str) -> String {
    match section.and_then(|s| s.get(key)).and_then(toml::Value::as_str) {
        Some(v) => v.to_string(),
        None => default.to_string(),
    }
}

/// Shared, cheaply-snapshotted handle to `Settings`.
///
/// Written by the settings API (a future GUI/config view); read by every
/// device and supervisor loop at the start of each iteration. Mutations
/// take effect on the next loop tick, never mid-iteration.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    inner: Arc<RwLock<Settings>>,
}

impl SettingsStore {
    /// Wrap an already-loaded `Settings` value.
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Load from `path` (creating it with defaults if absent) and wrap.
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        Ok(Self::new(Settings::load_or_create(path)?))
    }

    /// A cheap clone of the current settings, safe to hold across an
    /// entire loop iteration.
    #[must_use]
    pub fn snapshot(&self) -> Settings {
        self.inner.read().clone()
    }

    /// Apply `f` to the live settings under the write lock.
    pub fn update(&self, f: impl FnOnce(&mut Settings)) {
        f(&mut self.inner.write());
    }
}
