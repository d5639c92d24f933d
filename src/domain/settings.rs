use crate::domain::models::DeviceDescriptor;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// Largest payload a one-byte length field can describe
pub const FRAME_PAYLOAD_LIMIT: usize = 255;

/// Longest speed smoothing window, in ticks
pub const MAX_SMOOTHING_WINDOW: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_false(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "remote_drive".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// How readings from several input devices become one command.
///
/// Last-writer-wins is the historical behavior: devices are sampled in
/// index order and the last present device decides the whole command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    #[default]
    LastWriterWins,
    SingleDevice { index: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSettings {
    /// Axis magnitude at or below which input is neutral
    #[serde(default = "default_deadzone")]
    pub deadzone: u16,
    #[serde(default)]
    pub merge_policy: MergePolicy,
    #[serde(default = "default_max_devices")]
    pub max_devices: usize,
    #[serde(default = "default_false")]
    pub speed_smoothing: bool,
    #[serde(default = "default_smoothing_window")]
    pub speed_smoothing_window: usize,
    /// Use a real gamepad backend when one is compiled in
    #[serde(default = "default_true")]
    pub prefer_gamepad: bool,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            deadzone: default_deadzone(),
            merge_policy: MergePolicy::default(),
            max_devices: default_max_devices(),
            speed_smoothing: default_false(),
            speed_smoothing_window: default_smoothing_window(),
            prefer_gamepad: default_true(),
        }
    }
}

fn default_deadzone() -> u16 {
    100
}
fn default_max_devices() -> usize {
    4
}
fn default_smoothing_window() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Consecutive send failures before the link is considered lost
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Connect timeout for each reconnect attempt, kept short so a tick is never held long
    #[serde(default = "default_reconnect_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            failure_threshold: default_failure_threshold(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            max_attempts: default_max_attempts(),
            connect_timeout_ms: default_reconnect_connect_timeout_ms(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    3
}
fn default_initial_backoff_ms() -> u64 {
    250
}
fn default_max_backoff_ms() -> u64 {
    8000
}
fn default_max_attempts() -> u32 {
    8
}
fn default_reconnect_connect_timeout_ms() -> u64 {
    250
}

/// Which stream connector opens the link
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// Device address is a host; channel `N` is port `port_base + N`
    #[default]
    Tcp,
    /// Device address is a serial port path already bound to the channel
    Serial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportSettings {
    #[serde(default)]
    pub link: LinkKind,
    #[serde(default = "default_channel")]
    pub channel: u8,
    #[serde(default = "default_max_payload")]
    pub max_payload: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Port of channel 0 on the stream bridge; channel N listens on `port_base + N`
    #[serde(default = "default_port_base")]
    pub port_base: u16,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    #[serde(default)]
    pub known_devices: Vec<DeviceDescriptor>,
    #[serde(default)]
    pub preferred_device: Option<String>,
    #[serde(default)]
    pub reconnect: ReconnectSettings,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            link: LinkKind::default(),
            channel: default_channel(),
            max_payload: default_max_payload(),
            connect_timeout_ms: default_connect_timeout_ms(),
            send_timeout_ms: default_send_timeout_ms(),
            port_base: default_port_base(),
            baud_rate: default_baud_rate(),
            known_devices: Vec::new(),
            preferred_device: None,
            reconnect: ReconnectSettings::default(),
        }
    }
}

impl TransportSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }
}

fn default_channel() -> u8 {
    1
}
fn default_max_payload() -> usize {
    FRAME_PAYLOAD_LIMIT
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_send_timeout_ms() -> u64 {
    50
}
fn default_port_base() -> u16 {
    7000
}
fn default_baud_rate() -> u32 {
    115_200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverSettings {
    /// Tick-rate ceiling
    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: u32,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            tick_rate_hz: default_tick_rate_hz(),
        }
    }
}

impl DriverSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate_hz.clamp(1, 1000)
    }
}

fn default_tick_rate_hz() -> u32 {
    60
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub input: InputSettings,
    #[serde(default)]
    pub transport: TransportSettings,
    #[serde(default)]
    pub driver: DriverSettings,
    #[serde(default)]
    pub log_settings: LogSettings,
}

impl Settings {
    /// Pull out-of-range values back into range
    pub fn validate(&mut self) {
        if self.transport.max_payload == 0 || self.transport.max_payload > FRAME_PAYLOAD_LIMIT {
            warn!(
                "max_payload {} out of range, using {}",
                self.transport.max_payload, FRAME_PAYLOAD_LIMIT
            );
            self.transport.max_payload = FRAME_PAYLOAD_LIMIT;
        }

        let tick_rate = self.driver.tick_rate_hz.clamp(1, 1000);
        if tick_rate != self.driver.tick_rate_hz {
            warn!(
                "tick_rate_hz {} out of range, using {}",
                self.driver.tick_rate_hz, tick_rate
            );
            self.driver.tick_rate_hz = tick_rate;
        }

        let window = self
            .input
            .speed_smoothing_window
            .clamp(1, MAX_SMOOTHING_WINDOW);
        if window != self.input.speed_smoothing_window {
            warn!(
                "speed_smoothing_window {} out of range, using {}",
                self.input.speed_smoothing_window, window
            );
            self.input.speed_smoothing_window = window;
        }

        let reconnect = &mut self.transport.reconnect;
        if reconnect.failure_threshold == 0 {
            reconnect.failure_threshold = 1;
        }
        if reconnect.initial_backoff_ms == 0 {
            reconnect.initial_backoff_ms = default_initial_backoff_ms();
        }
        if reconnect.connect_timeout_ms == 0 {
            reconnect.connect_timeout_ms = default_reconnect_connect_timeout_ms();
        }
        if reconnect.max_backoff_ms < reconnect.initial_backoff_ms {
            warn!(
                "max_backoff_ms {} below initial_backoff_ms {}",
                reconnect.max_backoff_ms, reconnect.initial_backoff_ms
            );
            reconnect.max_backoff_ms = reconnect.initial_backoff_ms;
        }
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults when it is missing or unreadable
    pub fn with_path(settings_path: PathBuf) -> Self {
        let mut settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                if settings_path.exists() {
                    warn!("Ignoring unreadable settings {:?}: {}", settings_path, e);
                }
                Settings::default()
            }
        };
        settings.validate();

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("RemoteDrive");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn add_known_device(&mut self, device: DeviceDescriptor) -> anyhow::Result<()> {
        let known = &mut self.settings.transport.known_devices;
        if !known.iter().any(|d| d.id == device.id) {
            known.push(device);
            self.save()?;
        }
        Ok(())
    }
}
