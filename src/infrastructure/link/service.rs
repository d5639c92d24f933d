//! Transport Session
//!
//! Owns the link lifecycle: discovery, selection, connect, framed sends,
//! reconnection and teardown.
//!
//! ```text
//! Idle → Discovering → Selecting → Connecting → Connected
//!                                              ↘ Failed(reason)
//! Connected → Reconnecting (repeated send failures) → Connected | Failed
//! ```
//!
//! Delivery is best-effort: no acknowledgment and no retransmission. A
//! failed initial connect is never retried automatically; the operator has
//! to start a fresh attempt.

use crate::domain::errors::{ConnectError, FailureReason, SessionError, TransportError};
use crate::domain::models::{
    AppEvent, ConnectionStatus, DeviceDescriptor, MessageSeverity, StatusMessage,
};
use crate::domain::settings::{ReconnectSettings, TransportSettings};
use crate::infrastructure::link::connection::{open_connection, Connection, StreamConnector};
use crate::infrastructure::link::protocol::Frame;
use crate::infrastructure::link::scanner::{select_device, DeviceChooser, DeviceDiscovery};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Discovering,
    Selecting,
    DeviceSelected(DeviceDescriptor),
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    Failed(FailureReason),
}

/// Capped exponential backoff between reconnect attempts
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
    /// Bounds each reconnect attempt, which runs inside a control tick
    pub connect_timeout: Duration,
}

impl ReconnectPolicy {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::from(&ReconnectSettings::default())
        }
    }

    /// Delay before attempt `attempt` (zero-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl From<&ReconnectSettings> for ReconnectPolicy {
    fn from(settings: &ReconnectSettings) -> Self {
        Self {
            enabled: settings.enabled,
            failure_threshold: settings.failure_threshold.max(1),
            initial_backoff: Duration::from_millis(settings.initial_backoff_ms),
            max_backoff: Duration::from_millis(settings.max_backoff_ms),
            max_attempts: settings.max_attempts,
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
        }
    }
}

/// Configuration for session behavior
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub channel: u8,
    pub connect_timeout: Duration,
    pub send_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl From<&TransportSettings> for SessionConfig {
    fn from(settings: &TransportSettings) -> Self {
        Self {
            channel: settings.channel,
            connect_timeout: settings.connect_timeout(),
            send_timeout: settings.send_timeout(),
            reconnect: ReconnectPolicy::from(&settings.reconnect),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&TransportSettings::default())
    }
}

pub struct TransportSession {
    config: SessionConfig,
    connector: Box<dyn StreamConnector>,
    state: SessionState,
    connection: Option<Connection>,
    /// Device to reconnect to after the link drops
    last_device: Option<DeviceDescriptor>,
    consecutive_failures: u32,
    next_reconnect_at: Option<Instant>,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl TransportSession {
    pub fn new(
        config: SessionConfig,
        connector: Box<dyn StreamConnector>,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            config,
            connector,
            state: SessionState::Idle,
            connection: None,
            last_device: None,
            consecutive_failures: 0,
            next_reconnect_at: None,
            event_sender,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected && self.connection.is_some()
    }

    pub fn connected_device(&self) -> Option<&DeviceDescriptor> {
        self.connection.as_ref().map(|c| &c.device)
    }

    /// Ask the discovery collaborator for nearby candidates
    pub async fn discover(
        &mut self,
        discovery: &mut dyn DeviceDiscovery,
    ) -> Result<Vec<DeviceDescriptor>, SessionError> {
        self.close_stream().await;
        self.state = SessionState::Discovering;

        match discovery.discover().await {
            Ok(candidates) => {
                info!("Discovered {} candidate device(s)", candidates.len());
                self.state = SessionState::Selecting;
                Ok(candidates)
            }
            Err(e) => {
                error!("Device discovery failed: {:#}", e);
                self.fail(FailureReason::Discovery, format!("Discovery failed: {e}"));
                Err(SessionError::Discovery(e))
            }
        }
    }

    /// Resolve the operator's choice to exactly one device
    pub fn select(
        &mut self,
        candidates: &[DeviceDescriptor],
        chosen: &[DeviceDescriptor],
    ) -> Result<DeviceDescriptor, SessionError> {
        self.state = SessionState::Selecting;
        match select_device(candidates, chosen) {
            Ok(device) => {
                self.state = SessionState::DeviceSelected(device.clone());
                Ok(device)
            }
            Err(e) => {
                warn!("Device selection failed: {}", e);
                self.fail(e.into(), format!("Selection failed: {e}"));
                Err(e.into())
            }
        }
    }

    /// Open the stream on the configured channel. Never retried on failure.
    pub async fn connect(&mut self, device: &DeviceDescriptor) -> Result<(), ConnectError> {
        self.close_stream().await;
        self.state = SessionState::Connecting;
        self.send_status(ConnectionStatus::Connecting);

        match open_connection(
            self.connector.as_mut(),
            device,
            self.config.channel,
            self.config.connect_timeout,
        )
        .await
        {
            Ok(connection) => {
                self.on_connected(connection);
                Ok(())
            }
            Err(e) => {
                self.fail(e.into(), format!("Connection failed: {e}"));
                Err(e)
            }
        }
    }

    /// Run discover → select → connect as one attempt
    pub async fn establish(
        &mut self,
        discovery: &mut dyn DeviceDiscovery,
        chooser: &mut dyn DeviceChooser,
    ) -> Result<DeviceDescriptor, SessionError> {
        let candidates = self.discover(discovery).await?;
        let chosen = chooser.choose(&candidates);
        let device = self.select(&candidates, &chosen)?;
        self.connect(&device).await?;
        Ok(device)
    }

    /// Write one frame. Partial writes are not resumed.
    pub async fn send(&mut self, frame: &Frame) -> Result<usize, TransportError> {
        if self.state != SessionState::Connected {
            return Err(TransportError::NotConnected);
        }
        let Some(connection) = self.connection.as_mut() else {
            return Err(TransportError::NotConnected);
        };

        let bytes = frame.as_bytes();
        let result =
            tokio::time::timeout(self.config.send_timeout, connection.stream.write_all(bytes))
                .await;

        let error = match result {
            Ok(Ok(())) => {
                self.consecutive_failures = 0;
                return Ok(bytes.len());
            }
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("timed out after {:?}", self.config.send_timeout),
        };

        self.consecutive_failures += 1;
        debug!(
            "Send failed ({} in a row): {}",
            self.consecutive_failures, error
        );

        let reconnect = &self.config.reconnect;
        if reconnect.enabled && self.consecutive_failures >= reconnect.failure_threshold {
            self.begin_reconnect().await;
        }

        Err(TransportError::SendFailed(error))
    }

    /// Drive a pending reconnect. Returns true once the link is back.
    pub async fn poll_reconnect(&mut self) -> bool {
        let SessionState::Reconnecting { attempt } = self.state else {
            return false;
        };
        if self
            .next_reconnect_at
            .is_some_and(|at| Instant::now() < at)
        {
            return false;
        }
        let Some(device) = self.last_device.clone() else {
            self.fail(ConnectError::Unknown.into(), "No device to reconnect to".into());
            return false;
        };

        info!("Reconnect attempt {} to {}", attempt + 1, device.address);
        match open_connection(
            self.connector.as_mut(),
            &device,
            self.config.channel,
            self.config.reconnect.connect_timeout,
        )
        .await
        {
            Ok(connection) => {
                self.on_connected(connection);
                true
            }
            Err(e) => {
                let attempt = attempt + 1;
                if attempt >= self.config.reconnect.max_attempts {
                    error!("Giving up reconnecting after {} attempts", attempt);
                    self.fail(e.into(), format!("Reconnect failed: {e}"));
                } else {
                    let delay = self.config.reconnect.delay_for(attempt);
                    debug!("Next reconnect attempt in {:?}", delay);
                    self.state = SessionState::Reconnecting { attempt };
                    self.next_reconnect_at = Some(Instant::now() + delay);
                }
                false
            }
        }
    }

    /// Release the stream and return to idle. Safe from any state, any number of times.
    pub async fn teardown(&mut self) {
        let was_linked = self.connection.is_some()
            || matches!(self.state, SessionState::Reconnecting { .. });

        self.close_stream().await;
        self.last_device = None;
        self.next_reconnect_at = None;
        self.consecutive_failures = 0;
        self.state = SessionState::Idle;

        if was_linked {
            info!("Transport session torn down");
            self.send_log("Disconnected from device", MessageSeverity::Info);
            self.send_status(ConnectionStatus::Disconnected);
        }
    }

    fn on_connected(&mut self, connection: Connection) {
        info!(
            "Connected to {} on channel {}",
            connection.device.name, connection.channel
        );
        self.send_log(
            &format!("Connected to {}", connection.device.name),
            MessageSeverity::Success,
        );
        self.last_device = Some(connection.device.clone());
        self.connection = Some(connection);
        self.consecutive_failures = 0;
        self.next_reconnect_at = None;
        self.state = SessionState::Connected;
        self.send_status(ConnectionStatus::Connected);
    }

    async fn begin_reconnect(&mut self) {
        warn!(
            "Link lost after {} consecutive send failures, reconnecting",
            self.consecutive_failures
        );
        self.close_stream().await;
        self.consecutive_failures = 0;
        self.state = SessionState::Reconnecting { attempt: 0 };
        self.next_reconnect_at = Some(Instant::now() + self.config.reconnect.delay_for(0));
        self.send_log("Link lost, reconnecting...", MessageSeverity::Warning);
        self.send_status(ConnectionStatus::Reconnecting);
    }

    async fn close_stream(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            let _ = tokio::time::timeout(self.config.send_timeout, connection.stream.shutdown())
                .await;
            debug!("Closed stream to {}", connection.device.address);
        }
    }

    fn fail(&mut self, reason: FailureReason, message: String) {
        self.connection = None;
        self.next_reconnect_at = None;
        self.state = SessionState::Failed(reason);
        self.send_log(&message, MessageSeverity::Error);
        self.send_status(ConnectionStatus::Error);
    }

    fn send_status(&self, status: ConnectionStatus) {
        let _ = self.event_sender.send(AppEvent::ConnectionStatus(status));
    }

    fn send_log(&self, message: &str, severity: MessageSeverity) {
        let _ = self
            .event_sender
            .send(AppEvent::LogMessage(StatusMessage::new(message, severity)));
    }
}
