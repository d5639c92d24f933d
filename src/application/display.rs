//! Boundary with the window/event system and the visualization surface.
//!
//! Both sides live outside this crate; the driver only sees these traits.

use crate::domain::models::{AppEvent, ConnectionStatus, MessageSeverity};
use tokio::sync::mpsc;
use tracing::{error, info, trace, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpStatus {
    Continue,
    /// Close or destroy was requested
    Quit,
}

/// Drains pending system/UI events once per tick
pub trait EventPump {
    fn pump(&mut self) -> PumpStatus;
}

/// Running offsets handed to the visualization every tick.
///
/// They advance at a fixed pace and carry no command content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Offsets {
    pub x: i32,
    pub y: i32,
}

impl Offsets {
    pub fn advance(&mut self) {
        self.x = self.x.wrapping_add(1);
        self.y = self.y.wrapping_add(2);
    }
}

pub trait VisualizationSink {
    fn present(&mut self, offsets: Offsets);
}

/// Sink for headless runs
#[derive(Debug, Default)]
pub struct NullVisualization;

impl VisualizationSink for NullVisualization {
    fn present(&mut self, offsets: Offsets) {
        trace!("offsets x={} y={}", offsets.x, offsets.y);
    }
}

/// Pump that drains session events and logs them; never asks to quit
pub struct EventChannelPump {
    events: mpsc::UnboundedReceiver<AppEvent>,
    last_status: Option<ConnectionStatus>,
}

impl EventChannelPump {
    pub fn new(events: mpsc::UnboundedReceiver<AppEvent>) -> Self {
        Self {
            events,
            last_status: None,
        }
    }

    pub fn last_status(&self) -> Option<ConnectionStatus> {
        self.last_status
    }
}

impl EventPump for EventChannelPump {
    fn pump(&mut self) -> PumpStatus {
        while let Ok(event) = self.events.try_recv() {
            match event {
                AppEvent::ConnectionStatus(status) => {
                    if self.last_status != Some(status) {
                        info!("Link status: {:?}", status);
                    }
                    self.last_status = Some(status);
                }
                AppEvent::LogMessage(msg) => match msg.severity {
                    MessageSeverity::Error => error!("{}", msg.message),
                    MessageSeverity::Warning => warn!("{}", msg.message),
                    MessageSeverity::Info | MessageSeverity::Success => info!("{}", msg.message),
                },
            }
        }
        PumpStatus::Continue
    }
}
