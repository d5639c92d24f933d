//! Input backends
//!
//! The "present" backend reads real gamepads through gilrs when the
//! `gamepad` feature is compiled in. The "absent" backend reports every
//! device as disconnected so the loop keeps running and sends neutral
//! commands.

use crate::domain::controller::InputBackend;
use crate::domain::models::RawState;
use tracing::{info, warn};

/// Backend used when no input subsystem is available
#[derive(Debug, Default)]
pub struct AbsentBackend;

impl InputBackend for AbsentBackend {
    fn device_count(&self) -> usize {
        0
    }

    fn sample(&mut self, _index: usize) -> Option<RawState> {
        None
    }
}

/// Convert a normalized axis value (-1.0..=1.0) to the signed 16-bit range
pub fn axis_to_i16(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16
}

/// Convert a normalized trigger value (0.0..=1.0) to 0..=255
pub fn trigger_to_u8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(feature = "gamepad")]
pub use gamepad::GilrsBackend;

#[cfg(feature = "gamepad")]
mod gamepad {
    use super::{axis_to_i16, trigger_to_u8};
    use crate::domain::controller::InputBackend;
    use crate::domain::models::RawState;
    use gilrs::{Axis, Button, Gilrs};
    use tracing::trace;

    /// Gamepads via gilrs: left stick steers and throttles, right trigger sets speed
    pub struct GilrsBackend {
        gilrs: Gilrs,
    }

    impl GilrsBackend {
        pub fn new() -> anyhow::Result<Self> {
            let gilrs = Gilrs::new().map_err(|e| anyhow::anyhow!("gilrs init failed: {}", e))?;
            Ok(Self { gilrs })
        }
    }

    impl InputBackend for GilrsBackend {
        fn device_count(&self) -> usize {
            self.gilrs.gamepads().count()
        }

        fn sample(&mut self, index: usize) -> Option<RawState> {
            let (_, gamepad) = self.gilrs.gamepads().nth(index)?;
            if !gamepad.is_connected() {
                return None;
            }

            let trigger = gamepad
                .button_data(Button::RightTrigger2)
                .map(|data| data.value())
                .unwrap_or(0.0);

            Some(RawState {
                axis_x: axis_to_i16(gamepad.value(Axis::LeftStickX)),
                axis_y: axis_to_i16(gamepad.value(Axis::LeftStickY)),
                trigger: trigger_to_u8(trigger),
            })
        }

        fn refresh(&mut self) {
            while let Some(event) = self.gilrs.next_event() {
                trace!("Gamepad event: {:?}", event.event);
            }
        }
    }
}

/// Pick the input backend once at startup
pub fn create_backend(prefer_gamepad: bool) -> Box<dyn InputBackend> {
    if prefer_gamepad {
        #[cfg(feature = "gamepad")]
        {
            match GilrsBackend::new() {
                Ok(backend) => {
                    info!("Using gamepad input backend");
                    return Box::new(backend);
                }
                Err(e) => warn!("Gamepad backend unavailable: {}", e),
            }
        }

        #[cfg(not(feature = "gamepad"))]
        {
            warn!("Gamepad support not compiled in");
        }
    }

    info!("Using absent input backend, commands will stay neutral");
    Box::new(AbsentBackend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_backend_reports_nothing() {
        let mut backend = AbsentBackend;
        assert_eq!(backend.device_count(), 0);
        assert_eq!(backend.sample(0), None);
    }

    #[test]
    fn test_axis_conversion() {
        assert_eq!(axis_to_i16(0.0), 0);
        assert_eq!(axis_to_i16(1.0), 32767);
        assert_eq!(axis_to_i16(-1.0), -32767);
        assert_eq!(axis_to_i16(3.0), 32767);
    }

    #[test]
    fn test_trigger_conversion() {
        assert_eq!(trigger_to_u8(0.0), 0);
        assert_eq!(trigger_to_u8(1.0), 255);
        assert_eq!(trigger_to_u8(0.5), 128);
        assert_eq!(trigger_to_u8(-0.2), 0);
    }

    #[cfg(not(feature = "gamepad"))]
    #[test]
    fn test_factory_falls_back_to_absent() {
        let backend = create_backend(true);
        assert_eq!(backend.device_count(), 0);
    }
}
