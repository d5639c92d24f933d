use serde::{Deserialize, Serialize};

/// Maximum servo offset in degrees, either side of center
pub const MAX_SERVO_ANGLE: i8 = 90;

/// Motor direction as carried in the first payload byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotorDirection {
    #[default]
    Stop,
    Forward,
    Reverse,
}

impl MotorDirection {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Stop => 0x00,
            Self::Forward => 0x01,
            Self::Reverse => 0x02,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Stop),
            0x01 => Some(Self::Forward),
            0x02 => Some(Self::Reverse),
            _ => None,
        }
    }
}

/// One tick's motor/servo instruction.
///
/// Built fresh every tick and never mutated afterwards; the constructor
/// clamps the servo angle so a command can never carry a value outside
/// `-90..=90`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ControlCommand {
    direction: MotorDirection,
    servo_angle: i8,
    speed: u8,
}

impl ControlCommand {
    pub fn new(direction: MotorDirection, servo_angle: i8, speed: u8) -> Self {
        Self {
            direction,
            servo_angle: servo_angle.clamp(-MAX_SERVO_ANGLE, MAX_SERVO_ANGLE),
            speed,
        }
    }

    /// Stop, centered, zero speed
    pub fn neutral() -> Self {
        Self::default()
    }

    pub fn direction(&self) -> MotorDirection {
        self.direction
    }

    pub fn servo_angle(&self) -> i8 {
        self.servo_angle
    }

    pub fn speed(&self) -> u8 {
        self.speed
    }

    /// Always zero on the wire
    pub fn reserved(&self) -> u8 {
        0
    }
}

/// Raw per-tick reading of one input device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawState {
    /// Steering axis, full signed 16-bit range
    pub axis_x: i16,
    /// Throttle axis, positive is forward
    pub axis_y: i16,
    /// Analog trigger, 0..=255
    pub trigger: u8,
}

/// A remote device candidate reported by discovery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub address: String,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, name: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            address: address.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    ConnectionStatus(ConnectionStatus),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Error,
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_clamps_servo_angle() {
        let cmd = ControlCommand::new(MotorDirection::Forward, 127, 10);
        assert_eq!(cmd.servo_angle(), 90);

        let cmd = ControlCommand::new(MotorDirection::Reverse, -128, 10);
        assert_eq!(cmd.servo_angle(), -90);
    }

    #[test]
    fn test_direction_bytes() {
        for dir in [MotorDirection::Stop, MotorDirection::Forward, MotorDirection::Reverse] {
            assert_eq!(MotorDirection::from_byte(dir.as_byte()), Some(dir));
        }
        assert_eq!(MotorDirection::from_byte(0x03), None);
    }

    #[test]
    fn test_neutral_command() {
        let cmd = ControlCommand::neutral();
        assert_eq!(cmd.direction(), MotorDirection::Stop);
        assert_eq!(cmd.servo_angle(), 0);
        assert_eq!(cmd.speed(), 0);
        assert_eq!(cmd.reserved(), 0);
    }
}
