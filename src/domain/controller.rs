//! Input Sampler
//!
//! Turns raw input-device readings into a bounded [`ControlCommand`].

use crate::domain::models::{ControlCommand, MotorDirection, RawState, MAX_SERVO_ANGLE};
use crate::domain::settings::{InputSettings, MergePolicy, MAX_SMOOTHING_WINDOW};
use std::collections::VecDeque;
use tracing::trace;

/// Full-scale magnitude of a signed 16-bit axis
pub const AXIS_MAX: f64 = 32767.0;

/// Source of raw input readings.
///
/// Chosen once at startup and never swapped while the loop runs.
pub trait InputBackend {
    /// Number of device slots worth querying
    fn device_count(&self) -> usize;

    /// Read one device. `None` means absent or disconnected, which is not an error.
    fn sample(&mut self, index: usize) -> Option<RawState>;

    /// Pull pending backend events before a round of sampling
    fn refresh(&mut self) {}
}

/// Steering angle for an axis reading. The deadzone is exclusive.
pub fn map_servo_angle(axis_x: i16, deadzone: u16) -> i8 {
    let axis = i32::from(axis_x);
    if axis.abs() <= i32::from(deadzone) {
        return 0;
    }

    let degrees = (f64::from(axis) / AXIS_MAX * f64::from(MAX_SERVO_ANGLE)).round();
    degrees.clamp(-f64::from(MAX_SERVO_ANGLE), f64::from(MAX_SERVO_ANGLE)) as i8
}

pub fn map_direction(axis_y: i16, deadzone: u16) -> MotorDirection {
    let axis = i32::from(axis_y);
    let deadzone = i32::from(deadzone);
    if axis > deadzone {
        MotorDirection::Forward
    } else if axis < -deadzone {
        MotorDirection::Reverse
    } else {
        MotorDirection::Stop
    }
}

/// Map one reading with the trigger passed straight through as speed
pub fn map_command(state: &RawState, deadzone: u16) -> ControlCommand {
    ControlCommand::new(
        map_direction(state.axis_y, deadzone),
        map_servo_angle(state.axis_x, deadzone),
        state.trigger,
    )
}

/// Moving average over the last few trigger values
#[derive(Debug)]
pub struct SpeedSmoother {
    window: usize,
    samples: VecDeque<u8>,
}

impl SpeedSmoother {
    pub fn new(window: usize) -> Self {
        let window = window.clamp(1, MAX_SMOOTHING_WINDOW);
        Self {
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    pub fn push(&mut self, speed: u8) -> u8 {
        self.samples.push_back(speed);
        while self.samples.len() > self.window {
            self.samples.pop_front();
        }

        let sum: u32 = self.samples.iter().map(|&s| u32::from(s)).sum();
        let count = self.samples.len() as u32;
        // rounded integer mean, always within 0..=255
        ((sum + count / 2) / count) as u8
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}

pub struct InputSampler {
    settings: InputSettings,
    smoother: Option<SpeedSmoother>,
}

impl InputSampler {
    pub fn new(settings: InputSettings) -> Self {
        let smoother = settings
            .speed_smoothing
            .then(|| SpeedSmoother::new(settings.speed_smoothing_window));
        Self { settings, smoother }
    }

    /// Merge raw readings into one state according to the merge policy
    pub fn merge(&self, readings: &[(usize, RawState)]) -> Option<RawState> {
        match self.settings.merge_policy {
            MergePolicy::LastWriterWins => readings.last().map(|(_, state)| *state),
            MergePolicy::SingleDevice { index } => readings
                .iter()
                .find(|(i, _)| *i == index)
                .map(|(_, state)| *state),
        }
    }

    /// Sample every device slot and build this tick's command.
    ///
    /// With no device present the neutral command comes back, so the
    /// remote end stops rather than holding the last instruction.
    pub fn sample(&mut self, backend: &mut dyn InputBackend) -> ControlCommand {
        backend.refresh();

        let slots = backend.device_count().min(self.settings.max_devices);
        let readings: Vec<(usize, RawState)> = match self.settings.merge_policy {
            MergePolicy::LastWriterWins => (0..slots)
                .filter_map(|index| backend.sample(index).map(|state| (index, state)))
                .collect(),
            MergePolicy::SingleDevice { index } => backend
                .sample(index)
                .map(|state| vec![(index, state)])
                .unwrap_or_default(),
        };

        let Some(state) = self.merge(&readings) else {
            if let Some(smoother) = &mut self.smoother {
                smoother.reset();
            }
            return ControlCommand::neutral();
        };

        trace!(
            "Input x={} y={} trigger={} from {} device(s)",
            state.axis_x,
            state.axis_y,
            state.trigger,
            readings.len()
        );

        let command = map_command(&state, self.settings.deadzone);
        match &mut self.smoother {
            Some(smoother) => ControlCommand::new(
                command.direction(),
                command.servo_angle(),
                smoother.push(command.speed()),
            ),
            None => command,
        }
    }
}
