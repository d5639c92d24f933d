pub mod display;
pub mod driver;

pub use driver::{ControlLoop, DriverContext};
