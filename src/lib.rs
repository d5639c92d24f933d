//! Operator-side controller for a remotely driven unit.
//!
//! Reads a local input device, maps it to a bounded [`ControlCommand`],
//! frames it and pushes it uplink once per tick. Only the most recent
//! command matters: nothing is queued, acknowledged or retransmitted.
//!
//! [`ControlCommand`]: domain::models::ControlCommand

pub mod application;
pub mod domain;
pub mod infrastructure;
