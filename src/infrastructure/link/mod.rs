//! Link Module
//!
//! Provides the uplink to the remote drive unit.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                    TransportSession                      │
//! │  (Connection lifecycle - public API for the driver)      │
//! └─────────────────────┬───────────────────────────────────┘
//!                       │
//!         ┌─────────────┼─────────────┐
//!         │             │             │
//!         ▼             ▼             ▼
//! ┌───────────┐  ┌────────────┐  ┌──────────┐
//! │  Scanner  │  │ Connection │  │ Protocol │
//! │           │  │            │  │          │
//! │ - Discover│  │ - Connect  │  │ - Frames │
//! │ - Select  │  │ - Classify │  │ - Payload│
//! └───────────┘  └────────────┘  └──────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] - Frame layout and command payload encoding
//! - [`scanner`] - Device discovery and selection
//! - [`connection`] - Stream connector and connect error classification
//! - [`service`] - Transport session state machine

pub mod connection;
pub mod protocol;
pub mod scanner;
pub mod service;

pub use service::TransportSession;
