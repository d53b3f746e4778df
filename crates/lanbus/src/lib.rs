//! # LANBus - Brokerless LAN Event Bus
//!
//! Independent processes on a LAN exchange named events without a broker:
//! every event name is deterministically mapped to a multicast group/port
//! pair, so emitting an event is broadcasting one framed (optionally
//! encrypted, optionally origin-tagged) UDP datagram, and listening is
//! joining the group and binding the port.
//!
//! ```no_run
//! use lanbus::{Emitter, EmitterConfig, EventValue};
//!
//! # async fn run() -> Result<(), lanbus::EmitterError> {
//! let emitter = Emitter::new(EmitterConfig::new("sensors", "telemetry"))?;
//!
//! emitter.on("temperature", |args| {
//!     println!("reading: {args:?}");
//! })?;
//!
//! emitter.emit("temperature", vec![EventValue::Float(21.5)])?;
//! # Ok(())
//! # }
//! ```
//!
//! Delivery is plain UDP: best effort, unordered, unacknowledged. The bus
//! never compensates for loss or duplication, and encryption (when a
//! secret is configured) provides confidentiality only.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod codec;
pub mod config;
pub mod derive;
pub mod error;
pub mod netif;
pub mod registry;
pub mod socket;

mod emitter;

pub use codec::{CipherKind, EventValue};
pub use config::{EmitterConfig, DEFAULT_BASE_PORT, DEFAULT_FIRST_OCTET, DEFAULT_TTL};
pub use emitter::Emitter;
pub use error::{ConfigError, EmitterError};
pub use registry::{EventHandler, HandlerId};
