//! # Error Taxonomy
//!
//! Construction and registration failures are returned synchronously.
//! Receive-side failures (malformed, undecryptable or mismatched datagrams)
//! are scoped to the single datagram: logged and dropped, never fatal to the
//! channel. A failure on the shared send socket is fatal to the owning
//! emitter because no alternate send path exists.

use thiserror::Error;

/// Errors detected while validating an [`EmitterConfig`](crate::EmitterConfig).
///
/// All of these are fatal at construction; an `Emitter` is never built from
/// an invalid configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Multicast TTL must be in 1..=255.
    #[error("Invalid ttl {0}: must be in 1..=255")]
    InvalidTtl(u32),

    /// First address octet must be in the IPv4 multicast range.
    #[error("Invalid first octet {0}: must be in 224..=239")]
    InvalidFirstOctet(u8),

    /// Base port must leave room for the 0..=32767 derivation window.
    #[error("Invalid base port {0}: must be in 1024..=16384")]
    InvalidBasePort(u16),

    /// A per-event port override points outside the usable port space.
    #[error("Invalid port override {port} for event '{event}'")]
    InvalidPortOverride { event: String, port: u16 },

    /// The configured interface address is not bound to any local interface.
    #[error("Interface address {0} is not a configured local address")]
    InterfaceNotLocal(std::net::Ipv4Addr),

    /// Foreign-only filtering needs loopback delivery to be observable at all.
    #[error("foreign_only requires loopback to be enabled")]
    ForeignOnlyRequiresLoopback,

    /// Cipher name not recognised.
    #[error("Unknown cipher '{0}'")]
    UnknownCipher(String),
}

/// Errors surfaced by [`Emitter`](crate::Emitter) operations.
#[derive(Debug, Error)]
pub enum EmitterError {
    /// Invalid configuration, see [`ConfigError`].
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Another active event already owns this port. Not retried; the caller
    /// must supply an explicit port override for one of the two events.
    #[error("Port {port} for event '{event}' is already owned by active event '{owner}'")]
    PortCollision {
        event: String,
        owner: String,
        port: u16,
    },

    /// An event name was required but empty.
    #[error("Event name must not be empty")]
    MissingEvent,

    /// Transport error on the underlying socket. On the shared send path
    /// this is fatal to the emitter instance.
    #[error("Socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// Inbound payload was not a well-formed encoded frame.
    #[error("Malformed payload: {0}")]
    Format(String),

    /// Inbound ciphertext could not be decrypted (wrong key, truncated
    /// nonce, or corrupt data).
    #[error("Decryption failed: {0}")]
    Decrypt(String),

    /// Decoded event name does not match the receiving channel.
    #[error("Protocol mismatch: channel '{expected}' received event '{actual}'")]
    ProtocolMismatch { expected: String, actual: String },

    /// The emitter was closed, or its send socket previously failed.
    #[error("Emitter is closed")]
    Closed,
}
