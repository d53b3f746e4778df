//! # Emitter Configuration
//!
//! Immutable after construction (per-event port overrides excepted, which
//! the registry owns and may be extended at runtime). Validation happens
//! once, in [`Emitter::new`](crate::Emitter::new); the derivation and
//! socket layers can assume every field is in range.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::codec::CipherKind;
use crate::error::ConfigError;
use crate::netif;

/// Default multicast TTL.
pub const DEFAULT_TTL: u32 = 64;

/// Default first octet of derived addresses (administratively scoped).
pub const DEFAULT_FIRST_OCTET: u8 = 239;

/// Default base port of the derivation window.
pub const DEFAULT_BASE_PORT: u16 = 1967;

/// Configuration for an [`Emitter`](crate::Emitter).
///
/// Built with struct-update or the `with_*` builder methods:
///
/// ```no_run
/// use lanbus::EmitterConfig;
///
/// let config = EmitterConfig::new("sensors", "telemetry")
///     .with_secret("hunter2")
///     .with_ttl(4)
///     .with_foreign_only(true);
/// ```
#[derive(Debug, Clone)]
pub struct EmitterConfig {
    /// Debug label; defaulted from a process-wide counter when `None`.
    pub name: Option<String>,
    /// Application identifier, part of the port derivation input.
    pub app_id: String,
    /// Group identifier; hashes to the multicast address all events share.
    pub group: String,
    /// Shared secret; payload encryption is enabled iff this is set.
    pub secret: Option<String>,
    /// Symmetric cipher used when `secret` is set.
    pub cipher: CipherKind,
    /// Multicast TTL, 1..=255.
    pub ttl: u32,
    /// First octet of derived addresses, 224..=239.
    pub first_octet: u8,
    /// Base of the derived port window, 1024..=16384.
    pub base_port: u16,
    /// Deliver own datagrams back to this host (IP_MULTICAST_LOOP).
    pub loopback: bool,
    /// Drop datagrams tagged with our own process identity. Requires
    /// `loopback`: with loopback off the kernel already filters us out and
    /// the tag would never match anything.
    pub foreign_only: bool,
    /// Pin sockets to one local interface address.
    pub interface: Option<Ipv4Addr>,
    /// Identity written into origin tags; defaults to the process id.
    /// Override when several foreign-only emitters share one process and
    /// must not mistake each other's datagrams for their own.
    pub origin_id: Option<u32>,
    /// Explicit event → port overrides, consulted before derivation.
    pub port_overrides: HashMap<String, u16>,
}

impl EmitterConfig {
    /// Configuration for `app_id` under `group`, with library defaults.
    #[must_use]
    pub fn new(app_id: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            name: None,
            app_id: app_id.into(),
            group: group.into(),
            secret: None,
            cipher: CipherKind::default(),
            ttl: DEFAULT_TTL,
            first_octet: DEFAULT_FIRST_OCTET,
            base_port: DEFAULT_BASE_PORT,
            loopback: true,
            foreign_only: false,
            interface: None,
            origin_id: None,
            port_overrides: HashMap::new(),
        }
    }

    /// Set the debug label.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Enable payload encryption with this shared secret.
    #[must_use]
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Select the symmetric cipher.
    #[must_use]
    pub fn with_cipher(mut self, cipher: CipherKind) -> Self {
        self.cipher = cipher;
        self
    }

    /// Set the multicast TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the first octet of derived addresses.
    #[must_use]
    pub fn with_first_octet(mut self, octet: u8) -> Self {
        self.first_octet = octet;
        self
    }

    /// Set the base port of the derivation window.
    #[must_use]
    pub fn with_base_port(mut self, port: u16) -> Self {
        self.base_port = port;
        self
    }

    /// Enable or disable loopback delivery.
    #[must_use]
    pub fn with_loopback(mut self, loopback: bool) -> Self {
        self.loopback = loopback;
        self
    }

    /// Enable or disable foreign-only filtering.
    #[must_use]
    pub fn with_foreign_only(mut self, foreign_only: bool) -> Self {
        self.foreign_only = foreign_only;
        self
    }

    /// Pin sockets to a local interface address.
    #[must_use]
    pub fn with_interface(mut self, interface: Ipv4Addr) -> Self {
        self.interface = Some(interface);
        self
    }

    /// Override the origin-tag identity.
    #[must_use]
    pub fn with_origin_id(mut self, origin_id: u32) -> Self {
        self.origin_id = Some(origin_id);
        self
    }

    /// Override the port for one event, bypassing derivation.
    #[must_use]
    pub fn with_port_override(mut self, event: impl Into<String>, port: u16) -> Self {
        self.port_overrides.insert(event.into(), port);
        self
    }

    /// Validate every field. Called by `Emitter::new`; never recovered from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl == 0 || self.ttl > 255 {
            return Err(ConfigError::InvalidTtl(self.ttl));
        }
        if !(224..=239).contains(&self.first_octet) {
            return Err(ConfigError::InvalidFirstOctet(self.first_octet));
        }
        if !(1024..=16384).contains(&self.base_port) {
            return Err(ConfigError::InvalidBasePort(self.base_port));
        }
        for (event, &port) in &self.port_overrides {
            if port < 1024 {
                return Err(ConfigError::InvalidPortOverride {
                    event: event.clone(),
                    port,
                });
            }
        }
        if self.foreign_only && !self.loopback {
            return Err(ConfigError::ForeignOnlyRequiresLoopback);
        }
        if let Some(interface) = self.interface {
            if !netif::is_configured_local_address(interface) {
                return Err(ConfigError::InterfaceNotLocal(interface));
            }
        }
        Ok(())
    }
}
