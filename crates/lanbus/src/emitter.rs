//! # Emitter
//!
//! The public surface of the bus. `emit` resolves the event's channel,
//! builds the envelope (encode → encrypt → tag) and schedules one datagram
//! on the shared send socket; `on` lazily binds the channel's receive
//! socket and registers a handler; dropping the last handler tears the
//! channel down again.
//!
//! All registry mutation is serialized behind one mutex that is never held
//! across an await point. Each bound channel runs one receive task holding
//! a weak reference to the emitter internals, so dropping the emitter ends
//! every task.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::net::UdpSocket;
use tracing::{debug, error, trace, warn};

use crate::codec::{cipher, origin, payload, EventValue};
use crate::config::EmitterConfig;
use crate::derive;
use crate::error::EmitterError;
use crate::registry::{
    Channel, ChannelRegistry, EventHandler, HandlerEntry, HandlerId, RemoveOutcome,
};
use crate::socket::{self, MulticastOptions, MAX_DATAGRAM_SIZE};

/// Factory counter behind default instance labels (`emitter-0`, ...).
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

/// A handle to one bus participant.
///
/// Cheap to clone; clones share the same channels, handlers and send
/// socket. All methods must be called from within a Tokio runtime.
#[derive(Clone)]
pub struct Emitter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Emitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter")
            .field("name", &self.inner.name)
            .field("group", &self.inner.config.group)
            .field("addr", &self.inner.group_addr)
            .finish_non_exhaustive()
    }
}

struct Inner {
    name: String,
    config: EmitterConfig,
    /// Derived once; constant for the lifetime of the instance.
    group_addr: Ipv4Addr,
    /// Our process identity, written into origin tags.
    origin_id: u32,
    opts: MulticastOptions,
    send_socket: UdpSocket,
    registry: Mutex<ChannelRegistry>,
    next_handler_id: AtomicU64,
    /// Set on the first send-socket failure; never cleared.
    failed: AtomicBool,
    closed: AtomicBool,
}

impl Emitter {
    /// Validate `config`, derive the group address and open the shared
    /// send socket.
    ///
    /// # Errors
    ///
    /// [`EmitterError::Config`] on any out-of-range or inconsistent
    /// configuration value; [`EmitterError::Socket`] when the send socket
    /// cannot be opened.
    pub fn new(config: EmitterConfig) -> Result<Self, EmitterError> {
        config.validate()?;

        let name = config
            .name
            .clone()
            .unwrap_or_else(|| format!("emitter-{}", NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed)));
        let group_addr = derive::derive_address(&config.group, config.first_octet);
        let opts = MulticastOptions {
            ttl: config.ttl,
            loopback: config.loopback,
            interface: config.interface,
        };
        let send_socket = socket::open_send_socket(&opts)?;
        let registry = Mutex::new(ChannelRegistry::new(config.port_overrides.clone()));
        let origin_id = config.origin_id.unwrap_or_else(std::process::id);

        debug!(name = %name, group = %config.group, addr = %group_addr, "emitter created");

        Ok(Self {
            inner: Arc::new(Inner {
                name,
                config,
                group_addr,
                origin_id,
                opts,
                send_socket,
                registry,
                next_handler_id: AtomicU64::new(0),
                failed: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// The instance's debug label.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// The multicast address every event of this emitter shares.
    #[must_use]
    pub fn address(&self) -> Ipv4Addr {
        self.inner.group_addr
    }

    /// The derived or overridden UDP port for `event`.
    pub fn port(&self, event: &str) -> Result<u16, EmitterError> {
        if event.is_empty() {
            return Err(EmitterError::MissingEvent);
        }
        Ok(self.inner.resolve_port(event))
    }

    /// Register `handler` for `event`, binding the channel if this is its
    /// first listener. Returns the token [`off`](Self::off) takes.
    ///
    /// # Errors
    ///
    /// [`EmitterError::PortCollision`] when a different active event
    /// already owns the derived/overridden port (state is left untouched);
    /// [`EmitterError::Socket`] when bind or group join fails.
    pub fn on<F>(&self, event: &str, handler: F) -> Result<HandlerId, EmitterError>
    where
        F: Fn(&[EventValue]) + Send + Sync + 'static,
    {
        self.add_handler(event, Arc::new(handler), false)
    }

    /// Alias for [`on`](Self::on).
    pub fn add_listener<F>(&self, event: &str, handler: F) -> Result<HandlerId, EmitterError>
    where
        F: Fn(&[EventValue]) + Send + Sync + 'static,
    {
        self.on(event, handler)
    }

    /// Like [`on`](Self::on), but the handler is removed after its first
    /// invocation (tearing the channel down if it was the last one).
    pub fn once<F>(&self, event: &str, handler: F) -> Result<HandlerId, EmitterError>
    where
        F: Fn(&[EventValue]) + Send + Sync + 'static,
    {
        self.add_handler(event, Arc::new(handler), true)
    }

    /// Remove one previously registered handler. Returns whether a handler
    /// was removed; removing the last one leaves the multicast group and
    /// closes the channel's socket.
    pub fn off(&self, event: &str, id: HandlerId) -> Result<bool, EmitterError> {
        if event.is_empty() {
            return Err(EmitterError::MissingEvent);
        }
        let outcome = self.inner.registry().remove_handler(event, id);
        match outcome {
            RemoveOutcome::NotFound => Ok(false),
            RemoveOutcome::Removed => Ok(true),
            RemoveOutcome::RemovedLast(channel) => {
                self.inner.teardown(event, channel);
                Ok(true)
            }
        }
    }

    /// Alias for [`off`](Self::off).
    pub fn remove_listener(&self, event: &str, id: HandlerId) -> Result<bool, EmitterError> {
        self.off(event, id)
    }

    /// Remove every handler for `event`, or for all bound events when
    /// `None`, closing the affected channels.
    pub fn remove_all_listeners(&self, event: Option<&str>) {
        let events = match event {
            Some(event) => vec![event.to_owned()],
            None => self.inner.registry().bound_events(),
        };
        for event in events {
            let channel = self.inner.registry().take_channel(&event);
            if let Some(channel) = channel {
                self.inner.teardown(&event, channel);
            }
        }
    }

    /// Whether `event` currently has at least one handler.
    #[must_use]
    pub fn has_listeners(&self, event: &str) -> bool {
        self.inner.registry().has_listeners(event)
    }

    /// Whether `event` currently has a bound channel. Equal to
    /// [`has_listeners`](Self::has_listeners) by the lifecycle invariant.
    #[must_use]
    pub fn has_channel(&self, event: &str) -> bool {
        self.inner.registry().has_channel(event)
    }

    /// Install a port override for `event`, taking effect at its next bind.
    pub fn set_port_override(&self, event: &str, port: u16) -> Result<(), EmitterError> {
        if event.is_empty() {
            return Err(EmitterError::MissingEvent);
        }
        if port < 1024 {
            return Err(crate::error::ConfigError::InvalidPortOverride {
                event: event.to_owned(),
                port,
            }
            .into());
        }
        self.inner.registry().set_port_override(event, port);
        Ok(())
    }

    /// Emit `event` with positional `args` to everyone listening on the
    /// derived channel. Fire and forget: the datagram is sent from a
    /// spawned task one scheduling tick later, nothing reports delivery,
    /// and UDP gives no guarantees either way.
    ///
    /// # Errors
    ///
    /// [`EmitterError::MissingEvent`] on an empty name and
    /// [`EmitterError::Closed`] once the emitter is closed or its send
    /// socket has failed. Send failures themselves are logged and mark the
    /// instance failed; there is no reconnect.
    pub fn emit(&self, event: &str, args: Vec<EventValue>) -> Result<(), EmitterError> {
        if event.is_empty() {
            return Err(EmitterError::MissingEvent);
        }
        if self.inner.closed.load(Ordering::Acquire) || self.inner.failed.load(Ordering::Acquire) {
            return Err(EmitterError::Closed);
        }

        let inner = Arc::clone(&self.inner);
        let event = event.to_owned();
        tokio::spawn(async move {
            inner.send(&event, &args).await;
        });
        Ok(())
    }

    /// Tear down every channel and refuse further emits.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.remove_all_listeners(None);
        debug!(name = %self.inner.name, "emitter closed");
    }

    /// Whether the emitter was closed or its send socket failed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire) || self.inner.failed.load(Ordering::Acquire)
    }

    fn add_handler(
        &self,
        event: &str,
        handler: EventHandler,
        once: bool,
    ) -> Result<HandlerId, EmitterError> {
        if event.is_empty() {
            return Err(EmitterError::MissingEvent);
        }
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(EmitterError::Closed);
        }

        let mut registry = self.inner.registry();
        let port = registry.port_for(
            &self.inner.config.app_id,
            &self.inner.config.group,
            event,
            self.inner.config.base_port,
        );

        if !registry.has_channel(event) {
            if let Some(owner) = registry.active_owner_of_port(event, port) {
                return Err(EmitterError::PortCollision {
                    event: event.to_owned(),
                    owner: owner.to_owned(),
                    port,
                });
            }

            let socket =
                Arc::new(socket::open_receive_socket(self.inner.group_addr, port, &self.inner.opts)?);
            let task = tokio::spawn(recv_loop(
                Arc::downgrade(&self.inner),
                event.to_owned(),
                Arc::clone(&socket),
            ));
            registry.bind(
                event,
                Channel {
                    addr: SocketAddrV4::new(self.inner.group_addr, port),
                    socket,
                    task,
                    handlers: Vec::new(),
                },
            );
        }

        let id = HandlerId(self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed));
        registry.push_handler(event, HandlerEntry { id, once, handler });
        Ok(id)
    }
}

impl Inner {
    fn registry(&self) -> MutexGuard<'_, ChannelRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn resolve_port(&self, event: &str) -> u16 {
        self.registry()
            .port_for(&self.config.app_id, &self.config.group, event, self.config.base_port)
    }

    /// Leave the group and end the channel's receive task. The socket
    /// closes when its last reference is dropped.
    fn teardown(&self, event: &str, channel: Channel) {
        if let Err(e) = socket::leave_group(&channel.socket, self.group_addr, &self.opts) {
            debug!(event, error = %e, "leaving multicast group failed");
        }
        channel.task.abort();
        debug!(event, addr = %channel.addr, "channel closed");
    }

    /// The deferred half of `emit`: build the envelope and send it.
    async fn send(&self, event: &str, args: &[EventValue]) {
        let port = self.resolve_port(event);

        let frame = match payload::encode(event, args) {
            Ok(frame) => frame,
            Err(e) => {
                error!(event, error = %e, "payload encoding failed, emit dropped");
                return;
            }
        };
        let sealed = match cipher::apply(&frame, self.config.secret.as_deref(), self.config.cipher)
        {
            Ok(sealed) => sealed,
            Err(e) => {
                error!(event, error = %e, "payload encryption failed, emit dropped");
                return;
            }
        };
        let datagram = if self.config.foreign_only {
            origin::tag(self.origin_id, &sealed)
        } else {
            sealed
        };

        let dest = SocketAddr::V4(SocketAddrV4::new(self.group_addr, port));
        match self.send_socket.send_to(&datagram, dest).await {
            Ok(len) => trace!(event, %dest, len, "datagram sent"),
            Err(e) => {
                // Instance-fatal: there is no alternate send path.
                self.failed.store(true, Ordering::Release);
                error!(name = %self.name, event, error = %e, "send socket failed, emitter disabled");
            }
        }
    }

    /// Per-datagram receive path: untag, filter, decrypt, decode, verify,
    /// invoke. Every failure is scoped to this one datagram.
    fn dispatch(&self, event: &str, datagram: &[u8], peer: SocketAddr) {
        let (tag, body) = origin::untag(datagram);

        if self.config.foreign_only && tag == Some(self.origin_id) {
            trace!(event, "own datagram discarded");
            return;
        }

        let frame = match cipher::remove(body, self.config.secret.as_deref(), self.config.cipher) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(event, %peer, error = %e, "datagram dropped");
                return;
            }
        };
        let (name, args) = match payload::decode(&frame) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(event, %peer, error = %e, "datagram dropped");
                return;
            }
        };
        if name != event {
            let e = EmitterError::ProtocolMismatch {
                expected: event.to_owned(),
                actual: name,
            };
            warn!(%peer, error = %e, "datagram dropped");
            return;
        }

        // Invoke outside the lock so handlers may call back into the
        // emitter. Handler panics are deliberately not caught.
        let entries = self.registry().snapshot(event);
        let mut fired_once = Vec::new();
        for entry in &entries {
            (entry.handler)(&args);
            if entry.once {
                fired_once.push(entry.id);
            }
        }

        for id in fired_once {
            let outcome = self.registry().remove_handler(event, id);
            if let RemoveOutcome::RemovedLast(channel) = outcome {
                self.teardown(event, channel);
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Collect first: iterating the guard directly would hold the lock
        // while the body locks again.
        let events = self.registry().bound_events();
        for event in events {
            let channel = self.registry().take_channel(&event);
            if let Some(channel) = channel {
                self.teardown(&event, channel);
            }
        }
    }
}

/// Receive loop of one bound channel. Ends when the emitter is dropped or
/// the channel is torn down; receive errors drop the datagram, not the
/// channel.
async fn recv_loop(weak: Weak<Inner>, event: String, socket: Arc<UdpSocket>) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!(event, error = %e, "receive error, datagram dropped");
                continue;
            }
        };
        let Some(inner) = weak.upgrade() else {
            break;
        };
        inner.dispatch(&event, &buf[..len], peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EmitterConfig;
    use std::time::Duration;

    fn local_config(group: &str) -> EmitterConfig {
        EmitterConfig::new("test-app", group).with_interface(Ipv4Addr::LOCALHOST)
    }

    #[tokio::test]
    async fn dropping_with_bound_channels_completes() {
        let emitter = Emitter::new(local_config("drop-bound")).unwrap();
        emitter.on("tick", |_| {}).unwrap();
        emitter.on("tock", |_| {}).unwrap();

        // Teardown of still-bound channels must finish, not block.
        let dropped = tokio::task::spawn_blocking(move || drop(emitter));
        tokio::time::timeout(Duration::from_secs(5), dropped)
            .await
            .expect("drop did not complete")
            .unwrap();
    }

    #[tokio::test]
    async fn debug_output_names_the_instance() {
        let emitter = Emitter::new(local_config("dbg").with_name("mine")).unwrap();
        let rendered = format!("{emitter:?}");
        assert!(rendered.contains("mine"));
        assert!(rendered.contains("dbg"));
    }

    #[tokio::test]
    async fn construction_validates_config() {
        let err = Emitter::new(EmitterConfig::new("a", "g").with_ttl(0)).unwrap_err();
        assert!(matches!(err, EmitterError::Config(_)));

        let err = Emitter::new(
            EmitterConfig::new("a", "g")
                .with_foreign_only(true)
                .with_loopback(false),
        )
        .unwrap_err();
        assert!(matches!(err, EmitterError::Config(_)));
    }

    #[tokio::test]
    async fn default_names_come_from_the_factory_counter() {
        let a = Emitter::new(local_config("naming-a")).unwrap();
        let b = Emitter::new(local_config("naming-b")).unwrap();
        assert!(a.name().starts_with("emitter-"));
        assert_ne!(a.name(), b.name());

        let named = Emitter::new(local_config("naming-c").with_name("mine")).unwrap();
        assert_eq!(named.name(), "mine");
    }

    #[tokio::test]
    async fn derived_address_is_stable_across_instances() {
        let a = Emitter::new(local_config("events")).unwrap();
        let b = Emitter::new(local_config("events")).unwrap();
        assert_eq!(a.address(), b.address());
        assert_eq!(a.address().octets()[0], 239);
        assert_ne!(a.address().octets()[3], 0);
        assert_ne!(a.address().octets()[3], 255);
    }

    #[tokio::test]
    async fn add_then_remove_returns_to_absent() {
        let emitter = Emitter::new(local_config("lifecycle")).unwrap();
        assert!(!emitter.has_listeners("tick"));
        assert!(!emitter.has_channel("tick"));

        let id = emitter.on("tick", |_| {}).unwrap();
        assert!(emitter.has_listeners("tick"));
        assert!(emitter.has_channel("tick"));

        assert!(emitter.off("tick", id).unwrap());
        assert!(!emitter.has_listeners("tick"));
        assert!(!emitter.has_channel("tick"));
    }

    #[tokio::test]
    async fn off_removes_exactly_one_handler() {
        let emitter = Emitter::new(local_config("exactly-one")).unwrap();
        let first = emitter.on("tick", |_| {}).unwrap();
        let _second = emitter.on("tick", |_| {}).unwrap();

        assert!(emitter.off("tick", first).unwrap());
        assert!(emitter.has_listeners("tick"));
        // A second removal of the same token is a no-op.
        assert!(!emitter.off("tick", first).unwrap());
        assert!(emitter.has_listeners("tick"));
    }

    #[tokio::test]
    async fn port_collision_rejected_and_state_unchanged() {
        let emitter = Emitter::new(local_config("collision")).unwrap();
        let tick_port = emitter.port("tick").unwrap();
        emitter.set_port_override("tock", tick_port).unwrap();

        emitter.on("tick", |_| {}).unwrap();
        let err = emitter.on("tock", |_| {}).unwrap_err();
        assert!(matches!(err, EmitterError::PortCollision { port, .. } if port == tick_port));

        assert!(emitter.has_channel("tick"));
        assert!(!emitter.has_channel("tock"));
    }

    #[tokio::test]
    async fn collision_clears_once_owner_unbinds() {
        let emitter = Emitter::new(local_config("collision-clear")).unwrap();
        let tick_port = emitter.port("tick").unwrap();
        emitter.set_port_override("tock", tick_port).unwrap();

        let id = emitter.on("tick", |_| {}).unwrap();
        assert!(emitter.on("tock", |_| {}).is_err());

        emitter.off("tick", id).unwrap();
        // Only one of the two events is active now, which is legitimate.
        emitter.on("tock", |_| {}).unwrap();
        assert!(emitter.has_channel("tock"));
    }

    #[tokio::test]
    async fn empty_event_names_are_rejected() {
        let emitter = Emitter::new(local_config("missing")).unwrap();
        assert!(matches!(
            emitter.on("", |_| {}),
            Err(EmitterError::MissingEvent)
        ));
        assert!(matches!(
            emitter.emit("", vec![]),
            Err(EmitterError::MissingEvent)
        ));
        assert!(matches!(emitter.port(""), Err(EmitterError::MissingEvent)));
        assert!(!emitter.has_listeners(""));
    }

    #[tokio::test]
    async fn closed_emitter_refuses_work() {
        let emitter = Emitter::new(local_config("closing")).unwrap();
        emitter.on("tick", |_| {}).unwrap();

        emitter.close();
        assert!(emitter.is_closed());
        assert!(!emitter.has_channel("tick"));
        assert!(matches!(
            emitter.emit("tick", vec![]),
            Err(EmitterError::Closed)
        ));
        assert!(matches!(
            emitter.on("tick", |_| {}),
            Err(EmitterError::Closed)
        ));
    }

    #[tokio::test]
    async fn remove_all_listeners_scopes_to_one_event() {
        let emitter = Emitter::new(local_config("remove-all")).unwrap();
        emitter.on("tick", |_| {}).unwrap();
        emitter.on("tick", |_| {}).unwrap();
        emitter.on("tock", |_| {}).unwrap();

        emitter.remove_all_listeners(Some("tick"));
        assert!(!emitter.has_channel("tick"));
        assert!(emitter.has_channel("tock"));

        emitter.remove_all_listeners(None);
        assert!(!emitter.has_channel("tock"));
    }
}
