//! # Channel Registry
//!
//! Owns the mapping from event name to its bound channel: the derived
//! socket address, the open receive socket with its receive task, and the
//! ordered handler list. Per event the lifecycle is a two-state machine,
//! Absent → Bound → Absent; a channel exists iff its handler list is
//! non-empty, and the receive socket is open iff the channel exists.
//!
//! The registry is plain bookkeeping: socket construction, task spawning
//! and teardown are driven by the emitter, which is also the single writer
//! (all mutation happens behind one mutex, never across an await point).

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::codec::EventValue;
use crate::derive;

/// A registered event handler, invoked with the decoded arguments in
/// emission order.
pub type EventHandler = Arc<dyn Fn(&[EventValue]) + Send + Sync>;

/// Opaque identity of a registered handler.
///
/// Returned by `on`/`once` and required by `off`; handlers are never
/// compared by their definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(pub(crate) u64);

/// One handler in a channel's list.
#[derive(Clone)]
pub(crate) struct HandlerEntry {
    pub id: HandlerId,
    /// Auto-remove after the first invocation.
    pub once: bool,
    pub handler: EventHandler,
}

/// Runtime state of one bound event.
pub(crate) struct Channel {
    /// Derived (address, port) pair.
    pub addr: SocketAddrV4,
    /// Open receive socket, joined to the multicast group.
    pub socket: Arc<UdpSocket>,
    /// The receive loop task feeding dispatch.
    pub task: JoinHandle<()>,
    /// Handlers in registration order. Invariant: non-empty.
    pub handlers: Vec<HandlerEntry>,
}

/// Outcome of removing a single handler.
pub(crate) enum RemoveOutcome {
    /// No such channel or no handler with that id.
    NotFound,
    /// Removed; other handlers remain, channel stays bound.
    Removed,
    /// Removed the last handler; the caller must tear the channel down.
    RemovedLast(Channel),
}

pub(crate) struct ChannelRegistry {
    channels: HashMap<String, Channel>,
    /// Derivation cache; `derive_port` runs once per never-before-seen event.
    ports: HashMap<String, u16>,
    /// Explicit overrides, consulted before cache and derivation.
    overrides: HashMap<String, u16>,
}

impl ChannelRegistry {
    pub fn new(overrides: HashMap<String, u16>) -> Self {
        Self {
            channels: HashMap::new(),
            ports: HashMap::new(),
            overrides,
        }
    }

    /// Resolve the port for `event`: override, then cache, then derivation.
    pub fn port_for(&mut self, app_id: &str, group: &str, event: &str, base_port: u16) -> u16 {
        if let Some(&port) = self.overrides.get(event) {
            return port;
        }
        if let Some(&port) = self.ports.get(event) {
            return port;
        }
        let port = derive::derive_port(app_id, group, event, base_port);
        self.ports.insert(event.to_owned(), port);
        port
    }

    /// Install or replace a port override. Takes effect at the next bind.
    pub fn set_port_override(&mut self, event: &str, port: u16) {
        self.overrides.insert(event.to_owned(), port);
    }

    /// The *other* active event owning `port`, if any. Two distinct events
    /// may share a derived port only while at most one of them is bound.
    pub fn active_owner_of_port(&self, event: &str, port: u16) -> Option<&str> {
        self.channels
            .iter()
            .find(|(name, ch)| name.as_str() != event && ch.addr.port() == port)
            .map(|(name, _)| name.as_str())
    }

    pub fn has_channel(&self, event: &str) -> bool {
        self.channels.contains_key(event)
    }

    /// Same answer as [`has_channel`](Self::has_channel) by the lifecycle
    /// invariant, kept as its own query for callers asking about handlers.
    pub fn has_listeners(&self, event: &str) -> bool {
        self.channels
            .get(event)
            .is_some_and(|ch| !ch.handlers.is_empty())
    }

    /// Transition Absent → Bound.
    pub fn bind(&mut self, event: &str, channel: Channel) {
        debug!(event, addr = %channel.addr, "channel bound");
        self.channels.insert(event.to_owned(), channel);
    }

    /// Append a handler to a bound channel.
    pub fn push_handler(&mut self, event: &str, entry: HandlerEntry) {
        if let Some(channel) = self.channels.get_mut(event) {
            channel.handlers.push(entry);
        }
    }

    /// Snapshot a channel's handler list for invocation outside the lock.
    pub fn snapshot(&self, event: &str) -> Vec<HandlerEntry> {
        self.channels
            .get(event)
            .map(|ch| ch.handlers.clone())
            .unwrap_or_default()
    }

    /// Remove exactly one handler by id.
    pub fn remove_handler(&mut self, event: &str, id: HandlerId) -> RemoveOutcome {
        let Entry::Occupied(mut occupied) = self.channels.entry(event.to_owned()) else {
            return RemoveOutcome::NotFound;
        };
        let Some(index) = occupied.get().handlers.iter().position(|e| e.id == id) else {
            return RemoveOutcome::NotFound;
        };
        occupied.get_mut().handlers.remove(index);

        if occupied.get().handlers.is_empty() {
            let channel = occupied.remove();
            debug!(event, "last handler removed, channel unbound");
            return RemoveOutcome::RemovedLast(channel);
        }
        RemoveOutcome::Removed
    }

    /// Transition Bound → Absent unconditionally.
    pub fn take_channel(&mut self, event: &str) -> Option<Channel> {
        self.channels.remove(event)
    }

    /// Every currently bound event name.
    pub fn bound_events(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }
}
