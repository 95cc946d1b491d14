use std::collections::BTreeMap;
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::error::{Error, Result};

use super::{ConnectionId, Envelope, NetMessage};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every other connection.
    Broadcast,
    Peer(ConnectionId),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Message(Envelope),
    Disconnected(ConnectionId),
}

/// Reliable, ordered delivery between the peers of a room. Messages from one
/// sender arrive in the order they were emitted.
pub trait Transport: Send {
    fn connection_id(&self) -> ConnectionId;

    fn is_connected(&self) -> bool;

    fn emit(&self, target: Target, message: &NetMessage) -> Result<()>;

    /// Everything delivered since the last poll, oldest first.
    fn poll(&mut self) -> Vec<Inbound>;

    fn disconnect(&mut self);
}

enum Wire {
    Bytes(Vec<u8>),
    Dropped(ConnectionId),
}

#[derive(Default)]
struct HubInner {
    next_id: ConnectionId,
    routes: BTreeMap<ConnectionId, UnboundedSender<Wire>>,
    held: BTreeMap<ConnectionId, Vec<Wire>>,
}

impl HubInner {
    fn deliver(&mut self, to: ConnectionId, wire: Wire) {
        if let Some(queue) = self.held.get_mut(&to) {
            queue.push(wire);
            return;
        }
        if let Some(route) = self.routes.get(&to)
            && route.send(wire).is_err()
        {
            self.routes.remove(&to);
        }
    }
}

/// In-process transport: every connection gets an unbounded channel, and
/// messages travel as encoded envelopes.
#[derive(Clone, Default)]
pub struct LoopbackHub {
    inner: Arc<Mutex<HubInner>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> LoopbackTransport {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.routes.insert(id, tx);
        debug!("loopback connection {id} opened");
        LoopbackTransport {
            id,
            hub: self.clone(),
            rx,
            connected: true,
        }
    }

    pub fn connections(&self) -> Vec<ConnectionId> {
        self.inner.lock().routes.keys().copied().collect()
    }

    /// Queues deliveries to `connection` until `release` is called.
    pub fn hold(&self, connection: ConnectionId) {
        self.inner.lock().held.entry(connection).or_default();
    }

    pub fn release(&self, connection: ConnectionId) {
        let mut inner = self.inner.lock();
        if let Some(queue) = inner.held.remove(&connection) {
            for wire in queue {
                inner.deliver(connection, wire);
            }
        }
    }

    fn send(&self, from: ConnectionId, target: Target, bytes: Vec<u8>) {
        let mut inner = self.inner.lock();
        match target {
            Target::Peer(to) => inner.deliver(to, Wire::Bytes(bytes)),
            Target::Broadcast => {
                let peers: Vec<ConnectionId> =
                    inner.routes.keys().copied().filter(|c| *c != from).collect();
                for to in peers {
                    inner.deliver(to, Wire::Bytes(bytes.clone()));
                }
            }
        }
    }

    fn drop_connection(&self, id: ConnectionId) {
        let mut inner = self.inner.lock();
        if inner.routes.remove(&id).is_none() {
            return;
        }
        inner.held.remove(&id);
        let peers: Vec<ConnectionId> = inner.routes.keys().copied().collect();
        for to in peers {
            inner.deliver(to, Wire::Dropped(id));
        }
        debug!("loopback connection {id} closed");
    }
}

pub struct LoopbackTransport {
    id: ConnectionId,
    hub: LoopbackHub,
    rx: UnboundedReceiver<Wire>,
    connected: bool,
}

impl Transport for LoopbackTransport {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn emit(&self, target: Target, message: &NetMessage) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        trace!("{} -> {target:?}: {}", self.id, message.kind());
        let bytes = Envelope::new(self.id, message.clone()).encode()?;
        self.hub.send(self.id, target, bytes);
        Ok(())
    }

    fn poll(&mut self) -> Vec<Inbound> {
        let mut inbound = Vec::new();
        while let Ok(wire) = self.rx.try_recv() {
            match wire {
                Wire::Bytes(bytes) => match Envelope::decode(&bytes) {
                    Ok(envelope) => inbound.push(Inbound::Message(envelope)),
                    Err(err) => debug!("connection {}: undecodable message: {err}", self.id),
                },
                Wire::Dropped(id) => inbound.push(Inbound::Disconnected(id)),
            }
        }
        inbound
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.connected = false;
            self.hub.drop_connection(self.id);
        }
    }
}

impl Drop for LoopbackTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chat(text: &str) -> NetMessage {
        NetMessage::Message {
            text: text.into(),
            timestamp: 0,
            player: 1,
        }
    }

    fn texts(inbound: &[Inbound]) -> Vec<String> {
        inbound
            .iter()
            .filter_map(|i| match i {
                Inbound::Message(Envelope {
                    message: NetMessage::Message { text, .. },
                    ..
                }) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn broadcast_skips_sender_and_keeps_order() {
        let hub = LoopbackHub::new();
        let mut a = hub.connect();
        let mut b = hub.connect();
        let mut c = hub.connect();
        a.emit(Target::Broadcast, &chat("one")).unwrap();
        a.emit(Target::Peer(c.connection_id()), &chat("two")).unwrap();
        a.emit(Target::Broadcast, &chat("three")).unwrap();

        assert!(a.poll().is_empty());
        assert_eq!(texts(&b.poll()), vec!["one", "three"]);
        assert_eq!(texts(&c.poll()), vec!["one", "two", "three"]);
    }

    #[test]
    fn disconnect_is_announced() {
        let hub = LoopbackHub::new();
        let mut a = hub.connect();
        let b = hub.connect();
        let gone = b.connection_id();
        drop(b);
        assert_eq!(a.poll(), vec![Inbound::Disconnected(gone)]);
        assert_eq!(hub.connections(), vec![a.connection_id()]);
        a.disconnect();
        assert!(matches!(
            a.emit(Target::Broadcast, &chat("late")),
            Err(Error::NotConnected)
        ));
    }

    #[test]
    fn held_connections_receive_on_release() {
        let hub = LoopbackHub::new();
        let a = hub.connect();
        let mut b = hub.connect();
        hub.hold(b.connection_id());
        a.emit(Target::Broadcast, &chat("queued")).unwrap();
        assert!(b.poll().is_empty());
        hub.release(b.connection_id());
        assert_eq!(texts(&b.poll()), vec!["queued"]);
    }
}
