//! Registry of accepted control connections.
//!
//! A fixed number of slots (five in the reference deployment) shared by the
//! accept task (writer), each per-client task (its own slot), and the
//! arbiter (address lookup, cleanup). All access goes through the table's
//! mutex; where both the table and the talk slot are needed, the table lock
//! is taken first.

use std::io::Write;
use std::net::{IpAddr, Shutdown, TcpStream};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{IntercomError, Result};
use crate::protocol::COMMAND_LEN;

/// Identifies a client by its slot index for the life of its connection.
pub type ClientId = usize;

/// One accepted control connection.
///
/// The table owns this socket handle for fan-out writes; the connection's
/// reader thread holds its own clone. Nothing else ever co-owns it — the
/// arbiter refers to clients by id only.
#[derive(Debug)]
pub struct ClientConnection {
    pub socket: TcpStream,
    pub remote_ip: IpAddr,
    pub connected: bool,
}

/// Thread-safe, fixed-capacity client registry.
#[derive(Clone)]
pub struct ClientTable {
    slots: Arc<Mutex<Vec<Option<ClientConnection>>>>,
}

impl ClientTable {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Self {
            slots: Arc::new(Mutex::new(slots)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn connected_count(&self) -> usize {
        self.slots
            .lock()
            .iter()
            .filter(|slot| slot.as_ref().is_some_and(|c| c.connected))
            .count()
    }

    /// Claim the first free slot for a new connection.
    pub fn add(&self, socket: TcpStream, remote_ip: IpAddr) -> Result<ClientId> {
        let mut slots = self.slots.lock();
        let Some(id) = slots.iter().position(Option::is_none) else {
            tracing::warn!(%remote_ip, "no free client slots");
            return Err(IntercomError::TableFull {
                capacity: slots.len(),
            });
        };
        slots[id] = Some(ClientConnection {
            socket,
            remote_ip,
            connected: true,
        });
        let total = slots.iter().filter(|s| s.is_some()).count();
        tracing::info!(client = id, ip = %remote_ip, total, "client added");
        Ok(id)
    }

    pub fn remote_ip(&self, id: ClientId) -> Option<IpAddr> {
        self.slots
            .lock()
            .get(id)
            .and_then(|slot| slot.as_ref())
            .map(|c| c.remote_ip)
    }

    pub fn is_connected(&self, id: ClientId) -> bool {
        self.slots
            .lock()
            .get(id)
            .and_then(|slot| slot.as_ref())
            .is_some_and(|c| c.connected)
    }

    /// Close the connection and reclaim the slot. Safe to call for ids that
    /// were already removed.
    pub fn remove(&self, id: ClientId) {
        let mut slots = self.slots.lock();
        if let Some(conn) = slots.get_mut(id).and_then(Option::take) {
            let _ = conn.socket.shutdown(Shutdown::Both);
            let remaining = slots.iter().filter(|s| s.is_some()).count();
            tracing::info!(client = id, remaining, "client removed");
        }
    }

    /// Fan a raw command frame out to every connected client, best-effort.
    ///
    /// Delivery relies on the per-socket write timeout set at accept time;
    /// failures are logged and never retried. Returns the delivered count.
    pub fn broadcast(&self, frame: [u8; COMMAND_LEN]) -> usize {
        let mut slots = self.slots.lock();
        let mut delivered = 0;
        for (id, slot) in slots.iter_mut().enumerate() {
            let Some(conn) = slot.as_mut().filter(|c| c.connected) else {
                continue;
            };
            match conn.socket.write_all(&frame) {
                Ok(()) => {
                    tracing::debug!(client = id, "broadcast delivered");
                    delivered += 1;
                }
                Err(e) => {
                    tracing::warn!(client = id, error = %e, "broadcast delivery failed");
                }
            }
        }
        delivered
    }
}
