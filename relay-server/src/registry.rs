//! Global socket registry (spec §5 "Shared resources"): every live
//! connection, keyed by id, guarded by a single mutex. Used by the admin
//! console (`lc`, `k`, `b`) and by the listener for per-IP cap enforcement.

use crate::connection::{ConnectionShared, UserId};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Default)]
pub struct Registry {
    connections: AsyncMutex<HashMap<UserId, Arc<ConnectionShared>>>,
}

impl Registry {
    pub fn new() -> Arc<Registry> {
        Arc::new(Registry::default())
    }

    pub async fn insert(&self, connection: Arc<ConnectionShared>) {
        self.connections.lock().await.insert(connection.id, connection);
    }

    pub async fn remove(&self, id: UserId) {
        self.connections.lock().await.remove(&id);
    }

    pub async fn count_from_ip(&self, ip: IpAddr) -> usize {
        self.connections.lock().await.values().filter(|c| c.remote_addr.ip() == ip).count()
    }

    pub async fn list(&self) -> Vec<Arc<ConnectionShared>> {
        self.connections.lock().await.values().cloned().collect()
    }

    /// `k <ip>[:port]` — kick every connection matching the address.
    /// Removing the entry from the registry alone would not disconnect
    /// anything (the connection's own task still holds a clone of the
    /// `Arc`), so the send half is shut down here too, forcing that task's
    /// next read/write to fail with `ClientDisconnected`.
    pub async fn kick(&self, ip: IpAddr, port: Option<u16>) -> usize {
        let mut connections = self.connections.lock().await;
        let matching: Vec<Arc<ConnectionShared>> = connections
            .values()
            .filter(|c| c.remote_addr.ip() == ip && port.map_or(true, |p| c.remote_addr.port() == p))
            .cloned()
            .collect();
        for conn in &matching {
            connections.remove(&conn.id);
        }
        drop(connections);
        for conn in &matching {
            conn.shutdown().await;
        }
        matching.len()
    }
}
