//! Session and connection (I/O) tables.
//!
//! Mirrors the shared-state discipline used throughout this codebase: a
//! multi-reader/single-writer lock around the table itself, and a per-entry
//! lock around the single field (`last_activity`) that every request
//! touches, so a busy connection doesn't serialize on the whole table just
//! to record a heartbeat.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

use crate::error::{Result, SessionError};

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

pub struct Session {
    pub id: u32,
    pub remote_ip: String,
    pub created_at_ms: u64,
    last_activity_ms: AtomicU64,
}

impl Session {
    pub fn touch(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn idle_ms(&self) -> u64 {
        now_ms().saturating_sub(self.last_activity_ms.load(Ordering::Relaxed))
    }
}

#[derive(Default)]
pub struct SessionTable {
    inner: RwLock<HashMap<u32, Arc<Session>>>,
    by_ip: RwLock<HashMap<String, usize>>,
    next_id: AtomicU32,
    max_sessions: usize,
    max_sessions_per_ip: usize,
    idle_timeout_ms: u64,
}

impl SessionTable {
    pub fn new(max_sessions: usize, max_sessions_per_ip: usize, idle_timeout_ms: u64) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            by_ip: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(1),
            max_sessions,
            max_sessions_per_ip,
            idle_timeout_ms,
        }
    }

    pub async fn register(&self, remote_ip: &str) -> Result<u32> {
        {
            let table = self.inner.read().await;
            if table.len() >= self.max_sessions {
                return Err(crate::error::Error::Session(SessionError::LimitReached {
                    limit: self.max_sessions,
                }));
            }
        }
        {
            let mut per_ip = self.by_ip.write().await;
            let count = per_ip.entry(remote_ip.to_string()).or_insert(0);
            if *count >= self.max_sessions_per_ip {
                return Err(crate::error::Error::Session(SessionError::PerIpLimitReached {
                    ip: remote_ip.to_string(),
                    limit: self.max_sessions_per_ip,
                }));
            }
            *count += 1;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(Session {
            id,
            remote_ip: remote_ip.to_string(),
            created_at_ms: now_ms(),
            last_activity_ms: AtomicU64::new(now_ms()),
        });
        self.inner.write().await.insert(id, session);
        Ok(id)
    }

    /// Looks up a session, lazily evicting it if idle past the configured
    /// timeout. This is the only place idleness is checked — there is no
    /// background reaper for this table.
    pub async fn get(&self, id: u32) -> Result<Arc<Session>> {
        let session = {
            let table = self.inner.read().await;
            table.get(&id).cloned()
        };
        let Some(session) = session else {
            return Err(crate::error::Error::Session(SessionError::Unknown { id }));
        };
        let idle = session.idle_ms();
        if idle > self.idle_timeout_ms {
            self.unregister(id).await;
            return Err(crate::error::Error::Session(SessionError::Expired {
                id,
                idle_ms: idle,
                timeout_ms: self.idle_timeout_ms,
            }));
        }
        session.touch();
        Ok(session)
    }

    pub async fn unregister(&self, id: u32) {
        let removed = self.inner.write().await.remove(&id);
        if let Some(session) = removed {
            let mut per_ip = self.by_ip.write().await;
            if let Some(count) = per_ip.get_mut(&session.remote_ip) {
                *count = count.saturating_sub(1);
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Evicts every session idle past the configured timeout, without
    /// waiting for a `get` to touch each one individually. Used by the
    /// server binary's periodic sweep so sessions registered and then
    /// abandoned don't sit in the table indefinitely; the table's own
    /// lookup path still checks idleness lazily regardless of whether this
    /// ever runs.
    pub async fn sweep_idle(&self) -> usize {
        let expired: Vec<u32> = {
            let table = self.inner.read().await;
            table
                .iter()
                .filter(|(_, s)| s.idle_ms() > self.idle_timeout_ms)
                .map(|(id, _)| *id)
                .collect()
        };
        for id in &expired {
            self.unregister(*id).await;
        }
        expired.len()
    }
}

pub struct ConnectionParams {
    pub o_to_t_size: u16,
    pub t_to_o_size: u16,
    pub rpi_us: u32,
}

pub struct Connection {
    pub id: u32,
    pub session_id: u32,
    pub remote_addr: String,
    pub created_at_ms: u64,
    last_activity_ms: AtomicU64,
}

impl Connection {
    pub fn touch(&self) {
        self.last_activity_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn idle_ms(&self) -> u64 {
        now_ms().saturating_sub(self.last_activity_ms.load(Ordering::Relaxed))
    }
}

#[derive(Default)]
pub struct ConnectionTable {
    inner: RwLock<HashMap<u32, Arc<Connection>>>,
    next_serial: AtomicU32,
    connection_timeout_ms: u64,
}

impl ConnectionTable {
    pub fn new(connection_timeout_ms: u64) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            next_serial: AtomicU32::new(0),
            connection_timeout_ms,
        }
    }

    /// Mint a paired O->T / T->O connection ID, per the
    /// `0x10000000 + 2n` / `0x10000000 + 2n + 1` scheme.
    pub fn allocate_pair(&self) -> (u32, u32) {
        let n = self.next_serial.fetch_add(1, Ordering::Relaxed);
        (0x1000_0000 + 2 * n, 0x1000_0000 + 2 * n + 1)
    }

    pub async fn track(&self, conn_id: u32, session_id: u32, remote_addr: &str) {
        let conn = Arc::new(Connection {
            id: conn_id,
            session_id,
            remote_addr: remote_addr.to_string(),
            created_at_ms: now_ms(),
            last_activity_ms: AtomicU64::new(now_ms()),
        });
        self.inner.write().await.insert(conn_id, conn);
    }

    pub async fn touch(&self, conn_id: u32) {
        if let Some(c) = self.inner.read().await.get(&conn_id) {
            c.touch();
        }
    }

    pub async fn untrack(&self, conn_id: u32) {
        self.inner.write().await.remove(&conn_id);
    }

    pub async fn drop_for_session(&self, session_id: u32) {
        self.inner
            .write()
            .await
            .retain(|_, c| c.session_id != session_id);
    }

    pub async fn is_active(&self, conn_id: u32, session_id: u32) -> bool {
        let is_expired = {
            let table = self.inner.read().await;
            match table.get(&conn_id) {
                Some(c) if c.session_id == session_id => c.idle_ms() > self.connection_timeout_ms,
                _ => return false,
            }
        };
        if is_expired {
            self.untrack(conn_id).await;
            return false;
        }
        true
    }

    /// Evicts every connection idle past `connection_timeout_ms`; the
    /// counterpart to `SessionTable::sweep_idle` for the periodic binary
    /// sweep.
    pub async fn sweep_idle(&self) -> usize {
        let expired: Vec<u32> = {
            let table = self.inner.read().await;
            table
                .iter()
                .filter(|(_, c)| c.idle_ms() > self.connection_timeout_ms)
                .map(|(id, _)| *id)
                .collect()
        };
        for id in &expired {
            self.untrack(*id).await;
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn register_then_get_then_unregister() {
        let table = SessionTable::new(10, 10, 60_000);
        let id = table.register("10.0.0.1").await.unwrap();
        assert!(table.get(id).await.is_ok());
        table.unregister(id).await;
        assert!(table.get(id).await.is_err());
    }

    #[tokio::test]
    async fn idle_session_is_evicted_lazily() {
        let table = SessionTable::new(10, 10, 0); // zero timeout: instantly idle
        let id = table.register("10.0.0.1").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert!(matches!(
            table.get(id).await,
            Err(crate::error::Error::Session(SessionError::Expired { .. }))
        ));
        assert_eq!(table.len().await, 0);
    }

    #[tokio::test]
    async fn per_ip_limit_enforced() {
        let table = SessionTable::new(10, 1, 60_000);
        table.register("10.0.0.1").await.unwrap();
        assert!(table.register("10.0.0.1").await.is_err());
        assert!(table.register("10.0.0.2").await.is_ok());
    }

    #[tokio::test]
    async fn connection_pair_allocation_increments() {
        let table = ConnectionTable::new(60_000);
        let (o1, t1) = table.allocate_pair();
        let (o2, t2) = table.allocate_pair();
        assert_eq!((o1, t1), (0x1000_0000, 0x1000_0001));
        assert_eq!((o2, t2), (0x1000_0002, 0x1000_0003));
    }

    #[tokio::test]
    async fn connection_active_until_untracked() {
        let table = ConnectionTable::new(60_000);
        table.track(0x1000_0000, 1, "10.0.0.1:44818").await;
        assert!(table.is_active(0x1000_0000, 1).await);
        table.untrack(0x1000_0000).await;
        assert!(!table.is_active(0x1000_0000, 1).await);
    }

    #[tokio::test]
    async fn sweep_idle_evicts_only_expired_sessions() {
        let table = SessionTable::new(10, 10, 0); // zero timeout: instantly idle
        let id = table.register("10.0.0.1").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(table.sweep_idle().await, 1);
        assert!(table.inner.read().await.get(&id).is_none());
    }

    #[tokio::test]
    async fn connection_sweep_idle_evicts_only_expired_connections() {
        let table = ConnectionTable::new(0); // zero timeout: instantly idle
        table.track(0x1000_0000, 1, "10.0.0.1:44818").await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(table.sweep_idle().await, 1);
        assert!(table.inner.read().await.get(&0x1000_0000).is_none());
    }

    #[tokio::test]
    async fn drop_for_session_removes_all_its_connections() {
        let table = ConnectionTable::new(60_000);
        table.track(0x1000_0000, 1, "a").await;
        table.track(0x1000_0002, 1, "a").await;
        table.track(0x1000_0004, 2, "b").await;
        table.drop_for_session(1).await;
        assert!(!table.is_active(0x1000_0000, 1).await);
        assert!(table.is_active(0x1000_0004, 2).await);
    }
}
