//! In-memory CWMP session state, keyed by CPE remote address (`spec.md` §3
//! "Session", §9 "Session state").
//!
//! A process-wide `DashMap` (teacher's idiom throughout `services::cdr` and
//! `services::sip_router`) replaces the source's concurrent map one-for-one;
//! it is not shared across processes and does not need to be. Expiry is lazy:
//! [`SessionManager::insert`] sweeps entries older than the configured idle
//! timeout before inserting the new one, so a long-idle gateway does not need
//! a background reaper task.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// Per-session state for one in-progress CWMP exchange.
#[derive(Debug, Clone)]
pub struct Session {
    pub device_id: Uuid,
    pub serial_number: String,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl Session {
    pub fn new(device_id: Uuid, serial_number: String) -> Self {
        let now = Utc::now();
        Self { device_id, serial_number, started_at: now, last_activity: now }
    }
}

/// Holds one [`Session`] per remote address for the duration of a CWMP
/// exchange. Mutated only by `core::dispatcher`.
pub struct SessionManager {
    sessions: DashMap<SocketAddr, Session>,
    idle_timeout: Duration,
}

impl SessionManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self { sessions: DashMap::new(), idle_timeout }
    }

    /// Sweep sessions whose `last_activity` predates the idle timeout, then
    /// insert/replace the session for `remote_addr`.
    pub fn insert(&self, remote_addr: SocketAddr, session: Session) {
        self.sweep();
        self.sessions.insert(remote_addr, session);
    }

    pub fn get(&self, remote_addr: &SocketAddr) -> Option<Session> {
        self.sessions.get(remote_addr).map(|s| s.clone())
    }

    /// Record activity on an existing session (called after every
    /// request/response leg so the idle sweep doesn't reap a live session).
    pub fn touch(&self, remote_addr: &SocketAddr) {
        if let Some(mut session) = self.sessions.get_mut(remote_addr) {
            session.last_activity = Utc::now();
        }
    }

    /// End a session (§4.5: a 204 response ends the session).
    pub fn remove(&self, remote_addr: &SocketAddr) {
        self.sessions.remove(remote_addr);
    }

    fn sweep(&self) {
        let cutoff = Utc::now() - ChronoDuration::from_std(self.idle_timeout).unwrap_or_default();
        self.sessions.retain(|_, session| session.last_activity > cutoff);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn insert_and_get_round_trips() {
        let manager = SessionManager::new(Duration::from_secs(120));
        let session = Session::new(Uuid::new_v4(), "ABC123".to_string());
        manager.insert(addr(1), session.clone());
        let found = manager.get(&addr(1)).unwrap();
        assert_eq!(found.device_id, session.device_id);
    }

    #[test]
    fn expired_session_is_swept_on_next_insert() {
        let manager = SessionManager::new(Duration::from_secs(0));
        manager.insert(addr(1), Session::new(Uuid::new_v4(), "A".to_string()));
        std::thread::sleep(Duration::from_millis(5));
        manager.insert(addr(2), Session::new(Uuid::new_v4(), "B".to_string()));
        assert!(manager.get(&addr(1)).is_none());
        assert!(manager.get(&addr(2)).is_some());
    }

    #[test]
    fn remove_ends_session() {
        let manager = SessionManager::new(Duration::from_secs(120));
        manager.insert(addr(1), Session::new(Uuid::new_v4(), "A".to_string()));
        manager.remove(&addr(1));
        assert!(manager.get(&addr(1)).is_none());
    }
}
