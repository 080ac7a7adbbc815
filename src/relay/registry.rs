//! Registry of live client sessions
//!
//! The registry is the only structure touched by more than one worker: the
//! accept loop inserts, a session removes itself when it stops, and the
//! fan-out receiver iterates and prunes. Every access goes through one
//! mutex, and nothing awaits or touches a socket while it is held.

use crate::error::RelayResult;
use crate::lifecycle::{Fiber, Status};
use crate::protocol::RelayMessage;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Identifier assigned to each accepted connection
pub type SessionId = u64;

/// A registry entry that can receive fanned-out datagrams
pub trait Subscriber: Fiber {
    /// Unique id of the session
    fn id(&self) -> SessionId;

    /// Hand a datagram to the session without blocking
    fn deliver(&self, msg: &RelayMessage) -> RelayResult<()>;
}

/// Outcome of one fan-out scan
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutReport {
    /// Running sessions that accepted the message
    pub delivered: usize,
    /// Running sessions whose delivery failed
    pub failed: usize,
    /// Stopped sessions removed during the scan
    pub pruned: usize,
    /// Sessions neither running nor stopped
    pub skipped: usize,
}

/// Shared, insertion-ordered set of sessions
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<Mutex<Vec<Arc<dyn Subscriber>>>>,
}

impl fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("len", &self.len())
            .finish()
    }
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<dyn Subscriber>>> {
        // Entries stay consistent even if a holder panicked mid-scan.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a session; returns `false` if its id is already registered
    pub fn insert(&self, session: Arc<dyn Subscriber>) -> bool {
        let mut sessions = self.lock();
        if sessions.iter().any(|s| s.id() == session.id()) {
            return false;
        }
        sessions.push(session);
        true
    }

    /// Remove a session by id; returns `true` if it was present
    pub fn remove(&self, id: SessionId) -> bool {
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|s| s.id() != id);
        sessions.len() != before
    }

    /// Whether a session with `id` is registered
    pub fn contains(&self, id: SessionId) -> bool {
        self.lock().iter().any(|s| s.id() == id)
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Copy of the current entries, in insertion order
    pub fn snapshot(&self) -> Vec<Arc<dyn Subscriber>> {
        self.lock().clone()
    }

    /// Remove and return every entry
    pub fn clear(&self) -> Vec<Arc<dyn Subscriber>> {
        std::mem::take(&mut *self.lock())
    }

    /// Deliver `msg` to every running session, pruning stopped ones
    ///
    /// The lock is held for the whole scan so that no session is added or
    /// removed halfway through. [`Subscriber::deliver`] only enqueues.
    pub fn fan_out(&self, msg: &RelayMessage) -> FanoutReport {
        let mut report = FanoutReport::default();
        let mut sessions = self.lock();

        sessions.retain(|session| match session.status() {
            Status::Running => {
                debug!("Sending response from {} to {}", msg.source, session.name());
                match session.deliver(msg) {
                    Ok(()) => report.delivered += 1,
                    Err(e) => {
                        warn!("Error sending response to {}: {}", session.name(), e);
                        report.failed += 1;
                    }
                }
                true
            }
            Status::Stopped => {
                debug!("Removing stale session {}", session.name());
                report.pruned += 1;
                false
            }
            _ => {
                report.skipped += 1;
                true
            }
        });

        report
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::RelayError;
    use crate::lifecycle::StatusCell;
    use async_trait::async_trait;
    use rand::Rng;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory subscriber counting deliveries
    pub(crate) struct MockSubscriber {
        id: SessionId,
        name: String,
        status: StatusCell,
        fail: bool,
        pub(crate) delivered: AtomicUsize,
    }

    impl MockSubscriber {
        pub(crate) fn new(id: SessionId, status: Status) -> Arc<Self> {
            Arc::new(MockSubscriber {
                id,
                name: format!("mock-{}", id),
                status: StatusCell::new(status),
                fail: false,
                delivered: AtomicUsize::new(0),
            })
        }

        pub(crate) fn failing(id: SessionId) -> Arc<Self> {
            Arc::new(MockSubscriber {
                id,
                name: format!("mock-{}", id),
                status: StatusCell::new(Status::Running),
                fail: true,
                delivered: AtomicUsize::new(0),
            })
        }

        pub(crate) fn set_status(&self, status: Status) {
            self.status.set(status);
        }

        pub(crate) fn count(&self) -> usize {
            self.delivered.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Fiber for MockSubscriber {
        fn name(&self) -> &str {
            &self.name
        }

        fn status(&self) -> Status {
            self.status.get()
        }

        async fn start(&self) -> RelayResult<()> {
            self.status.set(Status::Running);
            Ok(())
        }

        async fn stop(&self) {
            self.status.set(Status::Stopped);
        }
    }

    impl Subscriber for MockSubscriber {
        fn id(&self) -> SessionId {
            self.id
        }

        fn deliver(&self, _msg: &RelayMessage) -> RelayResult<()> {
            if self.fail {
                return Err(RelayError::TransientIo("peer gone".to_string()));
            }
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn message() -> RelayMessage {
        RelayMessage::new(Ipv4Addr::new(192, 0, 2, 1), &b"xyz"[..])
    }

    #[test]
    fn test_insert_rejects_duplicate_id() {
        let registry = SessionRegistry::new();
        assert!(registry.insert(MockSubscriber::new(1, Status::Running)));
        assert!(!registry.insert(MockSubscriber::new(1, Status::Running)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove() {
        let registry = SessionRegistry::new();
        registry.insert(MockSubscriber::new(1, Status::Running));
        registry.insert(MockSubscriber::new(2, Status::Running));

        assert!(registry.remove(1));
        assert!(!registry.remove(1));
        assert!(!registry.contains(1));
        assert!(registry.contains(2));
    }

    #[test]
    fn test_snapshot_keeps_insertion_order() {
        let registry = SessionRegistry::new();
        for id in [3, 1, 2] {
            registry.insert(MockSubscriber::new(id, Status::Running));
        }
        let ids: Vec<_> = registry.snapshot().iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }

    #[test]
    fn test_clear() {
        let registry = SessionRegistry::new();
        registry.insert(MockSubscriber::new(1, Status::Running));
        registry.insert(MockSubscriber::new(2, Status::Running));
        assert_eq!(registry.clear().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_fan_out_reaches_each_running_session_once() {
        let registry = SessionRegistry::new();
        let sessions: Vec<_> = (0..5)
            .map(|id| MockSubscriber::new(id, Status::Running))
            .collect();
        for s in &sessions {
            registry.insert(s.clone());
        }

        let report = registry.fan_out(&message());
        assert_eq!(report.delivered, 5);
        for s in &sessions {
            assert_eq!(s.count(), 1);
        }
    }

    #[test]
    fn test_fan_out_prunes_stopped_sessions() {
        let registry = SessionRegistry::new();
        let live = MockSubscriber::new(1, Status::Running);
        let dead = MockSubscriber::new(2, Status::Stopped);
        let starting = MockSubscriber::new(3, Status::Starting);
        registry.insert(live.clone());
        registry.insert(dead.clone());
        registry.insert(starting.clone());

        let report = registry.fan_out(&message());
        assert_eq!(
            report,
            FanoutReport {
                delivered: 1,
                failed: 0,
                pruned: 1,
                skipped: 1,
            }
        );
        assert_eq!(dead.count(), 0);
        assert_eq!(starting.count(), 0);
        assert!(!registry.contains(2));
        assert!(registry.contains(3));
    }

    #[test]
    fn test_fan_out_continues_after_failed_delivery() {
        let registry = SessionRegistry::new();
        let first = MockSubscriber::new(1, Status::Running);
        let broken = MockSubscriber::failing(2);
        let last = MockSubscriber::new(3, Status::Running);
        registry.insert(first.clone());
        registry.insert(broken);
        registry.insert(last.clone());

        let report = registry.fan_out(&message());
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(first.count(), 1);
        assert_eq!(last.count(), 1);
        // A failed delivery does not evict the session.
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_fan_out_after_stop_skips_session() {
        let registry = SessionRegistry::new();
        let session = MockSubscriber::new(1, Status::Running);
        registry.insert(session.clone());

        registry.fan_out(&message());
        session.set_status(Status::Stopped);
        registry.fan_out(&message());

        assert_eq!(session.count(), 1);
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_insert_and_fan_out() {
        const ROUNDS: u64 = 200;
        let registry = SessionRegistry::new();

        let inserter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let mut sessions = Vec::new();
                for id in 0..ROUNDS {
                    let session = MockSubscriber::new(id, Status::Running);
                    assert!(registry.insert(session.clone()));
                    sessions.push(session);
                    let pause = rand::thread_rng().gen_bool(0.3);
                    if pause {
                        tokio::task::yield_now().await;
                    }
                }
                sessions
            })
        };

        let scanner = {
            let registry = registry.clone();
            tokio::spawn(async move {
                let mut scans = 0;
                while registry.len() < ROUNDS as usize {
                    registry.fan_out(&message());
                    scans += 1;
                    let pause = rand::thread_rng().gen_bool(0.5);
                    if pause {
                        tokio::task::yield_now().await;
                    }
                }
                scans
            })
        };

        let sessions = inserter.await.unwrap();
        let scans = scanner.await.unwrap();

        assert_eq!(registry.len(), ROUNDS as usize);
        let mut ids: Vec<_> = registry.snapshot().iter().map(|s| s.id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), ROUNDS as usize);

        for s in &sessions {
            assert!(s.count() <= scans);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_remove_and_fan_out() {
        let registry = SessionRegistry::new();
        let sessions: Vec<_> = (0..100)
            .map(|id| MockSubscriber::new(id, Status::Running))
            .collect();
        for s in &sessions {
            registry.insert(s.clone());
        }

        let remover = {
            let registry = registry.clone();
            let sessions = sessions.clone();
            tokio::spawn(async move {
                for s in sessions.iter().filter(|s| s.id() % 2 == 0) {
                    s.set_status(Status::Stopped);
                    registry.remove(s.id());
                    tokio::task::yield_now().await;
                }
            })
        };

        for _ in 0..50 {
            registry.fan_out(&message());
            tokio::task::yield_now().await;
        }
        remover.await.unwrap();
        registry.fan_out(&message());

        assert_eq!(registry.len(), 50);
        assert!(registry.snapshot().iter().all(|s| s.id() % 2 == 1));
        for s in sessions.iter().filter(|s| s.id() % 2 == 1) {
            assert_eq!(s.count(), 51);
        }
    }
}
