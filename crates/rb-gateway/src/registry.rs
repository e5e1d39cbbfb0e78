//! Registry of live remote sessions
//!
//! Sessions are keyed by [`SessionId`] and removed exactly once, either when
//! their [`RegistryHandle`] is disposed or when the underlying connection
//! reports a disconnect, whichever comes first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use rb_core::traits::Forwarder;
use rb_core::{SessionDescriptor, SessionId};

/// Called synchronously after a session leaves the registry
pub type RemovalListener = Box<dyn Fn(&SessionId) + Send + Sync>;

/// A registered remote session
pub struct RemoteSession {
    /// Session identifier (also the `remoteId` cookie value)
    pub id: SessionId,
    /// Label, kind and port supplied at registration
    pub descriptor: SessionDescriptor,
    connection: Arc<dyn Forwarder>,
    alive: AtomicBool,
}

impl RemoteSession {
    /// Connection used to forward sockets for this session
    pub fn connection(&self) -> Arc<dyn Forwarder> {
        Arc::clone(&self.connection)
    }

    /// False once the session has been removed
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Process-wide table of live sessions
pub struct ConnectionRegistry {
    sessions: DashMap<SessionId, Arc<RemoteSession>>,
    listeners: Vec<RemovalListener>,
}

impl ConnectionRegistry {
    /// Create an empty registry without removal listeners
    pub fn new() -> Self {
        Self::with_listeners(Vec::new())
    }

    /// Create an empty registry that notifies `listeners` on every removal
    pub fn with_listeners(listeners: Vec<RemovalListener>) -> Self {
        Self {
            sessions: DashMap::new(),
            listeners,
        }
    }

    /// Register a connection under a fresh session id.
    ///
    /// The session is removed when the returned handle is disposed or when
    /// `connection` signals a disconnect. Must be called within a tokio runtime.
    pub fn register(
        self: &Arc<Self>,
        connection: Arc<dyn Forwarder>,
        descriptor: SessionDescriptor,
    ) -> RegistryHandle {
        let id = SessionId::generate(&descriptor.label);
        let disconnected = connection.disconnected();

        tracing::info!("Registered session {} ({})", id, descriptor.label);
        let session = Arc::new(RemoteSession {
            id: id.clone(),
            descriptor,
            connection,
            alive: AtomicBool::new(true),
        });
        self.sessions.insert(id.clone(), session);

        let handle = RegistryHandle {
            id,
            registry: Arc::downgrade(self),
            removed: Arc::new(AtomicBool::new(false)),
            disposed: CancellationToken::new(),
        };

        let watcher = handle.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = disconnected.cancelled() => {
                    tracing::info!("Session {} disconnected", watcher.id);
                    watcher.dispose();
                }
                _ = watcher.disposed.cancelled() => {}
            }
        });

        handle
    }

    /// Look up a live session
    pub fn get_connection(&self, id: &SessionId) -> Option<Arc<RemoteSession>> {
        self.sessions
            .get(id)
            .map(|r| Arc::clone(r.value()))
            .filter(|session| session.is_alive())
    }

    /// List all live sessions
    pub fn list(&self) -> Vec<Arc<RemoteSession>> {
        self.sessions.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if no session is registered
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn remove(&self, id: &SessionId) {
        let Some((_, session)) = self.sessions.remove(id) else {
            return;
        };
        session.alive.store(false, Ordering::SeqCst);
        tracing::debug!("Removed session {}", id);

        for listener in &self.listeners {
            listener(id);
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to a registered session. Clones share the same disposal state.
#[derive(Clone)]
pub struct RegistryHandle {
    id: SessionId,
    registry: Weak<ConnectionRegistry>,
    removed: Arc<AtomicBool>,
    disposed: CancellationToken,
}

impl RegistryHandle {
    /// The session id assigned at registration
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Remove the session. Idempotent.
    pub fn dispose(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disposed.cancel();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.id);
        }
    }

    /// Whether the session has been removed
    pub fn is_disposed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::net::TcpStream;

    struct IdleConnection {
        closed: CancellationToken,
    }

    #[async_trait]
    impl Forwarder for IdleConnection {
        async fn forward(&self, _socket: TcpStream) {}

        fn disconnected(&self) -> CancellationToken {
            self.closed.clone()
        }
    }

    fn recording_registry() -> (Arc<ConnectionRegistry>, Arc<Mutex<Vec<SessionId>>>) {
        let removed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&removed);
        let listener: RemovalListener = Box::new(move |id| sink.lock().unwrap().push(id.clone()));
        (
            Arc::new(ConnectionRegistry::with_listeners(vec![listener])),
            removed,
        )
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = Arc::new(ConnectionRegistry::new());
        let connection = Arc::new(IdleConnection {
            closed: CancellationToken::new(),
        });

        let handle = registry.register(connection, SessionDescriptor::ssh("alice@box", 4000));
        let session = registry.get_connection(handle.id()).unwrap();
        assert_eq!(session.descriptor.label, "alice@box");
        assert_eq!(session.descriptor.kind, "ssh");
        assert!(session.is_alive());
        assert_eq!(registry.len(), 1);

        let stale = SessionId::from("0000");
        assert!(registry.get_connection(&stale).is_none());
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let registry = Arc::new(ConnectionRegistry::new());
        let a = registry.register(
            Arc::new(IdleConnection {
                closed: CancellationToken::new(),
            }),
            SessionDescriptor::ssh("alice@box", 1),
        );
        let b = registry.register(
            Arc::new(IdleConnection {
                closed: CancellationToken::new(),
            }),
            SessionDescriptor::ssh("alice@box", 1),
        );
        assert_ne!(a.id(), b.id());
        assert_eq!(registry.list().len(), 2);
    }

    #[tokio::test]
    async fn test_double_dispose_is_noop() {
        let (registry, removed) = recording_registry();
        let closed = CancellationToken::new();
        let handle = registry.register(
            Arc::new(IdleConnection {
                closed: closed.clone(),
            }),
            SessionDescriptor::ssh("alice@box", 1),
        );

        handle.dispose();
        handle.dispose();
        assert!(handle.is_disposed());
        assert!(registry.is_empty());

        // Disconnect after manual disposal must not remove anything again
        closed.cancel();
        settle().await;
        assert_eq!(removed.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_removes_once() {
        let (registry, removed) = recording_registry();
        let closed = CancellationToken::new();
        let handle = registry.register(
            Arc::new(IdleConnection {
                closed: closed.clone(),
            }),
            SessionDescriptor::ssh("alice@box", 1),
        );
        let session = registry.get_connection(handle.id()).unwrap();

        closed.cancel();
        settle().await;
        assert!(registry.get_connection(handle.id()).is_none());
        assert!(!session.is_alive());
        assert!(handle.is_disposed());

        handle.dispose();
        assert_eq!(removed.lock().unwrap().as_slice(), &[handle.id().clone()]);
    }
}
