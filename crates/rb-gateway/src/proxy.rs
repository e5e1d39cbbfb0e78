//! Local proxy listeners
//!
//! Each live session gets at most one loopback listener. Every socket accepted
//! on it is handed to the session's connection, which tunnels it to the
//! remote backend.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use rb_core::SessionId;

use crate::registry::RemoteSession;

/// A bound loopback listener. Dropping it stops accepting.
pub struct ListeningServer {
    port: u16,
    cancel: CancellationToken,
}

impl ListeningServer {
    /// Local port the server accepts on
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting new sockets
    pub fn close(&self) {
        if !self.cancel.is_cancelled() {
            tracing::debug!("Closing proxy listener on port {}", self.port);
            self.cancel.cancel();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for ListeningServer {
    fn drop(&mut self) {
        self.close();
    }
}

/// Binds ephemeral loopback listeners
#[derive(Debug, Default, Clone, Copy)]
pub struct ProxyServerProvider;

impl ProxyServerProvider {
    pub fn new() -> Self {
        Self
    }

    /// Bind `127.0.0.1:0` and hand every accepted socket to `on_new_socket`.
    ///
    /// The bind is synchronous so the port is known on return. Must be called
    /// within a tokio runtime.
    pub fn get_proxy_server<F, Fut>(&self, on_new_socket: F) -> io::Result<ListeningServer>
    where
        F: Fn(TcpStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let std_listener =
            std::net::TcpListener::bind(SocketAddr::from((Ipv4Addr::LOCALHOST, 0)))?;
        std_listener.set_nonblocking(true)?;
        let listener = TcpListener::from_std(std_listener)?;
        let port = listener.local_addr()?.port();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((socket, peer)) => {
                            tracing::trace!("Proxy port {} accepted {}", port, peer);
                            tokio::spawn(on_new_socket(socket));
                        }
                        Err(e) => {
                            tracing::warn!("Proxy port {} failed to accept: {}", port, e);
                        }
                    }
                }
            }
            tracing::debug!("Proxy listener on port {} stopped", port);
        });

        tracing::debug!("Proxy listener bound on 127.0.0.1:{}", port);
        Ok(ListeningServer { port, cancel })
    }
}

struct ProxyEntry {
    server: ListeningServer,
    attached: AtomicUsize,
}

/// Per-session proxy listeners with an attach count
pub struct ProxyTable {
    provider: ProxyServerProvider,
    entries: DashMap<SessionId, Arc<ProxyEntry>>,
}

impl ProxyTable {
    pub fn new(provider: ProxyServerProvider) -> Self {
        Self {
            provider,
            entries: DashMap::new(),
        }
    }

    /// Lease the listener for `session`, creating it if absent.
    ///
    /// Fails for a session that has already been removed from the registry.
    pub fn acquire(self: &Arc<Self>, session: &RemoteSession) -> io::Result<ProxyLease> {
        if !session.is_alive() {
            return Err(session_gone(session));
        }

        let entry = self
            .entries
            .entry(session.id.clone())
            .or_try_insert_with(|| {
                let connection = session.connection();
                let server = self.provider.get_proxy_server(move |socket| {
                    let connection = Arc::clone(&connection);
                    async move { connection.forward(socket).await }
                })?;
                tracing::info!(
                    "Proxy for session {} listening on port {}",
                    session.id,
                    server.port()
                );
                Ok::<_, io::Error>(Arc::new(ProxyEntry {
                    server,
                    attached: AtomicUsize::new(0),
                }))
            })?;
        entry.attached.fetch_add(1, Ordering::SeqCst);
        let entry = Arc::clone(entry.value());

        let lease = ProxyLease {
            table: Arc::clone(self),
            id: session.id.clone(),
            entry,
        };

        // Removal may have run between the check above and the insert
        if !session.is_alive() {
            drop(lease);
            return Err(session_gone(session));
        }
        Ok(lease)
    }

    /// Tear down the listener of a removed session regardless of leases
    pub fn dispose_session(&self, id: &SessionId) {
        if let Some((_, entry)) = self.entries.remove(id) {
            tracing::debug!("Disposing proxy for session {}", id);
            entry.server.close();
        }
    }

    /// Port of the current listener for `id`, if any
    pub fn port(&self, id: &SessionId) -> Option<u16> {
        self.entries.get(id).map(|entry| entry.server.port())
    }

    /// Number of sessions holding a listener
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn session_gone(session: &RemoteSession) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        format!("session {} is no longer alive", session.id),
    )
}

impl Default for ProxyTable {
    fn default() -> Self {
        Self::new(ProxyServerProvider::new())
    }
}

/// Attachment to a session's proxy listener; the last lease dropped closes it
pub struct ProxyLease {
    table: Arc<ProxyTable>,
    id: SessionId,
    entry: Arc<ProxyEntry>,
}

impl ProxyLease {
    /// Local port to connect to for this session
    pub fn port(&self) -> u16 {
        self.entry.server.port()
    }
}

impl Drop for ProxyLease {
    fn drop(&mut self) {
        let released = self.table.entries.remove_if(&self.id, |_, entry| {
            Arc::ptr_eq(entry, &self.entry) && entry.attached.fetch_sub(1, Ordering::SeqCst) == 1
        });
        if released.is_some() {
            tracing::debug!("Last lease for session {} released", self.id);
            self.entry.server.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rb_core::traits::Forwarder;
    use rb_core::SessionDescriptor;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use crate::registry::ConnectionRegistry;

    /// Answers every forwarded socket with a fixed greeting
    struct Greeter {
        closed: CancellationToken,
    }

    #[async_trait]
    impl Forwarder for Greeter {
        async fn forward(&self, mut socket: TcpStream) {
            let _ = socket.write_all(b"hello").await;
        }

        fn disconnected(&self) -> CancellationToken {
            self.closed.clone()
        }
    }

    fn session() -> (Arc<ConnectionRegistry>, Arc<RemoteSession>) {
        let registry = Arc::new(ConnectionRegistry::new());
        let handle = registry.register(
            Arc::new(Greeter {
                closed: CancellationToken::new(),
            }),
            SessionDescriptor::ssh("alice@box", 4000),
        );
        let session = registry.get_connection(handle.id()).unwrap();
        (registry, session)
    }

    #[tokio::test]
    async fn test_proxy_server_hands_sockets_to_callback() {
        let server = ProxyServerProvider::new()
            .get_proxy_server(|mut socket: TcpStream| async move {
                let _ = socket.write_all(b"pong").await;
            })
            .unwrap();
        assert_ne!(server.port(), 0);

        let mut client = TcpStream::connect(("127.0.0.1", server.port()))
            .await
            .unwrap();
        let mut reply = String::new();
        client.read_to_string(&mut reply).await.unwrap();
        assert_eq!(reply, "pong");
    }

    #[tokio::test]
    async fn test_closed_server_stops_accepting() {
        let server = ProxyServerProvider::new()
            .get_proxy_server(|_socket: TcpStream| async {})
            .unwrap();
        let port = server.port();
        server.close();
        assert!(server.is_closed());
        drop(server);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(TcpStream::connect(("127.0.0.1", port)).await.is_err());
    }

    #[tokio::test]
    async fn test_acquire_reuses_listener() {
        let (_registry, session) = session();
        let table = Arc::new(ProxyTable::default());

        let first = table.acquire(&session).unwrap();
        let second = table.acquire(&session).unwrap();
        assert_eq!(first.port(), second.port());
        assert_eq!(table.len(), 1);

        let mut client = TcpStream::connect(("127.0.0.1", first.port()))
            .await
            .unwrap();
        let mut reply = String::new();
        client.read_to_string(&mut reply).await.unwrap();
        assert_eq!(reply, "hello");
    }

    #[tokio::test]
    async fn test_last_lease_closes_listener() {
        let (_registry, session) = session();
        let table = Arc::new(ProxyTable::default());

        let first = table.acquire(&session).unwrap();
        let second = table.acquire(&session).unwrap();
        drop(first);
        assert_eq!(table.port(&session.id), Some(second.port()));

        drop(second);
        assert!(table.is_empty());

        let third = table.acquire(&session).unwrap();
        assert_eq!(table.len(), 1);
        drop(third);
    }

    #[tokio::test]
    async fn test_dispose_session_ignores_leases() {
        let (_registry, session) = session();
        let table = Arc::new(ProxyTable::default());

        let lease = table.acquire(&session).unwrap();
        table.dispose_session(&session.id);
        assert!(table.is_empty());
        assert!(lease.entry.server.is_closed());

        // Stale lease must not remove a listener created afterwards
        let fresh = table.acquire(&session).unwrap();
        drop(lease);
        assert_eq!(table.port(&session.id), Some(fresh.port()));
    }

    #[tokio::test]
    async fn test_acquire_refuses_removed_session() {
        let (registry, session) = session();
        let table = Arc::new(ProxyTable::default());

        assert_eq!(registry.len(), 1);
        session.connection().disconnected().cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!session.is_alive());
        assert!(registry.is_empty());

        let err = table.acquire(&session).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
        assert!(table.is_empty());
    }
}
