//! rb-gateway: local side of remote-bridge
//!
//! Keeps the registry of live sessions, allocates a loopback proxy listener
//! per session and routes local HTTP and WebSocket traffic to the session
//! named by the `remoteId` cookie.

pub mod error;
pub mod proxy;
pub mod registry;
pub mod router;
pub mod server;
pub mod state;

pub use error::GatewayError;
pub use proxy::{ListeningServer, ProxyLease, ProxyServerProvider, ProxyTable};
pub use registry::{ConnectionRegistry, RegistryHandle, RemoteSession};
pub use router::{Flow, HandlerChain, RouteContext, RouteHandler, SESSION_COOKIE};
pub use server::{router, serve};
pub use state::GatewayState;
