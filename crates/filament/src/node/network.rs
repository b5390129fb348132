//! The network-facing side of the router.
//!
//! One [`Connection`] per connected peer, kept in a concurrent table.
//! Outbound lookups go: existing connection, static route table, resolver;
//! a successful route is dialed, handshaken and handed to the proto layer,
//! whose `serve` runs on its own task until the peer drops. Serve returning
//! fires `route_node_down`, which synthesizes `noconnection` signals for
//! everything that crossed the edge.

use crate::atom::Atom;
use crate::node::connection::{Connection, Handshake, Proto};
use crate::node::core::Core;
use crate::node::error::NodeError;
use crate::node::options::{NodeOptions, TlsMode};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Options published to the resolver at registration time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolverOptions {
    /// Handshake version the node accepts.
    pub handshake_version: u16,
    /// Whether the node listens with TLS.
    pub enable_tls: bool,
    /// Whether the node accepts proxied connections.
    pub enable_proxy: bool,
}

/// Per-route options.
#[derive(Clone, Default)]
pub struct RouteOptions {
    /// Shared secret for the handshake.
    pub cookie: String,
    /// Dial with TLS.
    pub enable_tls: bool,
    /// Peer is reachable through a proxy. Reserved.
    pub enable_proxy: bool,
    /// Peer speaks the native dialect; decides which handshake flavor the
    /// dialer runs.
    pub native: bool,
    /// Handshake override for this route.
    pub handshake: Option<Arc<dyn Handshake>>,
    /// Proto override for this route.
    pub proto: Option<Arc<dyn Proto>>,
}

impl std::fmt::Debug for RouteOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteOptions")
            .field("enable_tls", &self.enable_tls)
            .field("enable_proxy", &self.enable_proxy)
            .field("native", &self.native)
            .finish_non_exhaustive()
    }
}

/// A resolved path to a peer node.
#[derive(Debug, Clone)]
pub struct Route {
    /// Peer node name (`name@host`).
    pub node: String,
    /// Host to dial.
    pub host: String,
    /// Port to dial.
    pub port: u16,
    /// Route options.
    pub options: RouteOptions,
}

/// The name-resolution contract (an EPMD-like port mapper).
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Publishes this node's listening port.
    async fn register(
        &self,
        nodename: Atom,
        port: u16,
        options: ResolverOptions,
    ) -> Result<(), NodeError>;

    /// Resolves a peer name to a dialable route.
    async fn resolve(&self, peername: &str) -> Result<Route, NodeError>;
}

/// A resolver over a fixed route table. Useful for clusters with known
/// topology and for tests.
#[derive(Default)]
pub struct StaticResolver {
    routes: Mutex<HashMap<String, Route>>,
}

impl StaticResolver {
    /// Creates an empty static resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a route for `peername`.
    pub fn add(&self, route: Route) {
        self.routes.lock().insert(route.node.clone(), route);
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn register(
        &self,
        _nodename: Atom,
        _port: u16,
        _options: ResolverOptions,
    ) -> Result<(), NodeError> {
        Ok(())
    }

    async fn resolve(&self, peername: &str) -> Result<Route, NodeError> {
        self.routes
            .lock()
            .get(peername)
            .cloned()
            .ok_or(NodeError::NoRoute)
    }
}

pub(crate) struct NetworkState {
    router: Weak<Core>,
    connections: DashMap<Atom, Arc<dyn Connection>>,
    routes: Mutex<HashMap<String, Route>>,
    resolver: Option<Arc<dyn Resolver>>,
    handshake: Option<Arc<dyn Handshake>>,
    proto: Option<Arc<dyn Proto>>,
    static_routes_only: bool,
    tls: TlsMode,
    listen_range: (u16, u16),
    listen_port: Mutex<Option<u16>>,
}

impl NetworkState {
    pub(crate) fn new(options: &NodeOptions, router: Weak<Core>) -> Self {
        Self {
            router,
            connections: DashMap::new(),
            routes: Mutex::new(HashMap::new()),
            resolver: options.resolver.clone(),
            handshake: options.handshake.clone(),
            proto: options.proto.clone(),
            static_routes_only: options.static_routes_only,
            tls: options.tls,
            listen_range: options.listen_range(),
            listen_port: Mutex::new(None),
        }
    }

    pub(crate) fn router_handle(&self) -> Option<Arc<Core>> {
        self.router.upgrade()
    }

    pub(crate) fn forget_connection(&self, name: Atom) {
        self.connections.remove(&name);
    }

    pub(crate) fn listen_port(&self) -> Option<u16> {
        *self.listen_port.lock()
    }
}

impl Core {
    /// Returns the connection to `node`, dialing it if not yet connected.
    pub(crate) async fn get_connection(
        &self,
        node: Atom,
    ) -> Result<Arc<dyn Connection>, NodeError> {
        if node == self.node_name() {
            return Err(NodeError::NoRoute);
        }
        if let Some(connection) = self.network.connections.get(&node) {
            return Ok(connection.clone());
        }

        let route = self.resolve_route(node.as_str()).await?;
        self.dial(node, route).await
    }

    /// Resolution order: static route table, then the resolver unless the
    /// node runs with static routes only.
    async fn resolve_route(&self, peername: &str) -> Result<Route, NodeError> {
        if let Some(route) = { self.network.routes.lock().get(peername).cloned() } {
            return Ok(route);
        }
        if self.network.static_routes_only {
            return Err(NodeError::NoRoute);
        }
        match &self.network.resolver {
            Some(resolver) => resolver.resolve(peername).await,
            None => Err(NodeError::NoRoute),
        }
    }

    async fn dial(&self, node: Atom, route: Route) -> Result<Arc<dyn Connection>, NodeError> {
        let handshake = route
            .options
            .handshake
            .clone()
            .or_else(|| self.network.handshake.clone())
            .ok_or(NodeError::NoRoute)?;
        let proto = route
            .options
            .proto
            .clone()
            .or_else(|| self.network.proto.clone())
            .ok_or(NodeError::NoRoute)?;
        let router = self
            .network
            .router_handle()
            .ok_or(NodeError::NoRoute)?;

        debug!(node = %self.node_name(), peer = %node, host = %route.host, port = route.port, "dialing peer");
        let mut stream = TcpStream::connect((route.host.as_str(), route.port)).await?;

        let tls = route.options.enable_tls || self.network.tls != TlsMode::Disabled;
        let proto_options = handshake.start(&mut stream, tls).await?;
        let connection = proto
            .init(stream, node, proto_options, router.clone() as Arc<dyn CoreRouterDyn>)
            .await?;

        self.install_connection(node, connection, proto)
    }

    /// Inserts a connection and starts its serve task. Loses the race to a
    /// concurrent dial gracefully by returning the winner.
    pub(crate) fn install_connection(
        &self,
        node: Atom,
        connection: Arc<dyn Connection>,
        proto: Arc<dyn Proto>,
    ) -> Result<Arc<dyn Connection>, NodeError> {
        use dashmap::mapref::entry::Entry;

        match self.network.connections.entry(node) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(connection.clone());
                info!(node = %self.node_name(), peer = %node, "peer connected");

                let token = self.scope().child_token();
                let serve_connection = connection.clone();
                let router = self.network.router_handle();
                tokio::spawn(async move {
                    proto.serve(token, serve_connection).await;
                    if let Some(core) = router {
                        core.route_node_down(node).await;
                    }
                });
                Ok(connection)
            }
        }
    }

    /// Binds the listener and starts accepting peers. A node without a
    /// handshake and proto is local-only and skips this.
    pub(crate) async fn start_network(self: &Arc<Self>) -> Result<Option<u16>, NodeError> {
        let (Some(handshake), Some(proto)) = (
            self.network.handshake.clone(),
            self.network.proto.clone(),
        ) else {
            debug!(node = %self.node_name(), "no handshake/proto configured, running local-only");
            return Ok(None);
        };

        handshake.init(self.node_name(), self.creation())?;

        let (begin, end) = self.network.listen_range;
        let mut bound = None;
        let mut last_error = std::io::Error::other("empty listen range");
        for port in begin..=end {
            match TcpListener::bind(("0.0.0.0", port)).await {
                Ok(listener) => {
                    bound = Some((listener, port));
                    break;
                }
                Err(e) => last_error = e,
            }
        }
        let Some((listener, port)) = bound else {
            return Err(NodeError::Io(last_error));
        };
        *self.network.listen_port.lock() = Some(port);
        info!(node = %self.node_name(), port, "listening for peers");

        if let Some(resolver) = &self.network.resolver {
            resolver
                .register(
                    self.node_name(),
                    port,
                    ResolverOptions {
                        handshake_version: handshake.version(),
                        enable_tls: self.network.tls != TlsMode::Disabled,
                        enable_proxy: false,
                    },
                )
                .await?;
        }

        let core = self.clone();
        let token = self.scope().child_token();
        let tls = self.network.tls != TlsMode::Disabled;
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = token.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                let (stream, addr) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                debug!(peer_addr = %addr, "incoming connection");
                let core = core.clone();
                let handshake = handshake.clone();
                let proto = proto.clone();
                tokio::spawn(async move {
                    if let Err(e) = core.accept_peer(stream, handshake, proto, tls).await {
                        warn!(error = %e, "incoming connection rejected");
                    }
                });
            }
        });

        Ok(Some(port))
    }

    async fn accept_peer(
        self: Arc<Self>,
        mut stream: TcpStream,
        handshake: Arc<dyn Handshake>,
        proto: Arc<dyn Proto>,
        tls: bool,
    ) -> Result<(), NodeError> {
        let (peer_name, proto_options) = handshake.accept(&mut stream, tls).await?;
        let peer = Atom::new(&peer_name);
        let connection = proto
            .init(
                stream,
                peer,
                proto_options,
                self.clone() as Arc<dyn CoreRouterDyn>,
            )
            .await?;
        self.install_connection(peer, connection, proto)?;
        Ok(())
    }

    //
    // Static routes
    //

    pub(crate) fn add_static_route(&self, route: Route) -> Result<(), NodeError> {
        let mut routes = self.network.routes.lock();
        if routes.contains_key(&route.node) {
            return Err(NodeError::Taken);
        }
        routes.insert(route.node.clone(), route);
        Ok(())
    }

    pub(crate) fn remove_static_route(&self, name: &str) -> bool {
        self.network.routes.lock().remove(name).is_some()
    }

    pub(crate) fn static_routes(&self) -> Vec<Route> {
        self.network.routes.lock().values().cloned().collect()
    }

    //
    // Peer inventory
    //

    pub(crate) fn nodes(&self) -> Vec<Atom> {
        self.network
            .connections
            .iter()
            .map(|entry| *entry.key())
            .collect()
    }

    pub(crate) async fn disconnect(&self, node: Atom) -> Result<(), NodeError> {
        if self.network.connections.get(&node).is_none() {
            return Err(NodeError::NoRoute);
        }
        self.route_node_down(node).await;
        Ok(())
    }
}

// `Proto::init` takes `Arc<dyn CoreRouter>`; this alias keeps the casts in
// one place.
use crate::node::router::CoreRouter as CoreRouterDyn;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom;

    fn route(node: &str, port: u16) -> Route {
        Route {
            node: node.to_string(),
            host: "127.0.0.1".to_string(),
            port,
            options: RouteOptions::default(),
        }
    }

    #[tokio::test]
    async fn test_static_resolver() {
        let resolver = StaticResolver::new();
        resolver.add(route("peer@host", 17001));

        let found = resolver.resolve("peer@host").await.unwrap();
        assert_eq!(found.port, 17001);
        assert!(matches!(
            resolver.resolve("nobody@host").await,
            Err(NodeError::NoRoute)
        ));
    }

    #[tokio::test]
    async fn test_static_resolver_register_is_noop() {
        let resolver = StaticResolver::new();
        resolver
            .register(atom!("me@host"), 17000, ResolverOptions::default())
            .await
            .unwrap();
    }
}
