//! The node: lifecycle, public surface and the router it is built around.
//!
//! A [`Node`] is a long-lived object with an explicit
//! `start -> stop -> wait` lifecycle; nothing here is a process-wide
//! singleton, so several nodes can coexist in one program (the tests do
//! exactly that). Stopping the node cancels the root scope, which fans out
//! to every process and every peer connection.

mod connection;
pub(crate) mod core;
mod error;
mod monitor;
mod network;
mod options;
mod process;
mod router;

pub use connection::{Connection, Handshake, Proto, ProtoFlags, ProtoOptions};
pub use error::NodeError;
pub use network::{Resolver, ResolverOptions, Route, RouteOptions, StaticResolver};
pub use options::{NodeOptions, ProxyMode, TlsMode, Version, DEFAULT_LISTEN_BEGIN, DEFAULT_LISTEN_END};
pub use process::{Process, ProcessContext, ProcessInfo, ProcessOptions, DEFAULT_MAILBOX_CAPACITY};
pub use router::{CoreRouter, RemoteSpawnRequest};

use crate::atom::Atom;
use crate::behavior::{ProcessBehavior, RegisteredBehavior};
use crate::core::{Alias, Pid, ProcessId, Ref, Term};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// The behavior group searched by incoming remote spawn requests.
pub const REMOTE_SPAWN_GROUP: &str = "remote_spawn";

/// A running node.
///
/// Cloning is cheap; all clones drive the same node.
///
/// # Example
///
/// ```ignore
/// let node = Node::start("demo@localhost", NodeOptions::default()).await?;
/// let process = node.spawn(Box::new(MyActor::default()), vec![]).await?;
/// node.stop();
/// node.wait().await;
/// ```
#[derive(Clone)]
pub struct Node {
    core: Arc<core::Core>,
}

impl Node {
    /// Starts a node named `name` (must have the form `name@host`).
    ///
    /// With a handshake and proto configured in `options`, the node binds a
    /// listener and accepts peers; without them it runs local-only.
    pub async fn start(name: impl AsRef<str>, options: NodeOptions) -> Result<Self, NodeError> {
        let name = name.as_ref();
        let valid = matches!(
            name.split_once('@'),
            Some((short, host)) if !short.is_empty() && !host.is_empty()
        );
        if !valid {
            return Err(NodeError::InvalidNodeName(name.to_string()));
        }

        let core = core::Core::new(Atom::new(name), &options);
        core.start_network().await?;
        info!(node = %name, creation = core.creation(), "node started");
        Ok(Self { core })
    }

    /// Returns the node name.
    pub fn name(&self) -> Atom {
        self.core.node_name()
    }

    /// Returns the creation epoch of this incarnation.
    pub fn creation(&self) -> u32 {
        self.core.creation()
    }

    /// Returns version information.
    pub fn version(&self) -> Version {
        Version::default()
    }

    /// Returns `true` until [`stop`](Self::stop) is called.
    pub fn is_alive(&self) -> bool {
        self.core.is_alive()
    }

    /// Seconds since the node booted.
    pub fn uptime(&self) -> u64 {
        self.core.uptime()
    }

    /// The port the node listens on, when networking is configured.
    pub fn listen_port(&self) -> Option<u16> {
        self.core.network.listen_port()
    }

    /// Returns the router: the uniform dispatch surface used by proto
    /// implementations and by anything that needs to send or signal from
    /// outside a process.
    pub fn router(&self) -> Arc<dyn CoreRouter> {
        self.core.clone()
    }

    /// Mints a unique reference.
    pub fn make_ref(&self) -> Ref {
        self.core.make_ref()
    }

    //
    // Spawning
    //

    /// Spawns an unnamed process with default options.
    pub async fn spawn(
        &self,
        behavior: Box<dyn ProcessBehavior>,
        args: Vec<Term>,
    ) -> Result<Arc<Process>, NodeError> {
        self.core
            .spawn(None, None, ProcessOptions::default(), behavior, args)
            .await
    }

    /// Spawns a process with a registered name and/or custom options.
    ///
    /// A name that is already registered fails with [`NodeError::Taken`]
    /// and leaves no trace of the process.
    pub async fn spawn_opts(
        &self,
        name: Option<&str>,
        opts: ProcessOptions,
        behavior: Box<dyn ProcessBehavior>,
        args: Vec<Term>,
    ) -> Result<Arc<Process>, NodeError> {
        self.core
            .spawn(name.map(str::to_string), None, opts, behavior, args)
            .await
    }

    //
    // Registry
    //

    /// Registers `name` for `pid`. Names are unique per node.
    pub fn register_name(&self, name: &str, pid: Pid) -> Result<(), NodeError> {
        self.core.register_name(name, pid)
    }

    /// Releases a registered name.
    pub fn unregister_name(&self, name: &str) -> Result<(), NodeError> {
        self.core.unregister_name(name)
    }

    /// Looks up a live process by pid.
    pub fn process_by_pid(&self, pid: Pid) -> Option<Arc<Process>> {
        self.core.process_by_pid(pid)
    }

    /// Looks up a live process by registered name.
    pub fn process_by_name(&self, name: &str) -> Option<Arc<Process>> {
        self.core.process_by_name(name)
    }

    /// Looks up a live process by alias.
    pub fn process_by_alias(&self, alias: Alias) -> Option<Arc<Process>> {
        self.core.process_by_alias(alias)
    }

    /// Returns `true` if `alias` is currently registered.
    pub fn is_alias(&self, alias: Alias) -> bool {
        self.core.is_alias(alias)
    }

    /// Mints a new alias for a live process.
    pub fn new_alias(&self, pid: Pid) -> Result<Alias, NodeError> {
        let process = self.core.process_by_pid(pid).ok_or(NodeError::ProcessUnknown)?;
        self.core.new_alias(&process)
    }

    /// Revokes an alias on behalf of its owner.
    pub fn delete_alias(&self, owner: Pid, alias: Alias) -> Result<(), NodeError> {
        let process = self
            .core
            .process_by_pid(owner)
            .ok_or(NodeError::ProcessUnknown)?;
        self.core.delete_alias(&process, alias)
    }

    /// Every process currently in the registry.
    pub fn process_list(&self) -> Vec<Arc<Process>> {
        self.core.process_list()
    }

    /// A snapshot of one process, including link and monitor edges.
    pub fn process_info(&self, pid: Pid) -> Option<ProcessInfo> {
        let process = self.core.process_by_pid(pid)?;
        Some(ProcessInfo {
            pid,
            name: process.name().map(str::to_string),
            parent: process.parent(),
            group_leader: process.group_leader(),
            alive: process.is_alive(),
            trap_exit: process.trap_exit(),
            aliases: process.aliases_snapshot(),
            mailbox_queue_len: process.mailbox_queue_len(),
            links: self.core.links(pid),
            monitors: self.core.monitors(pid),
            monitors_by_name: self.core.monitors_by_name(pid),
            monitored_by: self.core.monitored_by(pid),
        })
    }

    /// Pids linked to `pid`.
    pub fn links(&self, pid: Pid) -> Vec<Pid> {
        self.core.links(pid)
    }

    /// Pids monitored by `pid`.
    pub fn monitors(&self, pid: Pid) -> Vec<Pid> {
        self.core.monitors(pid)
    }

    /// Registered names monitored by `pid`.
    pub fn monitors_by_name(&self, pid: Pid) -> Vec<ProcessId> {
        self.core.monitors_by_name(pid)
    }

    /// Pids monitoring `pid`.
    pub fn monitored_by(&self, pid: Pid) -> Vec<Pid> {
        self.core.monitored_by(pid)
    }

    //
    // Behavior groups
    //

    /// Registers a behavior under `(group, name)`. Unique per pair.
    pub fn register_behavior(
        &self,
        group: &str,
        name: &str,
        behavior: RegisteredBehavior,
    ) -> Result<(), NodeError> {
        self.core.register_behavior(group, name, behavior)
    }

    /// Looks up one registered behavior.
    pub fn registered_behavior(
        &self,
        group: &str,
        name: &str,
    ) -> Result<RegisteredBehavior, NodeError> {
        self.core.registered_behavior(group, name)
    }

    /// All behaviors registered in `group`.
    pub fn registered_behavior_group(&self, group: &str) -> Vec<RegisteredBehavior> {
        self.core.registered_behavior_group(group)
    }

    /// Removes a behavior registration; empty groups are purged.
    pub fn unregister_behavior(&self, group: &str, name: &str) -> Result<(), NodeError> {
        self.core.unregister_behavior(group, name)
    }

    /// Makes a behavior spawnable by peers via remote spawn requests.
    pub fn provide_remote_spawn(
        &self,
        name: &str,
        behavior: RegisteredBehavior,
    ) -> Result<(), NodeError> {
        self.core
            .register_behavior(REMOTE_SPAWN_GROUP, name, behavior)
    }

    /// Revokes a remote-spawnable behavior.
    pub fn revoke_remote_spawn(&self, name: &str) -> Result<(), NodeError> {
        self.core.unregister_behavior(REMOTE_SPAWN_GROUP, name)
    }

    //
    // Environment
    //

    /// Reads a node environment entry.
    pub fn env(&self, key: &str) -> Option<Term> {
        self.core.env_get(key)
    }

    /// Sets a node environment entry. Inherited by processes spawned
    /// afterwards.
    pub fn set_env(&self, key: impl Into<String>, value: impl Into<Term>) {
        self.core.env_set(key.into(), value.into())
    }

    //
    // Network
    //

    /// Dials a peer node (or returns the existing connection).
    pub async fn connect(&self, peer: &str) -> Result<(), NodeError> {
        self.core.get_connection(Atom::new(peer)).await.map(|_| ())
    }

    /// Drops the connection to a peer, synthesizing `noconnection` signals
    /// for everything that crossed it.
    pub async fn disconnect(&self, peer: &str) -> Result<(), NodeError> {
        self.core.disconnect(Atom::new(peer)).await
    }

    /// Names of currently connected peers.
    pub fn nodes(&self) -> Vec<Atom> {
        self.core.nodes()
    }

    /// Adds a static route, consulted before the resolver.
    pub fn add_static_route(&self, route: Route) -> Result<(), NodeError> {
        self.core.add_static_route(route)
    }

    /// Removes a static route. Returns `true` if one was present.
    pub fn remove_static_route(&self, name: &str) -> bool {
        self.core.remove_static_route(name)
    }

    /// The current static route table.
    pub fn static_routes(&self) -> Vec<Route> {
        self.core.static_routes()
    }

    //
    // Lifecycle
    //

    /// Stops the node: cancels the root scope, which terminates every
    /// process and closes every peer connection.
    pub fn stop(&self) {
        info!(node = %self.name(), "node stopping");
        self.core.stop();
    }

    /// Blocks until the node is stopped.
    pub async fn wait(&self) {
        self.core.wait().await
    }

    /// Blocks until the node is stopped, or returns
    /// [`NodeError::Timeout`] if it is still alive when `d` elapses.
    pub async fn wait_with_timeout(&self, d: Duration) -> Result<(), NodeError> {
        self.core.wait_with_timeout(d).await
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name())
            .field("creation", &self.creation())
            .field("alive", &self.is_alive())
            .finish()
    }
}
