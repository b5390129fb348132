//! The uniform dispatch surface.
//!
//! [`CoreRouter`] is the single path every send, link, monitor and spawn
//! request goes through, whether it originated locally or arrived from a
//! peer. The node core implements it; the network layer hands an
//! `Arc<dyn CoreRouter>` to each proto so incoming traffic re-enters
//! through the same contract.

use crate::atom::Atom;
use crate::core::{Alias, ExitReason, Pid, ProcessId, Ref, Term};
use crate::node::connection::Connection;
use crate::node::error::NodeError;
use crate::node::process::Process;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A remote request to spawn a registered behavior on this node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSpawnRequest {
    /// The requesting process on the peer node.
    pub from: Pid,
    /// Reply reference the spawned pid (or error) is routed back to.
    pub reference: Ref,
    /// Registered name for the spawned process; empty for none.
    pub name: String,
    /// Arguments passed to the behavior's `init`.
    pub args: Vec<Term>,
}

/// Routes messages and signals between local processes and peer nodes.
///
/// Send operations share one contract: `from` must be a pid of this node's
/// current incarnation, otherwise [`NodeError::SenderUnknown`]. Local
/// mailbox delivery never blocks; a full mailbox drops the message with a
/// warning. Remote delivery inherits the connection's own backpressure.
#[async_trait]
pub trait CoreRouter: Send + Sync {
    /// Routes a message to a pid.
    async fn route_send(&self, from: Pid, to: Pid, message: Term) -> Result<(), NodeError>;

    /// Routes a message to a registered name on some node.
    async fn route_send_reg(
        &self,
        from: Pid,
        to: ProcessId,
        message: Term,
    ) -> Result<(), NodeError>;

    /// Routes a message to a process alias.
    async fn route_send_alias(&self, from: Pid, to: Alias, message: Term)
        -> Result<(), NodeError>;

    /// Looks up a live local process by pid.
    fn process_by_pid(&self, pid: Pid) -> Option<Arc<Process>>;

    /// Looks up a live local process by registered name.
    fn process_by_name(&self, name: &str) -> Option<Arc<Process>>;

    /// Looks up a live local process by alias.
    fn process_by_alias(&self, alias: Alias) -> Option<Arc<Process>>;

    /// Returns the connection to a peer node, dialing it if necessary.
    async fn get_connection(&self, node: Atom) -> Result<Arc<dyn Connection>, NodeError>;

    /// Links two processes symmetrically.
    async fn route_link(&self, a: Pid, b: Pid) -> Result<(), NodeError>;

    /// Removes a link between two processes.
    async fn route_unlink(&self, a: Pid, b: Pid) -> Result<(), NodeError>;

    /// Delivers an exit signal from `terminated` to the linked process `to`.
    async fn route_exit(&self, to: Pid, terminated: Pid, reason: ExitReason)
        -> Result<(), NodeError>;

    /// Starts a monitor of `target` on behalf of `by`.
    async fn route_monitor(&self, by: Pid, target: Pid, reference: Ref) -> Result<(), NodeError>;

    /// Starts a monitor of a registered name on behalf of `by`.
    async fn route_monitor_reg(
        &self,
        by: Pid,
        target: ProcessId,
        reference: Ref,
    ) -> Result<(), NodeError>;

    /// Cancels a monitor previously created by `by`.
    async fn route_demonitor(&self, by: Pid, reference: Ref) -> Result<(), NodeError>;

    /// Delivers a monitor-down for a pid monitor to the watcher `to`.
    async fn route_monitor_exit(
        &self,
        to: Pid,
        terminated: Pid,
        reason: ExitReason,
        reference: Ref,
    ) -> Result<(), NodeError>;

    /// Delivers a monitor-down for a name monitor to the watcher `to`.
    async fn route_monitor_exit_reg(
        &self,
        to: Pid,
        terminated: ProcessId,
        reason: ExitReason,
        reference: Ref,
    ) -> Result<(), NodeError>;

    /// Handles a dropped peer connection: synthesizes `noconnection`
    /// exit/down messages for every link and monitor crossing that edge.
    async fn route_node_down(&self, name: Atom);

    /// Spawns a behavior registered for remote spawning and returns its pid.
    async fn route_spawn_request(
        &self,
        behavior_name: &str,
        request: RemoteSpawnRequest,
    ) -> Result<Pid, NodeError>;

    /// Routes a spawn result (pid or error) to the ref a caller is
    /// waiting on.
    async fn route_spawn_reply(
        &self,
        to: Pid,
        reference: Ref,
        result: Result<Term, NodeError>,
    ) -> Result<(), NodeError>;

    /// Reserved for proxy-mode routing. Always [`NodeError::Unsupported`].
    async fn route_proxy(&self) -> Result<(), NodeError> {
        Err(NodeError::Unsupported)
    }
}
