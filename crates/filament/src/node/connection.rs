//! Peer connection, handshake and proto contracts.
//!
//! A [`Connection`] is the opaque handle for one connected peer node. The
//! router calls it to forward sends, link/monitor traffic and spawn
//! requests; success means acceptance into the connection's send queue,
//! never delivery. The [`Handshake`] and [`Proto`] traits are the plugs for
//! the wire layer: the network module runs the handshake on a fresh TCP
//! stream, asks the proto for a `Connection`, and then serves it until the
//! peer drops.

use crate::atom::Atom;
use crate::core::{Alias, ExitReason, Pid, ProcessId, Ref, Term};
use crate::node::error::NodeError;
use crate::node::router::{CoreRouter, RemoteSpawnRequest};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// An established connection to one peer node.
///
/// All operations are fire-and-forget from the router's perspective: an
/// `Ok` return means the operation was queued. The connection may apply
/// its own backpressure and block the caller while queueing.
#[async_trait]
pub trait Connection: Send + Sync {
    /// The peer's node name.
    fn node_name(&self) -> Atom;

    /// Forwards a message addressed to a pid on the peer.
    async fn send(&self, from: Pid, to: Pid, message: Term) -> Result<(), NodeError>;

    /// Forwards a message addressed to a registered name on the peer.
    async fn send_reg(&self, from: Pid, to: ProcessId, message: Term) -> Result<(), NodeError>;

    /// Forwards a message addressed to an alias minted by the peer.
    async fn send_alias(&self, from: Pid, to: Alias, message: Term) -> Result<(), NodeError>;

    /// Establishes a link between a local and a remote process.
    async fn link(&self, local: Pid, remote: Pid) -> Result<(), NodeError>;

    /// Removes a link between a local and a remote process.
    async fn unlink(&self, local: Pid, remote: Pid) -> Result<(), NodeError>;

    /// Notifies the peer that a linked local process terminated.
    async fn link_exit(&self, to: Pid, terminated: Pid, reason: ExitReason)
        -> Result<(), NodeError>;

    /// Starts monitoring a remote process.
    async fn monitor(&self, by: Pid, target: Pid, reference: Ref) -> Result<(), NodeError>;

    /// Cancels a monitor on a remote process.
    async fn demonitor(&self, by: Pid, target: Pid, reference: Ref) -> Result<(), NodeError>;

    /// Notifies the peer that a process it monitors here terminated.
    async fn monitor_exit(
        &self,
        to: Pid,
        terminated: Pid,
        reason: ExitReason,
        reference: Ref,
    ) -> Result<(), NodeError>;

    /// Starts monitoring a registered name on the peer.
    async fn monitor_reg(
        &self,
        by: Pid,
        target: ProcessId,
        reference: Ref,
    ) -> Result<(), NodeError>;

    /// Cancels a monitor on a registered name on the peer.
    async fn demonitor_reg(
        &self,
        by: Pid,
        target: ProcessId,
        reference: Ref,
    ) -> Result<(), NodeError>;

    /// Notifies the peer that a registered name it monitors here
    /// terminated.
    async fn monitor_exit_reg(
        &self,
        to: Pid,
        terminated: ProcessId,
        reason: ExitReason,
        reference: Ref,
    ) -> Result<(), NodeError>;

    /// Asks the peer to spawn a registered behavior.
    async fn spawn_request(
        &self,
        behavior_name: &str,
        request: RemoteSpawnRequest,
    ) -> Result<(), NodeError>;

    /// Routes a successful spawn result back to the requesting peer.
    async fn spawn_reply(&self, to: Pid, reference: Ref, spawned: Pid) -> Result<(), NodeError>;

    /// Routes a failed spawn result back to the requesting peer.
    async fn spawn_reply_error(
        &self,
        to: Pid,
        reference: Ref,
        error: NodeError,
    ) -> Result<(), NodeError>;
}

/// Feature flags negotiated for a peer connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtoFlags {
    /// Accept 32-bit creation values in pids and refs.
    pub enable_big_creation: bool,
    /// Accept larger id fields in pids and references.
    pub enable_big_pid_ref: bool,
    /// Fragment outgoing messages larger than the fragmentation unit.
    pub enable_fragmentation: bool,
}

/// Options the handshake hands to the proto layer.
#[derive(Debug, Clone)]
pub struct ProtoOptions {
    /// Maximum message size in bytes; 0 means unlimited.
    pub max_message_size: usize,
    /// Readers/writers per connection.
    pub num_handlers: usize,
    /// Send queue length per handler.
    pub send_queue_length: usize,
    /// Receive queue length per handler.
    pub recv_queue_length: usize,
    /// Unit size for fragmentation.
    pub fragmentation_unit: usize,
    /// Negotiated feature flags.
    pub flags: ProtoFlags,
}

impl Default for ProtoOptions {
    fn default() -> Self {
        Self {
            max_message_size: 0,
            num_handlers: std::thread::available_parallelism().map_or(1, |n| n.get()),
            send_queue_length: 100,
            recv_queue_length: 100,
            fragmentation_unit: 65000,
            flags: ProtoFlags::default(),
        }
    }
}

/// The connection handshake contract.
#[async_trait]
pub trait Handshake: Send + Sync {
    /// Initializes the handshake with the local node identity. Called once
    /// at node start.
    fn init(&self, nodename: Atom, creation: u32) -> Result<(), NodeError>;

    /// Runs the initiator side on a freshly dialed stream. Returns proto
    /// options overriding the defaults.
    async fn start(&self, stream: &mut TcpStream, tls: bool) -> Result<ProtoOptions, NodeError>;

    /// Runs the acceptor side on an incoming stream. Returns the peer's
    /// node name and proto options.
    async fn accept(
        &self,
        stream: &mut TcpStream,
        tls: bool,
    ) -> Result<(String, ProtoOptions), NodeError>;

    /// Handshake version, published through the resolver so peers pick the
    /// right dialect.
    fn version(&self) -> u16;
}

/// The wire-codec contract.
#[async_trait]
pub trait Proto: Send + Sync {
    /// Builds a [`Connection`] over an established, handshaken stream.
    /// Incoming traffic re-enters the node through `router`.
    async fn init(
        &self,
        stream: TcpStream,
        peer: Atom,
        options: ProtoOptions,
        router: Arc<dyn CoreRouter>,
    ) -> Result<Arc<dyn Connection>, NodeError>;

    /// Serves the connection until the peer drops or `token` is cancelled.
    /// When this returns, the network layer treats the peer as down.
    async fn serve(&self, token: CancellationToken, connection: Arc<dyn Connection>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proto_options_defaults() {
        let opts = ProtoOptions::default();
        assert_eq!(opts.max_message_size, 0);
        assert_eq!(opts.send_queue_length, 100);
        assert_eq!(opts.recv_queue_length, 100);
        assert_eq!(opts.fragmentation_unit, 65000);
        assert!(opts.num_handlers >= 1);
    }
}
