//! The process object and its loop-side context.
//!
//! A [`Process`] is the registry-visible half of an actor: identity,
//! mailbox sender, environment, aliases and the exit-signal capability.
//! The [`ProcessContext`] is the loop-side half: it owns the receiving
//! ends of the mailbox, graceful-exit and direct channels and gives the
//! behavior loop access to every runtime operation (send, link, monitor,
//! spawn, alias management).

use crate::atom::Atom;
use crate::behavior::ProcessBehavior;
use crate::core::{
    Alias, DirectRequest, Envelope, ExitReason, ExitRequest, Pid, ProcessId, Ref, Term,
};
use crate::node::core::Core;
use crate::node::error::NodeError;
use crate::node::router::RemoteSpawnRequest;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Default mailbox (and graceful-exit queue) capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 100;

/// Options for spawning a process.
#[derive(Clone, Debug, Default)]
pub struct ProcessOptions {
    /// Mailbox capacity override. Defaults to
    /// [`DEFAULT_MAILBOX_CAPACITY`].
    pub mailbox_size: Option<usize>,

    /// Environment overlay. Entries here win over the node environment on
    /// key collision.
    pub env: HashMap<String, Term>,

    /// Group leader for the spawned process.
    pub group_leader: Option<Pid>,

    /// Cancellation scope to derive the process scope from. Defaults to
    /// the node scope.
    pub scope: Option<CancellationToken>,
}

/// A live (or recently dead) process.
///
/// The pid and registered name survive termination for postmortem
/// inspection; everything else is blanked during cleanup.
pub struct Process {
    pid: Pid,
    name: Option<String>,
    parent: Option<Pid>,
    group_leader: Option<Pid>,
    env: Mutex<HashMap<String, Term>>,
    mailbox: mpsc::Sender<Envelope>,
    graceful: Mutex<Option<mpsc::Sender<ExitRequest>>>,
    direct: mpsc::Sender<DirectRequest>,
    reply: Mutex<HashMap<Ref, oneshot::Sender<Result<Term, NodeError>>>>,
    aliases: Mutex<Vec<Alias>>,
    trap_exit: AtomicBool,
    scope: CancellationToken,
}

impl Process {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        pid: Pid,
        name: Option<String>,
        parent: Option<Pid>,
        group_leader: Option<Pid>,
        env: HashMap<String, Term>,
        mailbox: mpsc::Sender<Envelope>,
        graceful: mpsc::Sender<ExitRequest>,
        direct: mpsc::Sender<DirectRequest>,
        scope: CancellationToken,
    ) -> Self {
        Self {
            pid,
            name,
            parent,
            group_leader,
            env: Mutex::new(env),
            mailbox,
            graceful: Mutex::new(Some(graceful)),
            direct,
            reply: Mutex::new(HashMap::new()),
            aliases: Mutex::new(Vec::new()),
            trap_exit: AtomicBool::new(false),
            scope,
        }
    }

    /// Returns this process's pid.
    #[inline]
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Returns the registered name, if the process was spawned with one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns the parent pid, if any.
    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    /// Returns the group leader pid, if any.
    pub fn group_leader(&self) -> Option<Pid> {
        self.group_leader
    }

    /// Returns `true` while the behavior loop is running.
    pub fn is_alive(&self) -> bool {
        !self.scope.is_cancelled()
    }

    /// Returns whether this process traps exit signals.
    pub fn trap_exit(&self) -> bool {
        self.trap_exit.load(Ordering::Acquire)
    }

    /// Reads an environment entry.
    pub fn env(&self, key: &str) -> Option<Term> {
        self.env.lock().get(key).cloned()
    }

    /// Sends a synchronous request into the behavior loop and waits for the
    /// answer.
    ///
    /// The request rendezvouses with the loop's `recv_direct`; a loop that
    /// does not service the direct channel makes this time out.
    pub async fn call_direct(&self, message: Term, timeout: Duration) -> Result<Term, NodeError> {
        if !self.is_alive() {
            return Err(NodeError::ProcessUnknown);
        }
        let (tx, rx) = oneshot::channel();
        let request = DirectRequest { message, reply: tx };
        tokio::time::timeout(timeout, async {
            self.direct
                .send(request)
                .await
                .map_err(|_| NodeError::ProcessTerminated)?;
            rx.await.map_err(|_| NodeError::ProcessTerminated)
        })
        .await
        .map_err(|_| NodeError::Timeout)?
    }

    pub(crate) fn set_trap_exit(&self, trap: bool) -> bool {
        self.trap_exit.swap(trap, Ordering::AcqRel)
    }

    pub(crate) fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    pub(crate) fn kill(&self) {
        self.scope.cancel();
    }

    /// Delivers an exit signal: a graceful-exit record first, then scope
    /// cancellation unless the process traps exits.
    pub(crate) fn exit_signal(&self, from: Pid, reason: ExitReason) -> Result<(), NodeError> {
        if self.scope.is_cancelled() {
            return Err(NodeError::ProcessUnknown);
        }
        {
            let guard = self.graceful.lock();
            let Some(tx) = guard.as_ref() else {
                return Err(NodeError::ProcessUnknown);
            };
            match tx.try_send(ExitRequest { from, reason }) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => return Err(NodeError::ProcessBusy),
                Err(TrySendError::Closed(_)) => return Err(NodeError::ProcessUnknown),
            }
        }
        if !self.trap_exit() {
            self.scope.cancel();
        }
        Ok(())
    }

    /// Non-blocking mailbox enqueue.
    ///
    /// This is the delivery primitive proto implementations use for
    /// incoming remote messages, after resolving the target through the
    /// router's process lookups (sends from an alien origin are not
    /// accepted by `route_send`). A full mailbox returns
    /// [`NodeError::ProcessBusy`]; the caller chooses the drop policy.
    pub fn deliver(&self, envelope: Envelope) -> Result<(), NodeError> {
        match self.mailbox.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(NodeError::ProcessBusy),
            Err(TrySendError::Closed(_)) => Err(NodeError::ProcessUnknown),
        }
    }

    pub(crate) fn mailbox_queue_len(&self) -> usize {
        self.mailbox.max_capacity() - self.mailbox.capacity()
    }

    /// Refuses any further exit signals. Called first thing during cleanup.
    pub(crate) fn disable_graceful_exit(&self) {
        *self.graceful.lock() = None;
    }

    pub(crate) fn add_alias(&self, alias: Alias) {
        self.aliases.lock().push(alias);
    }

    pub(crate) fn remove_alias(&self, alias: Alias) -> bool {
        let mut aliases = self.aliases.lock();
        match aliases.iter().position(|a| *a == alias) {
            Some(i) => {
                aliases.swap_remove(i);
                true
            }
            None => false,
        }
    }

    pub(crate) fn take_aliases(&self) -> Vec<Alias> {
        std::mem::take(&mut self.aliases.lock())
    }

    pub(crate) fn aliases_snapshot(&self) -> Vec<Alias> {
        self.aliases.lock().clone()
    }

    /// Registers a single-shot reply slot for `reference`.
    pub(crate) fn register_reply(
        &self,
        reference: Ref,
    ) -> oneshot::Receiver<Result<Term, NodeError>> {
        let (tx, rx) = oneshot::channel();
        self.reply.lock().insert(reference, tx);
        rx
    }

    /// Drops a pending reply slot, e.g. after a timeout.
    pub(crate) fn take_reply(&self, reference: Ref) {
        self.reply.lock().remove(&reference);
    }

    /// Completes a pending reply slot.
    pub(crate) fn put_reply(
        &self,
        reference: Ref,
        result: Result<Term, NodeError>,
    ) -> Result<(), NodeError> {
        let tx = self
            .reply
            .lock()
            .remove(&reference)
            .ok_or(NodeError::MonitorUnknown)?;
        let _ = tx.send(result);
        Ok(())
    }

    /// Blanks the mutable fields after termination. Pid and name are kept
    /// for postmortem inspection by parents.
    pub(crate) fn clear(&self) {
        self.env.lock().clear();
        self.reply.lock().clear();
        self.aliases.lock().clear();
    }
}

impl std::fmt::Debug for Process {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

/// A point-in-time snapshot of one process, including its link and
/// monitor edges.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    /// The process pid.
    pub pid: Pid,
    /// Registered name, if any.
    pub name: Option<String>,
    /// Parent pid, if any.
    pub parent: Option<Pid>,
    /// Group leader pid, if any.
    pub group_leader: Option<Pid>,
    /// Whether the process is still running.
    pub alive: bool,
    /// Whether the process traps exit signals.
    pub trap_exit: bool,
    /// Currently held aliases.
    pub aliases: Vec<Alias>,
    /// Messages waiting in the mailbox.
    pub mailbox_queue_len: usize,
    /// Pids this process is linked to.
    pub links: Vec<Pid>,
    /// Pids this process monitors.
    pub monitors: Vec<Pid>,
    /// Registered names this process monitors.
    pub monitors_by_name: Vec<ProcessId>,
    /// Pids monitoring this process.
    pub monitored_by: Vec<Pid>,
}

/// The loop-side handle of a process.
///
/// Handed to the behavior's `init` and `run`; owns the receiving halves of
/// the process channels. Every receive operation observes the process
/// scope, so a cancelled process sees `None` at its next suspension point.
pub struct ProcessContext {
    process: Arc<Process>,
    core: Arc<Core>,
    mailbox: mpsc::Receiver<Envelope>,
    graceful: mpsc::Receiver<ExitRequest>,
    direct: mpsc::Receiver<DirectRequest>,
}

impl ProcessContext {
    pub(crate) fn new(
        process: Arc<Process>,
        core: Arc<Core>,
        mailbox: mpsc::Receiver<Envelope>,
        graceful: mpsc::Receiver<ExitRequest>,
        direct: mpsc::Receiver<DirectRequest>,
    ) -> Self {
        Self {
            process,
            core,
            mailbox,
            graceful,
            direct,
        }
    }

    /// Returns this process's pid.
    pub fn pid(&self) -> Pid {
        self.process.pid()
    }

    /// Returns this process's registered name, if any.
    pub fn name(&self) -> Option<&str> {
        self.process.name()
    }

    /// Returns the node name.
    pub fn node_name(&self) -> Atom {
        self.core.node_name()
    }

    /// Returns the registry-visible process object.
    pub fn process(&self) -> &Arc<Process> {
        &self.process
    }

    /// Reads an environment entry (spawn overlay over node environment).
    pub fn env(&self, key: &str) -> Option<Term> {
        self.process.env(key)
    }

    /// Sets an environment entry on this process.
    pub fn set_env(&self, key: impl Into<String>, value: impl Into<Term>) {
        self.process.env.lock().insert(key.into(), value.into());
    }

    /// Returns whether this process traps exit signals.
    pub fn trap_exit(&self) -> bool {
        self.process.trap_exit()
    }

    /// Sets the trap-exit flag; returns the previous value.
    ///
    /// While trapping, exit signals from linked processes arrive as
    /// [`Message::Exit`](crate::core::Message::Exit) mailbox messages
    /// instead of cancelling this process.
    pub fn set_trap_exit(&self, trap: bool) -> bool {
        self.process.set_trap_exit(trap)
    }

    /// Returns a clone of the process cancellation scope, for use in
    /// custom `select!` loops.
    pub fn scope(&self) -> CancellationToken {
        self.process.scope().clone()
    }

    /// Receives the next mailbox message.
    ///
    /// Returns `None` once the process scope is cancelled or the mailbox
    /// is closed.
    pub async fn recv(&mut self) -> Option<Envelope> {
        let scope = self.process.scope().clone();
        tokio::select! {
            _ = scope.cancelled() => None,
            envelope = self.mailbox.recv() => envelope,
        }
    }

    /// Receives the next mailbox message, waiting at most `timeout`.
    ///
    /// `Ok(None)` means the scope was cancelled or the mailbox closed;
    /// `Err(Timeout)` means the timeout elapsed.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Envelope>, NodeError> {
        tokio::time::timeout(timeout, self.recv())
            .await
            .map_err(|_| NodeError::Timeout)
    }

    /// Receives a mailbox message without blocking.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        self.mailbox.try_recv().ok()
    }

    /// Receives the next graceful-exit request.
    ///
    /// Unlike [`recv`](Self::recv), this does not observe cancellation:
    /// a cancelled process may still drain its pending exit request to
    /// learn the reason it is terminating with.
    pub async fn recv_exit(&mut self) -> Option<ExitRequest> {
        self.graceful.recv().await
    }

    /// Receives a graceful-exit request without blocking.
    pub fn try_recv_exit(&mut self) -> Option<ExitRequest> {
        self.graceful.try_recv().ok()
    }

    /// Receives the next synchronous direct request.
    pub async fn recv_direct(&mut self) -> Option<DirectRequest> {
        let scope = self.process.scope().clone();
        tokio::select! {
            _ = scope.cancelled() => None,
            request = self.direct.recv() => request,
        }
    }

    /// Sends a message to a pid, local or remote.
    pub async fn send(&self, to: Pid, message: impl Into<Term>) -> Result<(), NodeError> {
        self.core.route_send(self.pid(), to, message.into()).await
    }

    /// Sends a message to a registered name on some node.
    pub async fn send_reg(&self, to: ProcessId, message: impl Into<Term>) -> Result<(), NodeError> {
        self.core
            .route_send_reg(self.pid(), to, message.into())
            .await
    }

    /// Sends a message to a process alias.
    pub async fn send_alias(&self, to: Alias, message: impl Into<Term>) -> Result<(), NodeError> {
        self.core
            .route_send_alias(self.pid(), to, message.into())
            .await
    }

    /// Sends an exit signal to another process.
    pub async fn exit(&self, to: Pid, reason: ExitReason) -> Result<(), NodeError> {
        self.core.route_exit(to, self.pid(), reason).await
    }

    /// Links this process to another, symmetrically.
    pub async fn link(&self, to: Pid) -> Result<(), NodeError> {
        self.core.route_link(self.pid(), to).await
    }

    /// Removes a link.
    pub async fn unlink(&self, to: Pid) -> Result<(), NodeError> {
        self.core.route_unlink(self.pid(), to).await
    }

    /// Monitors another process. The returned reference arrives in the
    /// `Down` message when the target dies or becomes unreachable.
    pub async fn monitor(&self, target: Pid) -> Result<Ref, NodeError> {
        let reference = self.core.make_ref();
        self.core
            .route_monitor(self.pid(), target, reference)
            .await?;
        Ok(reference)
    }

    /// Monitors a registered name on some node.
    ///
    /// A name that does not exist at monitor time fires an immediate
    /// `Down` with reason `noproc`.
    pub async fn monitor_name(&self, target: ProcessId) -> Result<Ref, NodeError> {
        let reference = self.core.make_ref();
        self.core
            .route_monitor_reg(self.pid(), target, reference)
            .await?;
        Ok(reference)
    }

    /// Cancels a monitor created by this process.
    pub async fn demonitor(&self, reference: Ref) -> Result<(), NodeError> {
        self.core.route_demonitor(self.pid(), reference).await
    }

    /// Watches a peer node; a `NodeDown` mailbox message arrives when its
    /// connection drops.
    pub fn monitor_node(&self, name: Atom) -> Ref {
        self.core.monitor_node(self.pid(), name)
    }

    /// Cancels a node monitor.
    pub fn demonitor_node(&self, reference: Ref) -> Result<(), NodeError> {
        self.core.demonitor_node(self.pid(), reference)
    }

    /// Mints a new alias addressing this process.
    pub fn new_alias(&self) -> Result<Alias, NodeError> {
        self.core.new_alias(&self.process)
    }

    /// Revokes an alias owned by this process.
    pub fn delete_alias(&self, alias: Alias) -> Result<(), NodeError> {
        self.core.delete_alias(&self.process, alias)
    }

    /// Mints a unique reference.
    pub fn make_ref(&self) -> Ref {
        self.core.make_ref()
    }

    /// Spawns a child process. The child's scope derives from the node
    /// scope (or `opts.scope`), not from this process.
    pub async fn spawn(
        &self,
        name: Option<&str>,
        opts: ProcessOptions,
        behavior: Box<dyn ProcessBehavior>,
        args: Vec<Term>,
    ) -> Result<Arc<Process>, NodeError> {
        self.core
            .spawn(name.map(str::to_string), Some(self.pid()), opts, behavior, args)
            .await
    }

    /// Spawns a behavior registered on a peer node and waits for its pid.
    pub async fn remote_spawn(
        &self,
        node: Atom,
        behavior_name: &str,
        name: Option<&str>,
        args: Vec<Term>,
        timeout: Duration,
    ) -> Result<Pid, NodeError> {
        let reference = self.core.make_ref();
        let rx = self.process.register_reply(reference);
        let request = RemoteSpawnRequest {
            from: self.pid(),
            reference,
            name: name.unwrap_or_default().to_string(),
            args,
        };

        let result: Result<(), NodeError> = async {
            let connection = self.core.get_connection(node).await?;
            connection.spawn_request(behavior_name, request).await
        }
        .await;
        if let Err(e) = result {
            self.process.take_reply(reference);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(Term::Pid(pid)))) => Ok(pid),
            Ok(Ok(Ok(_))) => Err(NodeError::Unsupported),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(NodeError::ProcessTerminated),
            Err(_) => {
                self.process.take_reply(reference);
                Err(NodeError::Timeout)
            }
        }
    }
}

impl std::fmt::Debug for ProcessContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessContext")
            .field("pid", &self.pid())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom;
    use crate::core::Message;

    fn test_process(capacity: usize) -> (Arc<Process>, mpsc::Receiver<Envelope>, mpsc::Receiver<ExitRequest>, mpsc::Receiver<DirectRequest>) {
        let pid = Pid::new(atom!("t@h"), 1001, 1);
        let (mb_tx, mb_rx) = mpsc::channel(capacity);
        let (ge_tx, ge_rx) = mpsc::channel(capacity);
        let (dr_tx, dr_rx) = mpsc::channel(1);
        let process = Arc::new(Process::new(
            pid,
            None,
            None,
            None,
            HashMap::new(),
            mb_tx,
            ge_tx,
            dr_tx,
            CancellationToken::new(),
        ));
        (process, mb_rx, ge_rx, dr_rx)
    }

    fn sender() -> Pid {
        Pid::new(atom!("t@h"), 1002, 1)
    }

    #[test]
    fn test_deliver_and_queue_len() {
        let (process, _mb_rx, _ge_rx, _dr_rx) = test_process(4);
        assert_eq!(process.mailbox_queue_len(), 0);
        process
            .deliver(Envelope {
                from: sender(),
                message: Message::User(Term::from(1)),
            })
            .unwrap();
        assert_eq!(process.mailbox_queue_len(), 1);
    }

    #[test]
    fn test_deliver_full_mailbox_is_busy() {
        let (process, _mb_rx, _ge_rx, _dr_rx) = test_process(1);
        let envelope = |i: i64| Envelope {
            from: sender(),
            message: Message::User(Term::from(i)),
        };
        process.deliver(envelope(1)).unwrap();
        assert!(matches!(
            process.deliver(envelope(2)),
            Err(NodeError::ProcessBusy)
        ));
    }

    #[test]
    fn test_exit_signal_kills_non_trapping() {
        let (process, _mb_rx, mut ge_rx, _dr_rx) = test_process(4);
        process
            .exit_signal(sender(), ExitReason::Custom("boom".into()))
            .unwrap();
        assert!(!process.is_alive());
        let request = ge_rx.try_recv().unwrap();
        assert_eq!(request.reason, ExitReason::Custom("boom".into()));
    }

    #[test]
    fn test_exit_signal_trapping_stays_alive() {
        let (process, _mb_rx, mut ge_rx, _dr_rx) = test_process(4);
        process.set_trap_exit(true);
        process.exit_signal(sender(), ExitReason::Shutdown).unwrap();
        assert!(process.is_alive());
        assert_eq!(ge_rx.try_recv().unwrap().reason, ExitReason::Shutdown);
    }

    #[test]
    fn test_trap_exit_applies_to_every_reason() {
        let (process, _mb_rx, mut ge_rx, _dr_rx) = test_process(4);
        process.set_trap_exit(true);
        process.exit_signal(sender(), ExitReason::Kill).unwrap();
        assert!(process.is_alive());
        assert_eq!(ge_rx.try_recv().unwrap().reason, ExitReason::Kill);
    }

    #[test]
    fn test_exit_signal_after_death_is_unknown() {
        let (process, _mb_rx, _ge_rx, _dr_rx) = test_process(4);
        process.kill();
        assert!(matches!(
            process.exit_signal(sender(), ExitReason::Normal),
            Err(NodeError::ProcessUnknown)
        ));
    }

    #[test]
    fn test_exit_signal_full_queue_is_busy() {
        let (process, _mb_rx, _ge_rx, _dr_rx) = test_process(1);
        process.set_trap_exit(true);
        process.exit_signal(sender(), ExitReason::Shutdown).unwrap();
        assert!(matches!(
            process.exit_signal(sender(), ExitReason::Shutdown),
            Err(NodeError::ProcessBusy)
        ));
    }

    #[test]
    fn test_disabled_graceful_exit_refuses_signals() {
        let (process, _mb_rx, _ge_rx, _dr_rx) = test_process(4);
        process.disable_graceful_exit();
        assert!(matches!(
            process.exit_signal(sender(), ExitReason::Shutdown),
            Err(NodeError::ProcessUnknown)
        ));
    }

    #[test]
    fn test_alias_bookkeeping() {
        let (process, _mb_rx, _ge_rx, _dr_rx) = test_process(4);
        let alias = Alias::from_ref(Ref::from_counter(atom!("t@h"), 1, 42));
        process.add_alias(alias);
        assert_eq!(process.aliases_snapshot(), vec![alias]);
        assert!(process.remove_alias(alias));
        assert!(!process.remove_alias(alias));
    }

    #[test]
    fn test_reply_slots() {
        let (process, _mb_rx, _ge_rx, _dr_rx) = test_process(4);
        let reference = Ref::from_counter(atom!("t@h"), 1, 7);
        let mut rx = process.register_reply(reference);
        process.put_reply(reference, Ok(Term::from(5))).unwrap();
        assert_eq!(rx.try_recv().unwrap().unwrap(), Term::from(5));
        assert!(matches!(
            process.put_reply(reference, Ok(Term::Nil)),
            Err(NodeError::MonitorUnknown)
        ));
    }

    #[tokio::test]
    async fn test_call_direct_rendezvous() {
        let (process, _mb_rx, _ge_rx, mut dr_rx) = test_process(4);
        tokio::spawn(async move {
            let request = dr_rx.recv().await.unwrap();
            let _ = request.reply.send(Term::from("pong"));
        });
        let reply = process
            .call_direct(Term::from("ping"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, Term::from("pong"));
    }

    #[tokio::test]
    async fn test_call_direct_unserviced_times_out() {
        let (process, _mb_rx, _ge_rx, _dr_rx) = test_process(4);
        // Capacity-1 channel: first request queues, a second caller would
        // rendezvous. With nobody receiving, the reply never comes.
        let result = process
            .call_direct(Term::from("ping"), Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(NodeError::Timeout)));
    }

    #[test]
    fn test_clear_keeps_identity() {
        let (process, _mb_rx, _ge_rx, _dr_rx) = test_process(4);
        process.env.lock().insert("k".into(), Term::from(1));
        process.clear();
        assert!(process.env("k").is_none());
        assert_eq!(process.pid().id(), 1001);
    }
}
