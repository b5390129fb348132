//! The node core: registry tables, identifier mint, spawner and the send
//! half of the router.
//!
//! Three concurrently-indexed tables track live processes (by numeric id,
//! by registered name, by alias); a fourth tracks behavior groups. Each
//! table has a dedicated mutex, acquired in the order
//! `names -> processes -> aliases -> behaviors` and never held across a
//! mailbox enqueue or an await point.
//!
//! Link/monitor bookkeeping lives in [`monitor`](super::monitor) and the
//! connection plumbing in [`network`](super::network); both are `impl`
//! blocks on [`Core`], mirroring the fact that the router is one object
//! with three concerns.

use crate::atom::Atom;
use crate::behavior::{ProcessBehavior, RegisteredBehavior, Started};
use crate::core::{Alias, Envelope, ExitReason, Message, Pid, ProcessId, Ref, Term};
use crate::node::connection::Connection;
use crate::node::error::NodeError;
use crate::node::monitor::MonitorState;
use crate::node::network::NetworkState;
use crate::node::options::NodeOptions;
use crate::node::process::{Process, ProcessContext, ProcessOptions, DEFAULT_MAILBOX_CAPACITY};
use crate::node::router::{CoreRouter, RemoteSpawnRequest};
use crate::node::REMOTE_SPAWN_GROUP;
use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Process ids are minted above this floor; low ids stay recognizable as
/// reserved.
const START_PID: u64 = 1000;

pub(crate) struct Core {
    node_name: Atom,
    creation: u32,
    booted_at: Instant,
    scope: CancellationToken,

    next_pid: AtomicU64,
    uniq: AtomicU64,

    env: Mutex<HashMap<String, Term>>,

    names: Mutex<HashMap<String, Pid>>,
    processes: Mutex<HashMap<u64, Arc<Process>>>,
    aliases: Mutex<HashMap<Alias, Arc<Process>>>,
    behaviors: Mutex<HashMap<String, HashMap<String, RegisteredBehavior>>>,

    pub(crate) monitor: MonitorState,
    pub(crate) network: NetworkState,
}

impl Core {
    pub(crate) fn new(node_name: Atom, options: &NodeOptions) -> Arc<Self> {
        let now_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let creation = options.creation.unwrap_or(now_unix.as_secs() as u32);

        // The network side holds a weak router backref so serve tasks and
        // incoming spawn requests can re-enter the core.
        Arc::new_cyclic(|weak| Self {
            node_name,
            creation,
            booted_at: Instant::now(),
            scope: CancellationToken::new(),
            next_pid: AtomicU64::new(START_PID),
            uniq: AtomicU64::new(now_unix.as_nanos() as u64),
            env: Mutex::new(options.env.clone()),
            names: Mutex::new(HashMap::new()),
            processes: Mutex::new(HashMap::new()),
            aliases: Mutex::new(HashMap::new()),
            behaviors: Mutex::new(HashMap::new()),
            monitor: MonitorState::default(),
            network: NetworkState::new(options, weak.clone()),
        })
    }

    pub(crate) fn node_name(&self) -> Atom {
        self.node_name
    }

    pub(crate) fn creation(&self) -> u32 {
        self.creation
    }

    pub(crate) fn scope(&self) -> &CancellationToken {
        &self.scope
    }

    pub(crate) fn uptime(&self) -> u64 {
        self.booted_at.elapsed().as_secs()
    }

    pub(crate) fn is_alive(&self) -> bool {
        !self.scope.is_cancelled()
    }

    pub(crate) fn stop(&self) {
        self.scope.cancel();
    }

    pub(crate) async fn wait(&self) {
        self.scope.cancelled().await;
    }

    pub(crate) async fn wait_with_timeout(&self, d: Duration) -> Result<(), NodeError> {
        tokio::time::timeout(d, self.scope.cancelled())
            .await
            .map_err(|_| NodeError::Timeout)
    }

    pub(crate) fn env_get(&self, key: &str) -> Option<Term> {
        self.env.lock().get(key).cloned()
    }

    pub(crate) fn env_set(&self, key: String, value: Term) {
        self.env.lock().insert(key, value);
    }

    //
    // Identifier mint
    //

    fn new_pid(&self) -> Pid {
        let id = self.next_pid.fetch_add(1, Ordering::Relaxed) + 1;
        Pid::new(self.node_name, id, self.creation)
    }

    /// Mints a unique reference within this node incarnation.
    pub(crate) fn make_ref(&self) -> Ref {
        let counter = self.uniq.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        Ref::from_counter(self.node_name, self.creation, counter)
    }

    //
    // Aliases
    //

    pub(crate) fn is_alias(&self, alias: Alias) -> bool {
        self.aliases.lock().contains_key(&alias)
    }

    pub(crate) fn new_alias(&self, owner: &Arc<Process>) -> Result<Alias, NodeError> {
        {
            let processes = self.processes.lock();
            if !processes.contains_key(&owner.pid().id()) {
                return Err(NodeError::ProcessUnknown);
            }
        }

        let alias = Alias::from_ref(self.make_ref());
        debug!(node = %self.node_name, owner = %owner.pid(), %alias, "created process alias");

        self.aliases.lock().insert(alias, owner.clone());
        owner.add_alias(alias);
        Ok(alias)
    }

    pub(crate) fn delete_alias(&self, owner: &Arc<Process>, alias: Alias) -> Result<(), NodeError> {
        debug!(node = %self.node_name, owner = %owner.pid(), %alias, "deleting process alias");

        let holder = { self.aliases.lock().get(&alias).cloned() };
        let Some(holder) = holder else {
            return Err(NodeError::AliasUnknown);
        };

        {
            let processes = self.processes.lock();
            if !processes.contains_key(&owner.pid().id()) {
                return Err(NodeError::ProcessUnknown);
            }
        }

        if holder.pid() != owner.pid() {
            return Err(NodeError::AliasOwner);
        }

        if owner.remove_alias(alias) {
            self.aliases.lock().remove(&alias);
            return Ok(());
        }

        // The table knew the alias but the owner did not: remove the stray
        // entry so it cannot route anywhere.
        warn!(%alias, owner = %owner.pid(), "alias missing from its owner's record");
        self.aliases.lock().remove(&alias);
        Err(NodeError::AliasUnknown)
    }

    //
    // Names
    //

    pub(crate) fn register_name(&self, name: &str, pid: Pid) -> Result<(), NodeError> {
        debug!(node = %self.node_name, %name, %pid, "registering name");
        let mut names = self.names.lock();
        if names.contains_key(name) {
            return Err(NodeError::Taken);
        }
        names.insert(name.to_string(), pid);
        Ok(())
    }

    pub(crate) fn unregister_name(&self, name: &str) -> Result<(), NodeError> {
        debug!(node = %self.node_name, %name, "unregistering name");
        match self.names.lock().remove(name) {
            Some(_) => Ok(()),
            None => Err(NodeError::NameUnknown),
        }
    }

    //
    // Lookups
    //

    pub(crate) fn process_by_pid(&self, pid: Pid) -> Option<Arc<Process>> {
        let processes = self.processes.lock();
        processes
            .get(&pid.id())
            .filter(|p| p.is_alive())
            .cloned()
    }

    pub(crate) fn process_by_name(&self, name: &str) -> Option<Arc<Process>> {
        let pid = { self.names.lock().get(name).copied() }?;
        self.process_by_pid(pid)
    }

    pub(crate) fn process_by_alias(&self, alias: Alias) -> Option<Arc<Process>> {
        let aliases = self.aliases.lock();
        aliases.get(&alias).filter(|p| p.is_alive()).cloned()
    }

    pub(crate) fn process_list(&self) -> Vec<Arc<Process>> {
        self.processes.lock().values().cloned().collect()
    }

    //
    // Behavior groups
    //

    pub(crate) fn register_behavior(
        &self,
        group: &str,
        name: &str,
        behavior: RegisteredBehavior,
    ) -> Result<(), NodeError> {
        debug!(node = %self.node_name, %group, %name, "registering behavior");
        let mut behaviors = self.behaviors.lock();
        let group_behaviors = behaviors.entry(group.to_string()).or_default();
        if group_behaviors.contains_key(name) {
            return Err(NodeError::Taken);
        }
        group_behaviors.insert(name.to_string(), behavior);
        Ok(())
    }

    pub(crate) fn registered_behavior(
        &self,
        group: &str,
        name: &str,
    ) -> Result<RegisteredBehavior, NodeError> {
        let behaviors = self.behaviors.lock();
        let group_behaviors = behaviors
            .get(group)
            .ok_or(NodeError::BehaviorGroupUnknown)?;
        group_behaviors
            .get(name)
            .cloned()
            .ok_or(NodeError::BehaviorUnknown)
    }

    pub(crate) fn registered_behavior_group(&self, group: &str) -> Vec<RegisteredBehavior> {
        self.behaviors
            .lock()
            .get(group)
            .map(|g| g.values().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn unregister_behavior(&self, group: &str, name: &str) -> Result<(), NodeError> {
        debug!(node = %self.node_name, %group, %name, "unregistering behavior");
        let mut behaviors = self.behaviors.lock();
        let group_behaviors = behaviors.get_mut(group).ok_or(NodeError::BehaviorUnknown)?;
        group_behaviors.remove(name);
        if group_behaviors.is_empty() {
            behaviors.remove(group);
        }
        Ok(())
    }

    //
    // Spawner
    //

    pub(crate) async fn spawn(
        self: &Arc<Self>,
        name: Option<String>,
        parent: Option<Pid>,
        opts: ProcessOptions,
        mut behavior: Box<dyn ProcessBehavior>,
        args: Vec<Term>,
    ) -> Result<Arc<Process>, NodeError> {
        let capacity = opts.mailbox_size.unwrap_or(DEFAULT_MAILBOX_CAPACITY).max(1);
        let scope = match &opts.scope {
            Some(parent) => parent.child_token(),
            None => self.scope.child_token(),
        };

        let pid = self.new_pid();

        // Node environment first, spawn overlay wins on collision.
        let mut env = self.env.lock().clone();
        env.extend(opts.env.clone());

        let (mailbox_tx, mailbox_rx) = mpsc::channel(capacity);
        let (graceful_tx, graceful_rx) = mpsc::channel(capacity);
        let (direct_tx, direct_rx) = mpsc::channel(1);

        let process = Arc::new(Process::new(
            pid,
            name.clone(),
            parent,
            opts.group_leader,
            env,
            mailbox_tx,
            graceful_tx,
            direct_tx,
            scope,
        ));

        if let Some(ref name) = name {
            debug!(node = %self.node_name, %pid, %name, "registering spawn name");
            let mut names = self.names.lock();
            if names.contains_key(name.as_str()) {
                return Err(NodeError::Taken);
            }
            names.insert(name.clone(), pid);
        }

        debug!(node = %self.node_name, %pid, "registering process");
        self.processes.lock().insert(pid.id(), process.clone());

        let mut ctx = ProcessContext::new(
            process.clone(),
            self.clone(),
            mailbox_rx,
            graceful_rx,
            direct_rx,
        );

        // Init runs on the spawning caller: a failed init never becomes a
        // visible process.
        let init_result = if crate::catch_panic() {
            match AssertUnwindSafe(behavior.init(&mut ctx, args))
                .catch_unwind()
                .await
            {
                Ok(result) => result,
                Err(_) => {
                    warn!(node = %self.node_name, %pid, ?name, "process initialization panicked");
                    Err(NodeError::ProcessPanic)
                }
            }
        } else {
            behavior.init(&mut ctx, args).await
        };
        if let Err(e) = init_result {
            self.delete_process(pid);
            return Err(e);
        }

        let (started_tx, started_rx) = oneshot::channel();
        let core = self.clone();
        let task_process = process.clone();
        tokio::spawn(async move {
            let started = Started::new(started_tx);
            let reason = if crate::catch_panic() {
                match AssertUnwindSafe(behavior.run(&mut ctx, started))
                    .catch_unwind()
                    .await
                {
                    Ok(reason) => reason,
                    Err(_) => {
                        warn!(
                            node = %core.node_name,
                            pid = %task_process.pid(),
                            "process loop panicked"
                        );
                        ExitReason::Panic
                    }
                }
            } else {
                behavior.run(&mut ctx, started).await
            };
            core.clean_process(&task_process, reason).await;
        });

        // Either the loop signalled readiness or it already returned; both
        // mean spawn may complete.
        let _ = started_rx.await;
        Ok(process)
    }

    /// Tears a terminated process down: refuse further exit signals, drop
    /// it from all three indexes, cancel its scope, fan out exit/down
    /// notifications, then blank its mutable fields.
    async fn clean_process(self: &Arc<Self>, process: &Arc<Process>, reason: ExitReason) {
        debug!(
            node = %self.node_name,
            pid = %process.pid(),
            %reason,
            "process terminated"
        );
        process.disable_graceful_exit();
        self.delete_process(process.pid());
        process.kill();
        self.handle_terminated(process.pid(), process.name(), reason)
            .await;
        process.clear();
    }

    /// Removes a process from the id, name and alias indexes.
    pub(crate) fn delete_process(&self, pid: Pid) {
        let process = { self.processes.lock().remove(&pid.id()) };
        let Some(process) = process else { return };
        debug!(node = %self.node_name, %pid, "unregistering process");

        // The spawn-time name and any names registered to this pid later.
        self.names.lock().retain(|_, registered| *registered != pid);

        let own = process.take_aliases();
        if !own.is_empty() {
            let mut aliases = self.aliases.lock();
            for alias in own {
                aliases.remove(&alias);
            }
        }
    }

    //
    // Send routing
    //

    pub(crate) async fn route_send(
        &self,
        from: Pid,
        to: Pid,
        message: Term,
    ) -> Result<(), NodeError> {
        // Sends from an alien node go through explicit proxy calls only.
        if from.node() != self.node_name || from.creation() != self.creation {
            return Err(NodeError::SenderUnknown);
        }

        if to.node() == self.node_name {
            if to.creation() != self.creation {
                // Addressed to a previous incarnation of this node.
                return Err(NodeError::ProcessIncarnation);
            }
            let process = { self.processes.lock().get(&to.id()).cloned() };
            let Some(process) = process else {
                debug!(node = %self.node_name, %to, "route message by pid failed: unknown process");
                return Err(NodeError::ProcessUnknown);
            };
            debug!(node = %self.node_name, %to, "route message by pid (local)");
            return match process.deliver(Envelope {
                from,
                message: Message::User(message),
            }) {
                Ok(()) => Ok(()),
                Err(NodeError::ProcessBusy) => {
                    warn!(
                        node = %self.node_name,
                        %to,
                        %from,
                        "mailbox full, message dropped"
                    );
                    Ok(())
                }
                Err(e) => Err(e),
            };
        }

        let sender_known = { self.processes.lock().contains_key(&from.id()) };
        if !sender_known {
            return Err(NodeError::SenderUnknown);
        }
        debug!(node = %self.node_name, %to, "route message by pid (remote)");
        let connection = self.get_connection(to.node()).await?;
        connection.send(from, to, message).await
    }

    pub(crate) async fn route_send_reg(
        &self,
        from: Pid,
        to: ProcessId,
        message: Term,
    ) -> Result<(), NodeError> {
        if from.node() != self.node_name || from.creation() != self.creation {
            return Err(NodeError::SenderUnknown);
        }

        if to.node == self.node_name {
            let pid = { self.names.lock().get(to.name.as_str()).copied() };
            let Some(pid) = pid else {
                debug!(node = %self.node_name, %to, "route message by name failed: unknown process");
                return Err(NodeError::ProcessUnknown);
            };
            debug!(node = %self.node_name, %to, "route message by name (local)");
            return self.route_send(from, pid, message).await;
        }

        let sender_known = { self.processes.lock().contains_key(&from.id()) };
        if !sender_known {
            return Err(NodeError::SenderUnknown);
        }
        debug!(node = %self.node_name, %to, "route message by name (remote)");
        let connection = self.get_connection(to.node).await?;
        connection.send_reg(from, to, message).await
    }

    pub(crate) async fn route_send_alias(
        &self,
        from: Pid,
        to: Alias,
        message: Term,
    ) -> Result<(), NodeError> {
        if from.node() != self.node_name || from.creation() != self.creation {
            return Err(NodeError::SenderUnknown);
        }

        if to.node() == self.node_name {
            let process = { self.aliases.lock().get(&to).cloned() };
            let Some(process) = process else {
                debug!(node = %self.node_name, %to, "route message by alias failed: unknown process");
                return Err(NodeError::ProcessUnknown);
            };
            debug!(node = %self.node_name, %to, "route message by alias (local)");
            return self.route_send(from, process.pid(), message).await;
        }

        let sender_known = { self.processes.lock().contains_key(&from.id()) };
        if !sender_known {
            return Err(NodeError::SenderUnknown);
        }
        debug!(node = %self.node_name, %to, "route message by alias (remote)");
        let connection = self.get_connection(to.node()).await?;
        connection.send_alias(from, to, message).await
    }

    //
    // Remote spawn routing
    //

    pub(crate) async fn route_spawn_request(
        self: &Arc<Self>,
        behavior_name: &str,
        request: RemoteSpawnRequest,
    ) -> Result<Pid, NodeError> {
        let registered = self.registered_behavior(REMOTE_SPAWN_GROUP, behavior_name)?;
        let behavior = (registered.factory)();
        let name = if request.name.is_empty() {
            None
        } else {
            Some(request.name)
        };
        let process = self
            .spawn(name, None, ProcessOptions::default(), behavior, request.args)
            .await?;
        Ok(process.pid())
    }

    pub(crate) async fn route_spawn_reply(
        &self,
        to: Pid,
        reference: Ref,
        result: Result<Term, NodeError>,
    ) -> Result<(), NodeError> {
        let process = self.process_by_pid(to).ok_or(NodeError::ProcessUnknown)?;
        process.put_reply(reference, result)
    }
}

#[async_trait]
impl CoreRouter for Core {
    async fn route_send(&self, from: Pid, to: Pid, message: Term) -> Result<(), NodeError> {
        Core::route_send(self, from, to, message).await
    }

    async fn route_send_reg(
        &self,
        from: Pid,
        to: ProcessId,
        message: Term,
    ) -> Result<(), NodeError> {
        Core::route_send_reg(self, from, to, message).await
    }

    async fn route_send_alias(
        &self,
        from: Pid,
        to: Alias,
        message: Term,
    ) -> Result<(), NodeError> {
        Core::route_send_alias(self, from, to, message).await
    }

    fn process_by_pid(&self, pid: Pid) -> Option<Arc<Process>> {
        Core::process_by_pid(self, pid)
    }

    fn process_by_name(&self, name: &str) -> Option<Arc<Process>> {
        Core::process_by_name(self, name)
    }

    fn process_by_alias(&self, alias: Alias) -> Option<Arc<Process>> {
        Core::process_by_alias(self, alias)
    }

    async fn get_connection(&self, node: Atom) -> Result<Arc<dyn Connection>, NodeError> {
        Core::get_connection(self, node).await
    }

    async fn route_link(&self, a: Pid, b: Pid) -> Result<(), NodeError> {
        Core::route_link(self, a, b).await
    }

    async fn route_unlink(&self, a: Pid, b: Pid) -> Result<(), NodeError> {
        Core::route_unlink(self, a, b).await
    }

    async fn route_exit(
        &self,
        to: Pid,
        terminated: Pid,
        reason: ExitReason,
    ) -> Result<(), NodeError> {
        Core::route_exit(self, to, terminated, reason).await
    }

    async fn route_monitor(&self, by: Pid, target: Pid, reference: Ref) -> Result<(), NodeError> {
        Core::route_monitor(self, by, target, reference).await
    }

    async fn route_monitor_reg(
        &self,
        by: Pid,
        target: ProcessId,
        reference: Ref,
    ) -> Result<(), NodeError> {
        Core::route_monitor_reg(self, by, target, reference).await
    }

    async fn route_demonitor(&self, by: Pid, reference: Ref) -> Result<(), NodeError> {
        Core::route_demonitor(self, by, reference).await
    }

    async fn route_monitor_exit(
        &self,
        to: Pid,
        terminated: Pid,
        reason: ExitReason,
        reference: Ref,
    ) -> Result<(), NodeError> {
        Core::route_monitor_exit(self, to, terminated, reason, reference).await
    }

    async fn route_monitor_exit_reg(
        &self,
        to: Pid,
        terminated: ProcessId,
        reason: ExitReason,
        reference: Ref,
    ) -> Result<(), NodeError> {
        Core::route_monitor_exit_reg(self, to, terminated, reason, reference).await
    }

    async fn route_node_down(&self, name: Atom) {
        Core::route_node_down(self, name).await
    }

    async fn route_spawn_request(
        &self,
        behavior_name: &str,
        request: RemoteSpawnRequest,
    ) -> Result<Pid, NodeError> {
        // `spawn` needs the owning Arc to seed the loop task.
        let this = self
            .network
            .router_handle()
            .ok_or(NodeError::Unsupported)?;
        Core::route_spawn_request(&this, behavior_name, request).await
    }

    async fn route_spawn_reply(
        &self,
        to: Pid,
        reference: Ref,
        result: Result<Term, NodeError>,
    ) -> Result<(), NodeError> {
        Core::route_spawn_reply(self, to, reference, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom;
    use crate::core::DownSource;
    use crate::node::connection::{Proto, ProtoOptions};
    use crate::node::process::ProcessContext;
    use tokio::net::TcpStream;
    use tokio::sync::mpsc::UnboundedSender;
    use tokio::time::{sleep, Duration};

    /// Receives forever, forwarding every envelope to the test. Returns the
    /// pending graceful-exit reason once cancelled.
    struct Sink {
        forward: Option<UnboundedSender<Envelope>>,
        trap: bool,
    }

    impl Sink {
        fn quiet() -> Box<Self> {
            Box::new(Self {
                forward: None,
                trap: false,
            })
        }

        fn forwarding(tx: UnboundedSender<Envelope>) -> Box<Self> {
            Box::new(Self {
                forward: Some(tx),
                trap: false,
            })
        }

        fn trapping(tx: UnboundedSender<Envelope>) -> Box<Self> {
            Box::new(Self {
                forward: Some(tx),
                trap: true,
            })
        }
    }

    #[async_trait]
    impl ProcessBehavior for Sink {
        async fn init(&mut self, ctx: &mut ProcessContext, _args: Vec<Term>) -> Result<(), NodeError> {
            if self.trap {
                ctx.set_trap_exit(true);
            }
            Ok(())
        }

        async fn run(&mut self, ctx: &mut ProcessContext, started: Started) -> ExitReason {
            started.notify();
            while let Some(envelope) = ctx.recv().await {
                if let Some(tx) = &self.forward {
                    let _ = tx.send(envelope);
                }
            }
            ctx.try_recv_exit()
                .map(|e| e.reason)
                .unwrap_or(ExitReason::Kill)
        }
    }

    /// Never reads its mailbox; used for overflow tests.
    struct Stuck;

    #[async_trait]
    impl ProcessBehavior for Stuck {
        async fn init(&mut self, _ctx: &mut ProcessContext, _args: Vec<Term>) -> Result<(), NodeError> {
            Ok(())
        }

        async fn run(&mut self, ctx: &mut ProcessContext, started: Started) -> ExitReason {
            started.notify();
            ctx.scope().cancelled().await;
            ExitReason::Normal
        }
    }

    struct FailingInit;

    #[async_trait]
    impl ProcessBehavior for FailingInit {
        async fn init(&mut self, _ctx: &mut ProcessContext, _args: Vec<Term>) -> Result<(), NodeError> {
            Err(NodeError::Unsupported)
        }

        async fn run(&mut self, _ctx: &mut ProcessContext, _started: Started) -> ExitReason {
            ExitReason::Normal
        }
    }

    struct PanickingInit;

    #[async_trait]
    impl ProcessBehavior for PanickingInit {
        async fn init(&mut self, _ctx: &mut ProcessContext, _args: Vec<Term>) -> Result<(), NodeError> {
            panic!("init blew up");
        }

        async fn run(&mut self, _ctx: &mut ProcessContext, _started: Started) -> ExitReason {
            ExitReason::Normal
        }
    }

    /// Panics as soon as any message arrives.
    struct PanicOnMessage;

    #[async_trait]
    impl ProcessBehavior for PanicOnMessage {
        async fn init(&mut self, _ctx: &mut ProcessContext, _args: Vec<Term>) -> Result<(), NodeError> {
            Ok(())
        }

        async fn run(&mut self, ctx: &mut ProcessContext, started: Started) -> ExitReason {
            started.notify();
            if ctx.recv().await.is_some() {
                panic!("loop blew up");
            }
            ExitReason::Normal
        }
    }

    fn test_core(name: &str) -> Arc<Core> {
        Core::new(Atom::new(name), &NodeOptions::default())
    }

    async fn settle() {
        sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_pid_mint_is_monotonic_and_above_floor() {
        let core = test_core("mint@test");
        let a = core.spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![]).await.unwrap();
        let b = core.spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![]).await.unwrap();
        assert!(a.pid().id() > START_PID);
        assert!(b.pid().id() > a.pid().id());
        assert_eq!(a.pid().node(), core.node_name());
        assert_eq!(a.pid().creation(), core.creation());
    }

    #[tokio::test]
    async fn test_make_ref_unique() {
        let core = test_core("refs@test");
        let a = core.make_ref();
        let b = core.make_ref();
        assert_ne!(a, b);
        assert_eq!(a.node(), core.node_name());
        assert_eq!(a.creation(), core.creation());
    }

    #[tokio::test]
    async fn test_spawn_and_lookup() {
        let core = test_core("lookup@test");
        let process = core
            .spawn(Some("svc".into()), None, ProcessOptions::default(), Sink::quiet(), vec![])
            .await
            .unwrap();
        let pid = process.pid();

        assert!(core.process_by_pid(pid).is_some());
        assert_eq!(core.process_by_name("svc").unwrap().pid(), pid);
        assert!(core.process_list().iter().any(|p| p.pid() == pid));
        assert_eq!(process.name(), Some("svc"));
    }

    #[tokio::test]
    async fn test_spawn_name_taken() {
        let core = test_core("taken@test");
        core.spawn(Some("svc".into()), None, ProcessOptions::default(), Sink::quiet(), vec![])
            .await
            .unwrap();
        let err = core
            .spawn(Some("svc".into()), None, ProcessOptions::default(), Sink::quiet(), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Taken));
    }

    #[tokio::test]
    async fn test_failed_init_rolls_back() {
        let core = test_core("rollback@test");
        let err = core
            .spawn(Some("svc".into()), None, ProcessOptions::default(), Box::new(FailingInit), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::Unsupported));
        assert!(core.process_by_name("svc").is_none());
        assert!(core.process_list().is_empty());
        // The name is free again.
        core.spawn(Some("svc".into()), None, ProcessOptions::default(), Sink::quiet(), vec![])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_panicking_init_rolls_back() {
        let core = test_core("panic_init@test");
        let err = core
            .spawn(Some("svc".into()), None, ProcessOptions::default(), Box::new(PanickingInit), vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, NodeError::ProcessPanic));
        assert!(core.process_by_name("svc").is_none());
    }

    #[tokio::test]
    async fn test_panicking_loop_reports_panic_reason() {
        let core = test_core("panic_loop@test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = core
            .spawn(None, None, ProcessOptions::default(), Sink::forwarding(tx), vec![])
            .await
            .unwrap();
        let victim = core
            .spawn(None, None, ProcessOptions::default(), Box::new(PanicOnMessage), vec![])
            .await
            .unwrap();

        let reference = core.make_ref();
        core.route_monitor(watcher.pid(), victim.pid(), reference)
            .await
            .unwrap();
        core.route_send(watcher.pid(), victim.pid(), Term::from("boom"))
            .await
            .unwrap();

        let envelope = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match envelope.message {
            Message::Down { reference: r, reason, .. } => {
                assert_eq!(r, reference);
                assert_eq!(reason, ExitReason::Panic);
            }
            other => panic!("expected Down, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_termination_cleans_every_index() {
        let core = test_core("cleanup@test");
        let process = core
            .spawn(Some("svc".into()), None, ProcessOptions::default(), Sink::quiet(), vec![])
            .await
            .unwrap();
        let pid = process.pid();
        let alias = core.new_alias(&process).unwrap();
        let other = core
            .spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![])
            .await
            .unwrap();
        core.route_link(other.pid(), pid).await.unwrap();

        core.route_exit(pid, other.pid(), ExitReason::Custom("stop".into()))
            .await
            .unwrap();
        settle().await;

        assert!(core.process_by_pid(pid).is_none());
        assert!(core.process_by_name("svc").is_none());
        assert!(core.process_by_alias(alias).is_none());
        assert!(!core.is_alias(alias));
        assert!(core.links(pid).is_empty());
        // Postmortem identity survives.
        assert_eq!(process.pid(), pid);
        assert_eq!(process.name(), Some("svc"));
        // The name is free for somebody else.
        core.register_name("svc", other.pid()).unwrap();
    }

    #[tokio::test]
    async fn test_route_send_local_preserves_sender_order() {
        let core = test_core("order@test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = core
            .spawn(None, None, ProcessOptions::default(), Sink::forwarding(tx), vec![])
            .await
            .unwrap();
        let sender = core
            .spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![])
            .await
            .unwrap();

        for i in 0..5 {
            core.route_send(sender.pid(), sink.pid(), Term::from(i))
                .await
                .unwrap();
        }
        for i in 0..5 {
            let envelope = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(envelope.from, sender.pid());
            assert_eq!(envelope.message_int(), Some(i));
        }
    }

    impl Envelope {
        fn message_int(&self) -> Option<i64> {
            match &self.message {
                Message::User(term) => term.as_int(),
                _ => None,
            }
        }
    }

    #[tokio::test]
    async fn test_route_send_unknown_process() {
        let core = test_core("unknown@test");
        let sender = core
            .spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![])
            .await
            .unwrap();
        let ghost = Pid::new(core.node_name(), 999_999, core.creation());
        assert!(matches!(
            core.route_send(sender.pid(), ghost, Term::Nil).await,
            Err(NodeError::ProcessUnknown)
        ));
    }

    #[tokio::test]
    async fn test_route_send_previous_incarnation() {
        let core = test_core("incarnation@test");
        let sender = core
            .spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![])
            .await
            .unwrap();
        let stale = Pid::new(core.node_name(), sender.pid().id(), core.creation().wrapping_sub(1));
        assert!(matches!(
            core.route_send(sender.pid(), stale, Term::Nil).await,
            Err(NodeError::ProcessIncarnation)
        ));
    }

    #[tokio::test]
    async fn test_route_send_alien_sender() {
        let core = test_core("alien@test");
        let sink = core
            .spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![])
            .await
            .unwrap();
        let alien = Pid::new(atom!("elsewhere@test"), 1001, 1);
        assert!(matches!(
            core.route_send(alien, sink.pid(), Term::Nil).await,
            Err(NodeError::SenderUnknown)
        ));
    }

    #[tokio::test]
    async fn test_full_mailbox_drops_without_blocking() {
        let core = test_core("overflow@test");
        let opts = ProcessOptions {
            mailbox_size: Some(1),
            ..ProcessOptions::default()
        };
        let stuck = core
            .spawn(None, None, opts, Box::new(Stuck), vec![])
            .await
            .unwrap();
        let sender = core
            .spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![])
            .await
            .unwrap();

        for i in 0..3 {
            // Drop-with-warning policy: the send itself reports ok.
            core.route_send(sender.pid(), stuck.pid(), Term::from(i))
                .await
                .unwrap();
        }
        assert_eq!(stuck.mailbox_queue_len(), 1);
    }

    #[tokio::test]
    async fn test_route_send_reg_and_alias_reduce_to_pid_route() {
        let core = test_core("reduce@test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = core
            .spawn(Some("sink".into()), None, ProcessOptions::default(), Sink::forwarding(tx), vec![])
            .await
            .unwrap();
        let sender = core
            .spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![])
            .await
            .unwrap();
        let alias = core.new_alias(&sink).unwrap();

        core.route_send_reg(
            sender.pid(),
            ProcessId::new("sink", core.node_name()),
            Term::from(1),
        )
        .await
        .unwrap();
        core.route_send_alias(sender.pid(), alias, Term::from(2))
            .await
            .unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.message_int(), Some(1));
        assert_eq!(second.message_int(), Some(2));

        assert!(matches!(
            core.route_send_reg(
                sender.pid(),
                ProcessId::new("nobody", core.node_name()),
                Term::Nil
            )
            .await,
            Err(NodeError::ProcessUnknown)
        ));
    }

    #[tokio::test]
    async fn test_register_name_race_one_winner() {
        let core = test_core("race@test");
        let a = core.spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![]).await.unwrap();
        let b = core.spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![]).await.unwrap();

        let first = core.register_name("svc", a.pid());
        let second = core.register_name("svc", b.pid());
        assert!(first.is_ok());
        assert!(matches!(second, Err(NodeError::Taken)));

        core.unregister_name("svc").unwrap();
        assert!(matches!(
            core.unregister_name("svc"),
            Err(NodeError::NameUnknown)
        ));
    }

    #[tokio::test]
    async fn test_alias_ownership_checks() {
        let core = test_core("alias@test");
        let owner = core.spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![]).await.unwrap();
        let thief = core.spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![]).await.unwrap();

        let alias = core.new_alias(&owner).unwrap();
        assert!(matches!(
            core.delete_alias(&thief, alias),
            Err(NodeError::AliasOwner)
        ));
        core.delete_alias(&owner, alias).unwrap();
        assert!(matches!(
            core.delete_alias(&owner, alias),
            Err(NodeError::AliasUnknown)
        ));
    }

    #[tokio::test]
    async fn test_behavior_group_registry() {
        let core = test_core("behaviors@test");
        let make = || RegisteredBehavior::new(|| Sink::quiet() as Box<dyn ProcessBehavior>, Term::Nil);

        core.register_behavior("workers", "echo", make()).unwrap();
        assert!(matches!(
            core.register_behavior("workers", "echo", make()),
            Err(NodeError::Taken)
        ));
        assert!(core.registered_behavior("workers", "echo").is_ok());
        assert!(matches!(
            core.registered_behavior("workers", "nope"),
            Err(NodeError::BehaviorUnknown)
        ));
        assert!(matches!(
            core.registered_behavior("ghosts", "echo"),
            Err(NodeError::BehaviorGroupUnknown)
        ));
        assert_eq!(core.registered_behavior_group("workers").len(), 1);

        core.unregister_behavior("workers", "echo").unwrap();
        // Empty groups are purged.
        assert!(matches!(
            core.registered_behavior("workers", "echo"),
            Err(NodeError::BehaviorGroupUnknown)
        ));
    }

    #[tokio::test]
    async fn test_trap_exit_converts_signal_to_message() {
        let core = test_core("trap@test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let trapper = core
            .spawn(None, None, ProcessOptions::default(), Sink::trapping(tx), vec![])
            .await
            .unwrap();
        let other = core
            .spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![])
            .await
            .unwrap();

        core.route_exit(trapper.pid(), other.pid(), ExitReason::Custom("boom".into()))
            .await
            .unwrap();

        let envelope = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match envelope.message {
            Message::Exit { from, reason } => {
                assert_eq!(from, other.pid());
                assert_eq!(reason, ExitReason::Custom("boom".into()));
            }
            other => panic!("expected Exit, got {:?}", other),
        }
        assert!(trapper.is_alive());
    }

    #[tokio::test]
    async fn test_normal_exit_ignored_by_non_trapping() {
        let core = test_core("normal@test");
        let sink = core.spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![]).await.unwrap();
        let other = core.spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![]).await.unwrap();

        core.route_exit(sink.pid(), other.pid(), ExitReason::Normal)
            .await
            .unwrap();
        settle().await;
        assert!(sink.is_alive());
    }

    #[tokio::test]
    async fn test_stop_cancels_all_processes() {
        let core = test_core("stop@test");
        let a = core.spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![]).await.unwrap();
        let b = core.spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![]).await.unwrap();

        assert!(core.wait_with_timeout(Duration::from_millis(20)).await.is_err());
        core.stop();
        core.wait().await;
        settle().await;

        assert!(!core.is_alive());
        assert!(!a.is_alive());
        assert!(!b.is_alive());
        assert!(core.process_by_pid(a.pid()).is_none());
        assert!(core.process_by_pid(b.pid()).is_none());
    }

    #[tokio::test]
    async fn test_spawn_env_overlay() {
        let mut options = NodeOptions::default();
        options.env.insert("region".into(), Term::from("eu"));
        options.env.insert("tier".into(), Term::from("base"));
        let core = Core::new(atom!("env@test"), &options);

        let opts = ProcessOptions {
            env: [("tier".to_string(), Term::from("override"))].into_iter().collect(),
            ..ProcessOptions::default()
        };
        let process = core.spawn(None, None, opts, Sink::quiet(), vec![]).await.unwrap();
        assert_eq!(process.env("region"), Some(Term::from("eu")));
        assert_eq!(process.env("tier"), Some(Term::from("override")));
    }

    //
    // Remote paths through a recording connection
    //

    #[derive(Debug, Default)]
    struct Recorded {
        sent: Vec<(Pid, Pid, Term)>,
        ops: Vec<String>,
    }

    struct MockConnection {
        name: Atom,
        recorded: Mutex<Recorded>,
    }

    impl MockConnection {
        fn new(name: Atom) -> Arc<Self> {
            Arc::new(Self {
                name,
                recorded: Mutex::new(Recorded::default()),
            })
        }

        fn op(&self, op: impl Into<String>) {
            self.recorded.lock().ops.push(op.into());
        }
    }

    #[async_trait]
    impl Connection for MockConnection {
        fn node_name(&self) -> Atom {
            self.name
        }

        async fn send(&self, from: Pid, to: Pid, message: Term) -> Result<(), NodeError> {
            self.recorded.lock().sent.push((from, to, message));
            Ok(())
        }

        async fn send_reg(&self, _from: Pid, _to: ProcessId, _message: Term) -> Result<(), NodeError> {
            self.op("send_reg");
            Ok(())
        }

        async fn send_alias(&self, _from: Pid, _to: Alias, _message: Term) -> Result<(), NodeError> {
            self.op("send_alias");
            Ok(())
        }

        async fn link(&self, _local: Pid, _remote: Pid) -> Result<(), NodeError> {
            self.op("link");
            Ok(())
        }

        async fn unlink(&self, _local: Pid, _remote: Pid) -> Result<(), NodeError> {
            self.op("unlink");
            Ok(())
        }

        async fn link_exit(&self, _to: Pid, _terminated: Pid, reason: ExitReason) -> Result<(), NodeError> {
            self.op(format!("link_exit:{}", reason));
            Ok(())
        }

        async fn monitor(&self, _by: Pid, _target: Pid, _reference: Ref) -> Result<(), NodeError> {
            self.op("monitor");
            Ok(())
        }

        async fn demonitor(&self, _by: Pid, _target: Pid, _reference: Ref) -> Result<(), NodeError> {
            self.op("demonitor");
            Ok(())
        }

        async fn monitor_exit(
            &self,
            _to: Pid,
            _terminated: Pid,
            reason: ExitReason,
            _reference: Ref,
        ) -> Result<(), NodeError> {
            self.op(format!("monitor_exit:{}", reason));
            Ok(())
        }

        async fn monitor_reg(&self, _by: Pid, _target: ProcessId, _reference: Ref) -> Result<(), NodeError> {
            self.op("monitor_reg");
            Ok(())
        }

        async fn demonitor_reg(&self, _by: Pid, _target: ProcessId, _reference: Ref) -> Result<(), NodeError> {
            self.op("demonitor_reg");
            Ok(())
        }

        async fn monitor_exit_reg(
            &self,
            _to: Pid,
            _terminated: ProcessId,
            _reason: ExitReason,
            _reference: Ref,
        ) -> Result<(), NodeError> {
            self.op("monitor_exit_reg");
            Ok(())
        }

        async fn spawn_request(
            &self,
            behavior_name: &str,
            _request: RemoteSpawnRequest,
        ) -> Result<(), NodeError> {
            self.op(format!("spawn_request:{}", behavior_name));
            Ok(())
        }

        async fn spawn_reply(&self, _to: Pid, _reference: Ref, _spawned: Pid) -> Result<(), NodeError> {
            self.op("spawn_reply");
            Ok(())
        }

        async fn spawn_reply_error(
            &self,
            _to: Pid,
            _reference: Ref,
            _error: NodeError,
        ) -> Result<(), NodeError> {
            self.op("spawn_reply_error");
            Ok(())
        }
    }

    struct MockProto;

    #[async_trait]
    impl Proto for MockProto {
        async fn init(
            &self,
            _stream: TcpStream,
            _peer: Atom,
            _options: ProtoOptions,
            _router: Arc<dyn CoreRouter>,
        ) -> Result<Arc<dyn Connection>, NodeError> {
            Err(NodeError::Unsupported)
        }

        async fn serve(&self, token: CancellationToken, _connection: Arc<dyn Connection>) {
            token.cancelled().await;
        }
    }

    fn attach_peer(core: &Arc<Core>, name: &str) -> Arc<MockConnection> {
        let peer = Atom::new(name);
        let connection = MockConnection::new(peer);
        core.install_connection(peer, connection.clone(), Arc::new(MockProto))
            .unwrap();
        connection
    }

    #[tokio::test]
    async fn test_remote_send_goes_through_connection() {
        let core = test_core("remote_send@test");
        let peer = attach_peer(&core, "far@test");
        let sender = core.spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![]).await.unwrap();
        let remote = Pid::new(atom!("far@test"), 2000, 9);

        core.route_send(sender.pid(), remote, Term::from(7)).await.unwrap();

        let recorded = peer.recorded.lock();
        assert_eq!(recorded.sent.len(), 1);
        assert_eq!(recorded.sent[0].0, sender.pid());
        assert_eq!(recorded.sent[0].1, remote);
    }

    #[tokio::test]
    async fn test_remote_send_requires_known_sender() {
        let core = test_core("remote_sender@test");
        attach_peer(&core, "far@test");
        let ghost = Pid::new(core.node_name(), 424242, core.creation());
        let remote = Pid::new(atom!("far@test"), 2000, 9);
        assert!(matches!(
            core.route_send(ghost, remote, Term::Nil).await,
            Err(NodeError::SenderUnknown)
        ));
    }

    #[tokio::test]
    async fn test_remote_send_without_route_fails() {
        let core = test_core("noroute@test");
        let sender = core.spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![]).await.unwrap();
        let remote = Pid::new(atom!("nowhere@test"), 2000, 9);
        assert!(matches!(
            core.route_send(sender.pid(), remote, Term::Nil).await,
            Err(NodeError::NoRoute)
        ));
    }

    #[tokio::test]
    async fn test_remote_link_and_node_down() {
        let core = test_core("remote_link@test");
        let peer = attach_peer(&core, "far@test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let trapper = core
            .spawn(None, None, ProcessOptions::default(), Sink::trapping(tx), vec![])
            .await
            .unwrap();
        let remote = Pid::new(atom!("far@test"), 2000, 9);

        core.route_link(trapper.pid(), remote).await.unwrap();
        assert_eq!(core.links(trapper.pid()), vec![remote]);
        assert_eq!(peer.recorded.lock().ops, vec!["link".to_string()]);

        core.route_node_down(atom!("far@test")).await;

        let envelope = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match envelope.message {
            Message::Exit { from, reason } => {
                assert_eq!(from, remote);
                assert_eq!(reason, ExitReason::NoConnection);
            }
            other => panic!("expected Exit, got {:?}", other),
        }
        assert!(core.links(trapper.pid()).is_empty());
        assert!(core.nodes().is_empty());
    }

    #[tokio::test]
    async fn test_remote_monitor_and_node_down() {
        let core = test_core("remote_monitor@test");
        let peer = attach_peer(&core, "far@test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = core
            .spawn(None, None, ProcessOptions::default(), Sink::forwarding(tx), vec![])
            .await
            .unwrap();
        let remote = Pid::new(atom!("far@test"), 2000, 9);

        let reference = core.make_ref();
        core.route_monitor(watcher.pid(), remote, reference).await.unwrap();
        assert_eq!(peer.recorded.lock().ops, vec!["monitor".to_string()]);

        core.route_node_down(atom!("far@test")).await;

        let envelope = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match envelope.message {
            Message::Down { reference: r, source, reason } => {
                assert_eq!(r, reference);
                assert_eq!(source, DownSource::Process(remote));
                assert_eq!(reason, ExitReason::NoConnection);
            }
            other => panic!("expected Down, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_termination_notifies_remote_watcher() {
        let core = test_core("remote_watcher@test");
        let peer = attach_peer(&core, "far@test");
        let victim = core.spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![]).await.unwrap();
        let remote_watcher = Pid::new(atom!("far@test"), 2000, 9);

        let reference = core.make_ref();
        core.route_monitor(remote_watcher, victim.pid(), reference)
            .await
            .unwrap();
        core.route_exit(victim.pid(), remote_watcher, ExitReason::Custom("gone".into()))
            .await
            .unwrap();
        settle().await;

        let ops = peer.recorded.lock().ops.clone();
        assert!(ops.contains(&"monitor_exit:gone".to_string()), "ops: {:?}", ops);
    }

    #[tokio::test]
    async fn test_route_spawn_request_and_reply() {
        let core = test_core("spawnreq@test");
        core.register_behavior(
            REMOTE_SPAWN_GROUP,
            "sink",
            RegisteredBehavior::new(|| Sink::quiet() as Box<dyn ProcessBehavior>, Term::Nil),
        )
        .unwrap();

        let remote_caller = Pid::new(atom!("far@test"), 2000, 9);
        let request = RemoteSpawnRequest {
            from: remote_caller,
            reference: core.make_ref(),
            name: "spawned_sink".to_string(),
            args: vec![],
        };
        let pid = core.route_spawn_request("sink", request).await.unwrap();
        assert!(core.process_by_pid(pid).is_some());
        assert_eq!(core.process_by_name("spawned_sink").unwrap().pid(), pid);

        assert!(matches!(
            core.route_spawn_request(
                "nope",
                RemoteSpawnRequest {
                    from: remote_caller,
                    reference: core.make_ref(),
                    name: String::new(),
                    args: vec![],
                }
            )
            .await,
            Err(NodeError::BehaviorUnknown)
        ));

        // Reply side: a local waiter receives the routed result.
        let waiter = core.spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![]).await.unwrap();
        let reference = core.make_ref();
        let mut rx = waiter.register_reply(reference);
        core.route_spawn_reply(waiter.pid(), reference, Ok(Term::Pid(pid)))
            .await
            .unwrap();
        assert_eq!(rx.try_recv().unwrap().unwrap(), Term::Pid(pid));
    }

    #[tokio::test]
    async fn test_monitor_unknown_target_fires_noproc() {
        let core = test_core("noproc@test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = core
            .spawn(None, None, ProcessOptions::default(), Sink::forwarding(tx), vec![])
            .await
            .unwrap();
        let ghost = Pid::new(core.node_name(), 777_777, core.creation());

        let reference = core.make_ref();
        core.route_monitor(watcher.pid(), ghost, reference).await.unwrap();

        let envelope = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        match envelope.message {
            Message::Down { reference: r, reason, .. } => {
                assert_eq!(r, reference);
                assert_eq!(reason, ExitReason::NoProc);
            }
            other => panic!("expected Down, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_monitor_name_lazy_resolution() {
        let core = test_core("lazyname@test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = core
            .spawn(None, None, ProcessOptions::default(), Sink::forwarding(tx), vec![])
            .await
            .unwrap();

        let reference = core.make_ref();
        core.route_monitor_reg(
            watcher.pid(),
            ProcessId::new("absent", core.node_name()),
            reference,
        )
        .await
        .unwrap();

        let envelope = rx.recv().await.unwrap();
        match envelope.message {
            Message::Down { source, reason, .. } => {
                assert_eq!(source, DownSource::Name(ProcessId::new("absent", core.node_name())));
                assert_eq!(reason, ExitReason::NoProc);
            }
            other => panic!("expected Down, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_demonitor_unknown_reference() {
        let core = test_core("demon@test");
        let watcher = core.spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![]).await.unwrap();
        assert!(matches!(
            core.route_demonitor(watcher.pid(), core.make_ref()).await,
            Err(NodeError::MonitorUnknown)
        ));
    }

    #[tokio::test]
    async fn test_demonitor_stops_down_delivery() {
        let core = test_core("demon2@test");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = core
            .spawn(None, None, ProcessOptions::default(), Sink::forwarding(tx), vec![])
            .await
            .unwrap();
        let target = core.spawn(None, None, ProcessOptions::default(), Sink::quiet(), vec![]).await.unwrap();

        let reference = core.make_ref();
        core.route_monitor(watcher.pid(), target.pid(), reference).await.unwrap();
        core.route_demonitor(watcher.pid(), reference).await.unwrap();

        core.route_exit(target.pid(), watcher.pid(), ExitReason::Custom("bye".into()))
            .await
            .unwrap();
        settle().await;
        assert!(rx.try_recv().is_err());
    }
}
