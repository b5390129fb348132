//! Link and monitor bookkeeping, and termination propagation.
//!
//! Links and monitors form a general graph over pids; it is represented as
//! per-process sets of peer identifiers, never as owning references, so
//! cycles are fine. Four maps track the edges:
//!
//! - `links`: symmetric failure-propagation edges, kept in both directions
//! - `monitors`: what each local watcher is monitoring, keyed by ref
//! - `watchers` / `name_watchers`: the reverse direction, keyed by target
//!
//! Edges that cross to another node are additionally mirrored on the peer
//! through its [`Connection`](crate::node::Connection); when that
//! connection drops, [`Core::route_node_down`] walks the maps and
//! synthesizes `noconnection` signals for every crossing edge.

use crate::atom::Atom;
use crate::core::{DownSource, Envelope, ExitReason, Message, Pid, ProcessId, Ref};
use crate::node::core::Core;
use crate::node::error::NodeError;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// What a monitor is watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum MonitorTarget {
    Process(Pid),
    Name(ProcessId),
}

/// Per-node link/monitor tables. All methods are lock-scoped and free of
/// await points; the async fan-out lives on [`Core`].
#[derive(Default)]
pub(crate) struct MonitorState {
    links: Mutex<HashMap<Pid, HashSet<Pid>>>,
    monitors: Mutex<HashMap<Pid, HashMap<Ref, MonitorTarget>>>,
    watchers: Mutex<HashMap<Pid, HashMap<Ref, Pid>>>,
    name_watchers: Mutex<HashMap<ProcessId, HashMap<Ref, Pid>>>,
    node_watchers: Mutex<HashMap<Atom, HashMap<Ref, Pid>>>,
}

impl MonitorState {
    fn add_link(&self, a: Pid, b: Pid) {
        let mut links = self.links.lock();
        links.entry(a).or_default().insert(b);
        links.entry(b).or_default().insert(a);
    }

    fn remove_link(&self, a: Pid, b: Pid) {
        let mut links = self.links.lock();
        if let Some(set) = links.get_mut(&a) {
            set.remove(&b);
            if set.is_empty() {
                links.remove(&a);
            }
        }
        if let Some(set) = links.get_mut(&b) {
            set.remove(&a);
            if set.is_empty() {
                links.remove(&b);
            }
        }
    }

    fn linked(&self, pid: Pid) -> Vec<Pid> {
        self.links
            .lock()
            .get(&pid)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Removes every link edge of `pid`, returning its former peers.
    fn take_links(&self, pid: Pid) -> Vec<Pid> {
        let mut links = self.links.lock();
        let Some(peers) = links.remove(&pid) else {
            return Vec::new();
        };
        for peer in &peers {
            if let Some(set) = links.get_mut(peer) {
                set.remove(&pid);
                if set.is_empty() {
                    links.remove(peer);
                }
            }
        }
        peers.into_iter().collect()
    }

    /// Removes every link edge crossing to `node`, returning
    /// `(local, remote)` pairs.
    fn take_links_to_node(&self, node: Atom) -> Vec<(Pid, Pid)> {
        let mut links = self.links.lock();
        let mut edges = Vec::new();
        for (pid, peers) in links.iter_mut() {
            if pid.node() == node {
                continue;
            }
            peers.retain(|peer| {
                if peer.node() == node {
                    edges.push((*pid, *peer));
                    false
                } else {
                    true
                }
            });
        }
        links.retain(|pid, peers| pid.node() != node && !peers.is_empty());
        edges
    }

    fn add_monitor(&self, by: Pid, reference: Ref, target: MonitorTarget, local_watcher: bool) {
        match &target {
            MonitorTarget::Process(pid) => {
                self.watchers
                    .lock()
                    .entry(*pid)
                    .or_default()
                    .insert(reference, by);
            }
            MonitorTarget::Name(id) => {
                self.name_watchers
                    .lock()
                    .entry(id.clone())
                    .or_default()
                    .insert(reference, by);
            }
        }
        if local_watcher {
            self.monitors
                .lock()
                .entry(by)
                .or_default()
                .insert(reference, target);
        }
    }

    /// Removes one monitor by its ref, forward and reverse entries both.
    /// Works for remote watchers too, which have no forward entry.
    fn remove_monitor(&self, by: Pid, reference: Ref) -> Option<MonitorTarget> {
        let target = {
            let mut monitors = self.monitors.lock();
            let found = monitors.get_mut(&by).and_then(|m| m.remove(&reference));
            if let Some(set) = monitors.get(&by) {
                if set.is_empty() {
                    monitors.remove(&by);
                }
            }
            found
        };

        match target {
            Some(MonitorTarget::Process(pid)) => {
                let mut watchers = self.watchers.lock();
                if let Some(map) = watchers.get_mut(&pid) {
                    map.remove(&reference);
                    if map.is_empty() {
                        watchers.remove(&pid);
                    }
                }
                Some(MonitorTarget::Process(pid))
            }
            Some(MonitorTarget::Name(id)) => {
                let mut name_watchers = self.name_watchers.lock();
                if let Some(map) = name_watchers.get_mut(&id) {
                    map.remove(&reference);
                    if map.is_empty() {
                        name_watchers.remove(&id);
                    }
                }
                Some(MonitorTarget::Name(id))
            }
            None => {
                // A watcher on another node: only the reverse entry exists.
                {
                    let mut watchers = self.watchers.lock();
                    let mut found = None;
                    for (target_pid, map) in watchers.iter_mut() {
                        if map.get(&reference) == Some(&by) {
                            map.remove(&reference);
                            found = Some(MonitorTarget::Process(*target_pid));
                            break;
                        }
                    }
                    watchers.retain(|_, map| !map.is_empty());
                    if found.is_some() {
                        return found;
                    }
                }
                let mut name_watchers = self.name_watchers.lock();
                let mut found = None;
                for (target_id, map) in name_watchers.iter_mut() {
                    if map.get(&reference) == Some(&by) {
                        map.remove(&reference);
                        found = Some(MonitorTarget::Name(target_id.clone()));
                        break;
                    }
                }
                name_watchers.retain(|_, map| !map.is_empty());
                found
            }
        }
    }

    /// Drops the forward entry of a fired monitor.
    fn forget_monitor(&self, by: Pid, reference: Ref) {
        let mut monitors = self.monitors.lock();
        if let Some(map) = monitors.get_mut(&by) {
            map.remove(&reference);
            if map.is_empty() {
                monitors.remove(&by);
            }
        }
    }

    fn take_watchers(&self, target: Pid) -> Vec<(Ref, Pid)> {
        self.watchers
            .lock()
            .remove(&target)
            .map(|map| map.into_iter().collect())
            .unwrap_or_default()
    }

    fn take_name_watchers(&self, target: &ProcessId) -> Vec<(Ref, Pid)> {
        self.name_watchers
            .lock()
            .remove(target)
            .map(|map| map.into_iter().collect())
            .unwrap_or_default()
    }

    /// Removes the monitors owned by a dead watcher, returning the remote
    /// targets that should receive a demonitor.
    fn drop_owned_monitors(&self, by: Pid, local_node: Atom) -> Vec<(Ref, MonitorTarget)> {
        let owned = {
            let mut monitors = self.monitors.lock();
            monitors.remove(&by).unwrap_or_default()
        };

        let mut remote = Vec::new();
        for (reference, target) in owned {
            match &target {
                MonitorTarget::Process(pid) => {
                    {
                        let mut watchers = self.watchers.lock();
                        if let Some(map) = watchers.get_mut(pid) {
                            map.remove(&reference);
                            if map.is_empty() {
                                watchers.remove(pid);
                            }
                        }
                    }
                    if pid.node() != local_node {
                        remote.push((reference, target));
                    }
                }
                MonitorTarget::Name(id) => {
                    {
                        let mut name_watchers = self.name_watchers.lock();
                        if let Some(map) = name_watchers.get_mut(id) {
                            map.remove(&reference);
                            if map.is_empty() {
                                name_watchers.remove(id);
                            }
                        }
                    }
                    if id.node != local_node {
                        remote.push((reference, target));
                    }
                }
            }
        }
        remote
    }

    /// Removes local watchers whose monitor target lives on `node`,
    /// returning what fired.
    fn take_monitors_to_node(&self, node: Atom) -> Vec<(Pid, Ref, MonitorTarget)> {
        let mut fired = Vec::new();
        {
            let mut monitors = self.monitors.lock();
            for (watcher, map) in monitors.iter_mut() {
                map.retain(|reference, target| {
                    let crosses = match target {
                        MonitorTarget::Process(pid) => pid.node() == node,
                        MonitorTarget::Name(id) => id.node == node,
                    };
                    if crosses {
                        fired.push((*watcher, *reference, target.clone()));
                    }
                    !crosses
                });
            }
            monitors.retain(|_, map| !map.is_empty());
        }
        // Reverse entries for those targets are keyed by pids/names on the
        // dead node; drop them wholesale.
        self.watchers.lock().retain(|pid, _| pid.node() != node);
        self.name_watchers.lock().retain(|id, _| id.node != node);
        fired
    }

    /// Removes watcher entries that belong to processes on `node`.
    fn drop_watchers_from_node(&self, node: Atom) {
        {
            let mut watchers = self.watchers.lock();
            for map in watchers.values_mut() {
                map.retain(|_, watcher| watcher.node() != node);
            }
            watchers.retain(|_, map| !map.is_empty());
        }
        let mut name_watchers = self.name_watchers.lock();
        for map in name_watchers.values_mut() {
            map.retain(|_, watcher| watcher.node() != node);
        }
        name_watchers.retain(|_, map| !map.is_empty());
    }

    fn add_node_watcher(&self, by: Pid, node: Atom, reference: Ref) {
        self.node_watchers
            .lock()
            .entry(node)
            .or_default()
            .insert(reference, by);
    }

    fn remove_node_watcher(&self, by: Pid, reference: Ref) -> bool {
        let mut node_watchers = self.node_watchers.lock();
        let mut removed = false;
        for map in node_watchers.values_mut() {
            if map.get(&reference) == Some(&by) {
                map.remove(&reference);
                removed = true;
                break;
            }
        }
        node_watchers.retain(|_, map| !map.is_empty());
        removed
    }

    fn take_node_watchers(&self, node: Atom) -> Vec<(Ref, Pid)> {
        self.node_watchers
            .lock()
            .remove(&node)
            .map(|map| map.into_iter().collect())
            .unwrap_or_default()
    }

    fn drop_node_watches_of(&self, pid: Pid) {
        let mut node_watchers = self.node_watchers.lock();
        for map in node_watchers.values_mut() {
            map.retain(|_, watcher| *watcher != pid);
        }
        node_watchers.retain(|_, map| !map.is_empty());
    }

    fn monitored_targets(&self, by: Pid) -> Vec<MonitorTarget> {
        self.monitors
            .lock()
            .get(&by)
            .map(|map| map.values().cloned().collect())
            .unwrap_or_default()
    }

    fn watching(&self, target: Pid) -> Vec<Pid> {
        self.watchers
            .lock()
            .get(&target)
            .map(|map| map.values().copied().collect())
            .unwrap_or_default()
    }
}

impl Core {
    fn is_local_pid(&self, pid: Pid) -> bool {
        pid.node() == self.node_name()
    }

    /// Mailbox delivery for runtime notifications: full mailboxes drop the
    /// notification with a warning, same policy as ordinary sends.
    fn deliver_notification(&self, to: Pid, from: Pid, message: Message) {
        let Some(process) = self.process_by_pid(to) else {
            debug!(%to, "notification target is gone");
            return;
        };
        if let Err(e) = process.deliver(Envelope { from, message }) {
            warn!(%to, error = %e, "notification dropped");
        }
    }

    //
    // Links
    //

    pub(crate) async fn route_link(&self, a: Pid, b: Pid) -> Result<(), NodeError> {
        debug!(node = %self.node_name(), %a, %b, "route link");
        let a_local = self.is_local_pid(a);
        let b_local = self.is_local_pid(b);
        if !a_local && !b_local {
            return Err(NodeError::SenderUnknown);
        }

        if a_local && b_local {
            if self.process_by_pid(b).is_none() {
                return self.route_exit(a, b, ExitReason::NoProc).await;
            }
            self.monitor.add_link(a, b);
            return Ok(());
        }

        let (local, remote) = if a_local { (a, b) } else { (b, a) };
        if !a_local {
            // Incoming link from the peer: bounce an exit if the local
            // side is already gone, otherwise just record the edge.
            if self.process_by_pid(local).is_none() {
                return self.route_exit(a, local, ExitReason::NoProc).await;
            }
            self.monitor.add_link(a, b);
            return Ok(());
        }
        self.monitor.add_link(a, b);

        match self.get_connection(remote.node()).await {
            Ok(connection) => match connection.link(local, remote).await {
                Ok(()) => Ok(()),
                Err(e) => {
                    self.monitor.remove_link(a, b);
                    Err(e)
                }
            },
            Err(_) => {
                self.monitor.remove_link(a, b);
                self.route_exit(local, remote, ExitReason::NoConnection).await
            }
        }
    }

    pub(crate) async fn route_unlink(&self, a: Pid, b: Pid) -> Result<(), NodeError> {
        debug!(node = %self.node_name(), %a, %b, "route unlink");
        self.monitor.remove_link(a, b);

        if self.is_local_pid(a) && !self.is_local_pid(b) {
            if let Ok(connection) = self.get_connection(b.node()).await {
                let _ = connection.unlink(a, b).await;
            }
        }
        Ok(())
    }

    /// Delivers an exit signal from `terminated` to `to`.
    ///
    /// Trap-exit processes observe it as a mailbox message; everyone else
    /// is cancelled, except that `normal` only reaches trap-exit
    /// processes.
    pub(crate) async fn route_exit(
        &self,
        to: Pid,
        terminated: Pid,
        reason: ExitReason,
    ) -> Result<(), NodeError> {
        debug!(node = %self.node_name(), %to, %terminated, %reason, "route exit");
        if self.is_local_pid(to) {
            let process = self.process_by_pid(to).ok_or(NodeError::ProcessUnknown)?;
            if process.trap_exit() {
                return process.deliver(Envelope {
                    from: terminated,
                    message: Message::Exit {
                        from: terminated,
                        reason,
                    },
                });
            }
            if reason.is_normal() {
                return Ok(());
            }
            return process.exit_signal(terminated, reason);
        }

        let connection = self.get_connection(to.node()).await?;
        connection.link_exit(to, terminated, reason).await
    }

    //
    // Monitors
    //

    pub(crate) async fn route_monitor(
        &self,
        by: Pid,
        target: Pid,
        reference: Ref,
    ) -> Result<(), NodeError> {
        debug!(node = %self.node_name(), %by, %target, %reference, "route monitor");
        let by_local = self.is_local_pid(by);

        if self.is_local_pid(target) {
            if self.process_by_pid(target).is_none() {
                // Lazy resolution: a missing target fires immediately.
                return self
                    .route_monitor_exit(by, target, ExitReason::NoProc, reference)
                    .await;
            }
            self.monitor
                .add_monitor(by, reference, MonitorTarget::Process(target), by_local);
            return Ok(());
        }

        if !by_local {
            return Err(NodeError::SenderUnknown);
        }
        self.monitor
            .add_monitor(by, reference, MonitorTarget::Process(target), true);

        let down = match self.get_connection(target.node()).await {
            Ok(connection) => connection.monitor(by, target, reference).await.is_err(),
            Err(_) => true,
        };
        if down {
            self.monitor.remove_monitor(by, reference);
            self.route_monitor_exit(by, target, ExitReason::NoConnection, reference)
                .await?;
        }
        Ok(())
    }

    pub(crate) async fn route_monitor_reg(
        &self,
        by: Pid,
        target: ProcessId,
        reference: Ref,
    ) -> Result<(), NodeError> {
        debug!(node = %self.node_name(), %by, %target, %reference, "route monitor by name");
        let by_local = self.is_local_pid(by);

        if target.node == self.node_name() {
            if self.process_by_name(&target.name).is_none() {
                return self
                    .route_monitor_exit_reg(by, target, ExitReason::NoProc, reference)
                    .await;
            }
            self.monitor
                .add_monitor(by, reference, MonitorTarget::Name(target), by_local);
            return Ok(());
        }

        if !by_local {
            return Err(NodeError::SenderUnknown);
        }
        self.monitor
            .add_monitor(by, reference, MonitorTarget::Name(target.clone()), true);

        let down = match self.get_connection(target.node).await {
            Ok(connection) => connection.monitor_reg(by, target.clone(), reference).await.is_err(),
            Err(_) => true,
        };
        if down {
            self.monitor.remove_monitor(by, reference);
            self.route_monitor_exit_reg(by, target, ExitReason::NoConnection, reference)
                .await?;
        }
        Ok(())
    }

    pub(crate) async fn route_demonitor(&self, by: Pid, reference: Ref) -> Result<(), NodeError> {
        debug!(node = %self.node_name(), %by, %reference, "route demonitor");
        let target = self
            .monitor
            .remove_monitor(by, reference)
            .ok_or(NodeError::MonitorUnknown)?;

        if !self.is_local_pid(by) {
            return Ok(());
        }
        match target {
            MonitorTarget::Process(pid) if !self.is_local_pid(pid) => {
                let connection = self.get_connection(pid.node()).await?;
                connection.demonitor(by, pid, reference).await
            }
            MonitorTarget::Name(id) if id.node != self.node_name() => {
                let connection = self.get_connection(id.node).await?;
                connection.demonitor_reg(by, id, reference).await
            }
            _ => Ok(()),
        }
    }

    pub(crate) async fn route_monitor_exit(
        &self,
        to: Pid,
        terminated: Pid,
        reason: ExitReason,
        reference: Ref,
    ) -> Result<(), NodeError> {
        if self.is_local_pid(to) {
            // Forward and reverse entries both go; the ref has fired.
            self.monitor.remove_monitor(to, reference);
            self.deliver_notification(
                to,
                terminated,
                Message::Down {
                    reference,
                    source: DownSource::Process(terminated),
                    reason,
                },
            );
            return Ok(());
        }
        let connection = self.get_connection(to.node()).await?;
        connection.monitor_exit(to, terminated, reason, reference).await
    }

    pub(crate) async fn route_monitor_exit_reg(
        &self,
        to: Pid,
        terminated: ProcessId,
        reason: ExitReason,
        reference: Ref,
    ) -> Result<(), NodeError> {
        if self.is_local_pid(to) {
            self.monitor.remove_monitor(to, reference);
            self.deliver_notification(
                to,
                to,
                Message::Down {
                    reference,
                    source: DownSource::Name(terminated),
                    reason,
                },
            );
            return Ok(());
        }
        let connection = self.get_connection(to.node()).await?;
        connection
            .monitor_exit_reg(to, terminated, reason, reference)
            .await
    }

    //
    // Node monitors
    //

    pub(crate) fn monitor_node(&self, by: Pid, node: Atom) -> Ref {
        let reference = self.make_ref();
        self.monitor.add_node_watcher(by, node, reference);
        reference
    }

    pub(crate) fn demonitor_node(&self, by: Pid, reference: Ref) -> Result<(), NodeError> {
        if self.monitor.remove_node_watcher(by, reference) {
            Ok(())
        } else {
            Err(NodeError::MonitorUnknown)
        }
    }

    //
    // Termination propagation
    //

    /// Fans a process termination out to its linked processes and watchers,
    /// local and remote.
    pub(crate) async fn handle_terminated(
        &self,
        pid: Pid,
        name: Option<&str>,
        reason: ExitReason,
    ) {
        debug!(node = %self.node_name(), %pid, %reason, "handle terminated");

        for peer in self.monitor.take_links(pid) {
            if self.is_local_pid(peer) {
                if let Err(e) = self.route_exit(peer, pid, reason.clone()).await {
                    debug!(%peer, error = %e, "exit signal not delivered");
                }
            } else if let Ok(connection) = self.get_connection(peer.node()).await {
                let _ = connection.link_exit(peer, pid, reason.clone()).await;
            }
        }

        for (reference, watcher) in self.monitor.take_watchers(pid) {
            if self.is_local_pid(watcher) {
                self.monitor.forget_monitor(watcher, reference);
                self.deliver_notification(
                    watcher,
                    pid,
                    Message::Down {
                        reference,
                        source: DownSource::Process(pid),
                        reason: reason.clone(),
                    },
                );
            } else if let Ok(connection) = self.get_connection(watcher.node()).await {
                let _ = connection
                    .monitor_exit(watcher, pid, reason.clone(), reference)
                    .await;
            }
        }

        if let Some(name) = name {
            let target = ProcessId::new(name, self.node_name());
            for (reference, watcher) in self.monitor.take_name_watchers(&target) {
                if self.is_local_pid(watcher) {
                    self.monitor.forget_monitor(watcher, reference);
                    self.deliver_notification(
                        watcher,
                        pid,
                        Message::Down {
                            reference,
                            source: DownSource::Name(target.clone()),
                            reason: reason.clone(),
                        },
                    );
                } else if let Ok(connection) = self.get_connection(watcher.node()).await {
                    let _ = connection
                        .monitor_exit_reg(watcher, target.clone(), reason.clone(), reference)
                        .await;
                }
            }
        }

        // Monitors the dead process owned: peers should stop tracking us.
        for (reference, target) in self.monitor.drop_owned_monitors(pid, self.node_name()) {
            match target {
                MonitorTarget::Process(remote) => {
                    if let Ok(connection) = self.get_connection(remote.node()).await {
                        let _ = connection.demonitor(pid, remote, reference).await;
                    }
                }
                MonitorTarget::Name(id) => {
                    if let Ok(connection) = self.get_connection(id.node).await {
                        let _ = connection.demonitor_reg(pid, id, reference).await;
                    }
                }
            }
        }

        self.monitor.drop_node_watches_of(pid);
    }

    /// Synthesizes `noconnection` exits and downs for every link and
    /// monitor crossing to a node whose connection dropped.
    pub(crate) async fn route_node_down(&self, name: Atom) {
        debug!(node = %self.node_name(), peer = %name, "route node down");
        self.network.forget_connection(name);

        for (local, remote) in self.monitor.take_links_to_node(name) {
            if let Err(e) = self
                .route_exit(local, remote, ExitReason::NoConnection)
                .await
            {
                debug!(%local, error = %e, "node-down exit not delivered");
            }
        }

        for (watcher, reference, target) in self.monitor.take_monitors_to_node(name) {
            let source = match target {
                MonitorTarget::Process(pid) => DownSource::Process(pid),
                MonitorTarget::Name(id) => DownSource::Name(id),
            };
            self.deliver_notification(
                watcher,
                watcher,
                Message::Down {
                    reference,
                    source,
                    reason: ExitReason::NoConnection,
                },
            );
        }

        self.monitor.drop_watchers_from_node(name);

        for (_reference, watcher) in self.monitor.take_node_watchers(name) {
            self.deliver_notification(watcher, watcher, Message::NodeDown { name });
        }
    }

    //
    // Introspection
    //

    pub(crate) fn links(&self, pid: Pid) -> Vec<Pid> {
        self.monitor.linked(pid)
    }

    pub(crate) fn monitors(&self, pid: Pid) -> Vec<Pid> {
        self.monitor
            .monitored_targets(pid)
            .into_iter()
            .filter_map(|target| match target {
                MonitorTarget::Process(p) => Some(p),
                MonitorTarget::Name(_) => None,
            })
            .collect()
    }

    pub(crate) fn monitors_by_name(&self, pid: Pid) -> Vec<ProcessId> {
        self.monitor
            .monitored_targets(pid)
            .into_iter()
            .filter_map(|target| match target {
                MonitorTarget::Process(_) => None,
                MonitorTarget::Name(id) => Some(id),
            })
            .collect()
    }

    pub(crate) fn monitored_by(&self, pid: Pid) -> Vec<Pid> {
        self.monitor.watching(pid)
    }
}
