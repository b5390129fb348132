//! Process identifier types.
//!
//! A [`Pid`] uniquely identifies a process across a cluster. It is the
//! triple `(node, id, creation)`, following Erlang's PID structure:
//!
//! - **node**: the node the process lives on, as an [`Atom`]
//! - **id**: a monotonically increasing 64-bit id, unique within one
//!   incarnation of that node
//! - **creation**: a 32-bit epoch fixed at node start, distinguishing
//!   incarnations of the same node name
//!
//! Messages addressed to a pid whose creation does not match the target
//! node's current creation are rejected, so stale pids from a previous
//! incarnation can never reach a new process that happens to reuse the id.
//!
//! A [`ProcessId`] addresses a process by *registered name* on some node
//! instead; it is resolved to a pid at delivery time.

use crate::atom::Atom;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A process identifier.
///
/// Pids are minted by the node core; user code obtains them from spawn
/// results and message envelopes.
///
/// # Examples
///
/// ```
/// use filament::atom::Atom;
/// use filament::core::Pid;
///
/// let pid = Pid::new(Atom::new("demo@localhost"), 1001, 42);
/// assert_eq!(pid.id(), 1001);
/// assert_eq!(pid.creation(), 42);
/// assert_eq!(format!("{}", pid), "<demo@localhost.1001.42>");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pid {
    node: Atom,
    id: u64,
    creation: u32,
}

impl Pid {
    /// Creates a pid from its parts.
    ///
    /// This is used by the identifier mint, deserialization and tests;
    /// processes never pick their own ids.
    pub fn new(node: Atom, id: u64, creation: u32) -> Self {
        Self { node, id, creation }
    }

    /// Returns the node this process lives on.
    #[inline]
    pub fn node(&self) -> Atom {
        self.node
    }

    /// Returns the process id within the node.
    #[inline]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Returns the creation epoch of the node incarnation that minted
    /// this pid.
    #[inline]
    pub const fn creation(&self) -> u32 {
        self.creation
    }
}

impl fmt::Debug for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pid<{}.{}.{}>", self.node, self.id, self.creation)
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}.{}.{}>", self.node, self.id, self.creation)
    }
}

/// A registered-name address: `name` on `node`.
///
/// Used for sends and monitors that target a name rather than a pid. The
/// name is resolved on the owning node at delivery time, so the target may
/// be restarted (with a fresh pid) between sends without breaking senders.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessId {
    /// Registered process name.
    pub name: String,
    /// Node the name is registered on.
    pub node: Atom,
}

impl ProcessId {
    /// Creates a registered-name address.
    pub fn new(name: impl Into<String>, node: Atom) -> Self {
        Self {
            name: name.into(),
            node,
        }
    }
}

impl fmt::Debug for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProcessId<{}:{}>", self.name, self.node)
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.name, self.node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom;

    #[test]
    fn test_pid_parts() {
        let node = atom!("a@b");
        let pid = Pid::new(node, 1001, 7);
        assert_eq!(pid.node(), node);
        assert_eq!(pid.id(), 1001);
        assert_eq!(pid.creation(), 7);
    }

    #[test]
    fn test_creation_distinguishes_pids() {
        let node = atom!("a@b");
        assert_ne!(Pid::new(node, 42, 0), Pid::new(node, 42, 1));
    }

    #[test]
    fn test_pid_display() {
        let pid = Pid::new(atom!("n1@host"), 1002, 3);
        assert_eq!(format!("{}", pid), "<n1@host.1002.3>");
        assert_eq!(format!("{:?}", pid), "Pid<n1@host.1002.3>");
    }

    #[test]
    fn test_pid_serialization() {
        let pid = Pid::new(atom!("n1@host"), 123, 5);
        let bytes = postcard::to_allocvec(&pid).unwrap();
        let decoded: Pid = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(pid, decoded);
        assert_eq!(decoded.node().as_str(), "n1@host");
    }

    #[test]
    fn test_pid_hash() {
        use std::collections::HashSet;

        let node = atom!("a@b");
        let mut set = HashSet::new();
        set.insert(Pid::new(node, 1, 0));
        set.insert(Pid::new(node, 2, 0));
        set.insert(Pid::new(node, 1, 0));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_process_id_display() {
        let id = ProcessId::new("registrar", atom!("n1@host"));
        assert_eq!(format!("{}", id), "registrar:n1@host");
    }
}
