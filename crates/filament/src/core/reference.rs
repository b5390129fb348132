//! Unique reference and alias types.
//!
//! A [`Ref`] identifies monitors, pending replies and other one-shot
//! operations. Its on-wire shape is `(node, creation, three 32-bit words)`,
//! where the words are derived from a node-local 64-bit counter:
//! word 0 holds the low 18 bits, word 1 holds the bits from position 46 up,
//! and word 2 is zero.
//!
//! An [`Alias`] is structurally a `Ref` but tagged as a second, revocable
//! address for a process.

use crate::atom::Atom;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A unique reference.
///
/// References are minted by the node core (see `make_ref` on the process
/// context) and are unique within a node incarnation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ref {
    node: Atom,
    creation: u32,
    id: [u32; 3],
}

impl Ref {
    /// Builds a reference from the minting counter value.
    ///
    /// The split keeps the words inside the ranges older wire formats
    /// accept: `id[0]` is capped at 18 bits, `id[1]` carries the high bits.
    pub fn from_counter(node: Atom, creation: u32, counter: u64) -> Self {
        Self {
            node,
            creation,
            id: [
                (counter & ((2 << 17) - 1)) as u32,
                (counter >> 46) as u32,
                0,
            ],
        }
    }

    /// Creates a reference from raw parts. Primarily for deserialization
    /// and tests.
    pub fn from_parts(node: Atom, creation: u32, id: [u32; 3]) -> Self {
        Self { node, creation, id }
    }

    /// Returns the node that minted this reference.
    #[inline]
    pub fn node(&self) -> Atom {
        self.node
    }

    /// Returns the creation epoch of the minting node incarnation.
    #[inline]
    pub const fn creation(&self) -> u32 {
        self.creation
    }

    /// Returns the three identifier words.
    #[inline]
    pub const fn id(&self) -> [u32; 3] {
        self.id
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Ref<{}.{}.{}.{}>",
            self.node, self.id[0], self.id[1], self.id[2]
        )
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#Ref<{}.{}.{}.{}>",
            self.node, self.id[0], self.id[1], self.id[2]
        )
    }
}

/// A revocable second address for a process.
///
/// An alias addresses a specific process like a pid does, but the owning
/// process can revoke it at any time, after which sends to the alias fail
/// with `ProcessUnknown`. Aliases die with their owner.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Alias(Ref);

impl Alias {
    /// Tags a reference as an alias.
    pub fn from_ref(reference: Ref) -> Self {
        Self(reference)
    }

    /// Returns the underlying reference.
    #[inline]
    pub fn as_ref_id(&self) -> Ref {
        self.0
    }

    /// Returns the node that minted this alias.
    #[inline]
    pub fn node(&self) -> Atom {
        self.0.node()
    }
}

impl fmt::Debug for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.0.id();
        write!(f, "Alias<{}.{}.{}.{}>", self.0.node(), id[0], id[1], id[2])
    }
}

impl fmt::Display for Alias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.0.id();
        write!(f, "#Alias<{}.{}.{}.{}>", self.0.node(), id[0], id[1], id[2])
    }
}
