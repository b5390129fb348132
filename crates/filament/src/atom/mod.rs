//! Atom (interned string) implementation.
//!
//! Node names travel inside every [`Pid`](crate::core::Pid) and
//! [`Ref`](crate::core::Ref), so they are stored as interned strings:
//!
//! - O(1) equality (index comparison)
//! - `Copy` (an atom is a `u32`)
//! - thread-safe global table
//!
//! # Example
//!
//! ```
//! use filament::atom::Atom;
//!
//! let a = Atom::new("demo@localhost");
//! let b = Atom::new("demo@localhost");
//! assert_eq!(a, b);
//! assert_eq!(a.as_str(), "demo@localhost");
//! ```

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::OnceLock;

/// An interned string.
///
/// Atoms are cheap to copy and compare; the string data lives in a global
/// table for the lifetime of the program.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Atom(u32);

static TABLE: OnceLock<AtomTable> = OnceLock::new();

struct AtomTable {
    index: DashMap<&'static str, u32>,
    strings: RwLock<Vec<&'static str>>,
}

impl AtomTable {
    fn intern(&self, s: &str) -> Atom {
        if let Some(i) = self.index.get(s) {
            return Atom(*i);
        }

        let mut strings = self.strings.write();
        // Re-check under the write lock: another thread may have won the race.
        if let Some(i) = self.index.get(s) {
            return Atom(*i);
        }

        let leaked: &'static str = Box::leak(s.to_string().into_boxed_str());
        let i = strings.len() as u32;
        strings.push(leaked);
        self.index.insert(leaked, i);
        Atom(i)
    }

    fn get(&self, atom: Atom) -> Option<&'static str> {
        self.strings.read().get(atom.0 as usize).copied()
    }
}

fn table() -> &'static AtomTable {
    TABLE.get_or_init(|| AtomTable {
        index: DashMap::new(),
        strings: RwLock::new(Vec::new()),
    })
}

impl Atom {
    /// Interns a string, returning its atom.
    pub fn new(s: &str) -> Self {
        table().intern(s)
    }

    /// Returns the string value of this atom.
    pub fn as_str(&self) -> &'static str {
        table().get(*self).expect("atom index out of range")
    }

    /// Returns the table index of this atom. Mainly useful for debugging.
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl From<&str> for Atom {
    fn from(s: &str) -> Self {
        Atom::new(s)
    }
}

impl From<String> for Atom {
    fn from(s: String) -> Self {
        Atom::new(&s)
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Atom({:?})", self.as_str())
    }
}

impl fmt::Display for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Atoms cross the wire as plain strings; the index is node-local.
impl Serialize for Atom {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Atom {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Atom::new(&s))
    }
}

/// Creates an [`Atom`] from a string literal.
///
/// ```
/// use filament::atom;
///
/// let a = atom!("normal");
/// assert_eq!(a.as_str(), "normal");
/// ```
#[macro_export]
macro_rules! atom {
    ($s:expr) => {
        $crate::atom::Atom::new($s)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_string_same_atom() {
        let a = Atom::new("hello");
        let b = Atom::new("hello");
        let c = Atom::new("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_as_str_roundtrip() {
        let a = Atom::new("node1@localhost");
        assert_eq!(a.as_str(), "node1@localhost");
    }

    #[test]
    fn test_display() {
        let a = Atom::new("display_me");
        assert_eq!(format!("{}", a), "display_me");
    }

    #[test]
    fn test_serialization_as_string() {
        let a = Atom::new("wire@host");
        let bytes = postcard::to_allocvec(&a).unwrap();
        let decoded: Atom = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(a, decoded);
        assert_eq!(decoded.as_str(), "wire@host");
    }

    #[test]
    fn test_concurrent_interning() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| Atom::new("contended")))
            .collect();
        let atoms: Vec<Atom> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(atoms.windows(2).all(|w| w[0] == w[1]));
    }
}
