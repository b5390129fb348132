//! Dynamic message terms.
//!
//! Mailboxes are heterogeneous: any process can send any value to any other
//! process, locally or across a connection. [`Term`] is the dynamic value
//! type that makes that possible while staying serializable.

use crate::atom::Atom;
use crate::core::{Pid, Ref};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamic, wire-portable message value.
///
/// # Examples
///
/// ```
/// use filament::core::Term;
///
/// let t = Term::from(42);
/// assert_eq!(t.as_int(), Some(42));
///
/// let t = Term::Tuple(vec![Term::from("get"), Term::from(1)]);
/// assert_eq!(t.to_string(), r#"{"get", 1}"#);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub enum Term {
    /// The empty term.
    #[default]
    Nil,
    /// An interned symbolic constant. Booleans are the atoms `true`/`false`.
    Atom(Atom),
    /// A signed integer.
    Int(i64),
    /// A floating point number.
    Float(f64),
    /// A UTF-8 string.
    Str(String),
    /// Raw bytes.
    Binary(Vec<u8>),
    /// An ordered, fixed-shape group of terms.
    Tuple(Vec<Term>),
    /// A homogeneous-by-convention sequence of terms.
    List(Vec<Term>),
    /// A process identifier.
    Pid(Pid),
    /// A unique reference.
    Ref(Ref),
}

impl Term {
    /// Returns the integer value, if this term is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Term::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the string value, if this term is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Term::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the atom, if this term is an `Atom`.
    pub fn as_atom(&self) -> Option<Atom> {
        match self {
            Term::Atom(a) => Some(*a),
            _ => None,
        }
    }

    /// Returns the pid, if this term is a `Pid`.
    pub fn as_pid(&self) -> Option<Pid> {
        match self {
            Term::Pid(p) => Some(*p),
            _ => None,
        }
    }
}

impl From<i64> for Term {
    fn from(i: i64) -> Self {
        Term::Int(i)
    }
}

impl From<i32> for Term {
    fn from(i: i32) -> Self {
        Term::Int(i64::from(i))
    }
}

impl From<f64> for Term {
    fn from(f: f64) -> Self {
        Term::Float(f)
    }
}

impl From<bool> for Term {
    fn from(b: bool) -> Self {
        Term::Atom(Atom::new(if b { "true" } else { "false" }))
    }
}

impl From<&str> for Term {
    fn from(s: &str) -> Self {
        Term::Str(s.to_string())
    }
}

impl From<String> for Term {
    fn from(s: String) -> Self {
        Term::Str(s)
    }
}

impl From<Atom> for Term {
    fn from(a: Atom) -> Self {
        Term::Atom(a)
    }
}

impl From<Pid> for Term {
    fn from(p: Pid) -> Self {
        Term::Pid(p)
    }
}

impl From<Ref> for Term {
    fn from(r: Ref) -> Self {
        Term::Ref(r)
    }
}

impl From<Vec<u8>> for Term {
    fn from(b: Vec<u8>) -> Self {
        Term::Binary(b)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, items: &[Term]) -> fmt::Result {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{}", item)?;
            }
            Ok(())
        }

        match self {
            Term::Nil => f.write_str("nil"),
            Term::Atom(a) => write!(f, "{}", a),
            Term::Int(i) => write!(f, "{}", i),
            Term::Float(x) => write!(f, "{}", x),
            Term::Str(s) => write!(f, "{:?}", s),
            Term::Binary(b) => write!(f, "<<{} bytes>>", b.len()),
            Term::Tuple(items) => {
                f.write_str("{")?;
                join(f, items)?;
                f.write_str("}")
            }
            Term::List(items) => {
                f.write_str("[")?;
                join(f, items)?;
                f.write_str("]")
            }
            Term::Pid(p) => write!(f, "{}", p),
            Term::Ref(r) => write!(f, "{}", r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom;

    #[test]
    fn test_from_conversions() {
        assert_eq!(Term::from(5), Term::Int(5));
        assert_eq!(Term::from("x"), Term::Str("x".into()));
        assert_eq!(Term::from(true), Term::Atom(atom!("true")));
        assert_eq!(Term::from(atom!("ok")), Term::Atom(atom!("ok")));
    }

    #[test]
    fn test_accessors() {
        assert_eq!(Term::Int(7).as_int(), Some(7));
        assert_eq!(Term::Str("a".into()).as_int(), None);
        assert_eq!(Term::Str("a".into()).as_str(), Some("a"));
        assert_eq!(Term::Atom(atom!("ok")).as_atom(), Some(atom!("ok")));
    }

    #[test]
    fn test_display() {
        let t = Term::Tuple(vec![Term::from(atom!("reply")), Term::from(1)]);
        assert_eq!(t.to_string(), "{reply, 1}");
        let l = Term::List(vec![Term::from(1), Term::from(2)]);
        assert_eq!(l.to_string(), "[1, 2]");
    }

    #[test]
    fn test_serialization() {
        let t = Term::Tuple(vec![
            Term::Atom(atom!("call")),
            Term::Int(-3),
            Term::List(vec![Term::Binary(vec![1, 2, 3]), Term::Nil]),
        ]);
        let bytes = postcard::to_allocvec(&t).unwrap();
        let decoded: Term = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(t, decoded);
    }
}
