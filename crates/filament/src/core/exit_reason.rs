//! Process exit reasons.
//!
//! An [`ExitReason`] describes why a process terminated. It travels in exit
//! signals and monitor `Down` messages, locally and across connections. On
//! the wire the reason is a plain string; the well-known reasons get their
//! own variants so matching stays cheap, and anything else rides in
//! [`ExitReason::Custom`] verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The reason a process exited.
///
/// `Normal` is special for links: a normal exit is only observed by linked
/// processes that trap exits. Every other reason propagates.
///
/// # Examples
///
/// ```
/// use filament::core::ExitReason;
///
/// assert!(ExitReason::Normal.is_normal());
/// assert!(!ExitReason::from("boom").is_normal());
/// assert_eq!(ExitReason::from("noproc"), ExitReason::NoProc);
/// assert_eq!(ExitReason::from("boom").to_string(), "boom");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExitReason {
    /// The behavior loop finished its work.
    #[default]
    Normal,

    /// Requested shutdown, e.g. during node stop.
    Shutdown,

    /// Forceful termination, also reported by a process whose scope was
    /// cancelled without a pending graceful-exit record.
    Kill,

    /// The behavior panicked and the catch-panic policy was enabled.
    Panic,

    /// The target process did not exist when a link or monitor was set up.
    NoProc,

    /// The connection to the target's node was lost.
    NoConnection,

    /// Any other reason, propagated verbatim.
    Custom(String),
}

impl ExitReason {
    /// Returns `true` for [`ExitReason::Normal`].
    ///
    /// Normal exits do not terminate linked processes; only trap-exit
    /// processes observe them.
    #[inline]
    pub fn is_normal(&self) -> bool {
        matches!(self, ExitReason::Normal)
    }

    /// Creates a custom exit reason from any displayable value.
    pub fn custom(reason: impl fmt::Display) -> Self {
        ExitReason::from(reason.to_string())
    }
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::Normal => f.write_str("normal"),
            ExitReason::Shutdown => f.write_str("shutdown"),
            ExitReason::Kill => f.write_str("kill"),
            ExitReason::Panic => f.write_str("panic"),
            ExitReason::NoProc => f.write_str("noproc"),
            ExitReason::NoConnection => f.write_str("noconnection"),
            ExitReason::Custom(reason) => f.write_str(reason),
        }
    }
}

impl From<&str> for ExitReason {
    fn from(s: &str) -> Self {
        match s {
            "normal" => ExitReason::Normal,
            "shutdown" => ExitReason::Shutdown,
            "kill" => ExitReason::Kill,
            "panic" => ExitReason::Panic,
            "noproc" => ExitReason::NoProc,
            "noconnection" => ExitReason::NoConnection,
            other => ExitReason::Custom(other.to_string()),
        }
    }
}

impl From<String> for ExitReason {
    fn from(s: String) -> Self {
        ExitReason::from(s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_normal() {
        assert!(ExitReason::Normal.is_normal());
        assert!(!ExitReason::Shutdown.is_normal());
        assert!(!ExitReason::Kill.is_normal());
        assert!(!ExitReason::Custom("boom".into()).is_normal());
    }

    #[test]
    fn test_display_verbatim_strings() {
        assert_eq!(ExitReason::Normal.to_string(), "normal");
        assert_eq!(ExitReason::Kill.to_string(), "kill");
        assert_eq!(ExitReason::Panic.to_string(), "panic");
        assert_eq!(ExitReason::NoProc.to_string(), "noproc");
        assert_eq!(ExitReason::NoConnection.to_string(), "noconnection");
        assert_eq!(ExitReason::Custom("boom".into()).to_string(), "boom");
    }

    #[test]
    fn test_from_str_roundtrip() {
        for s in ["normal", "shutdown", "kill", "panic", "noproc", "noconnection", "boom"] {
            assert_eq!(ExitReason::from(s).to_string(), s);
        }
    }

    #[test]
    fn test_well_known_strings_fold_to_variants() {
        assert_eq!(ExitReason::from("normal"), ExitReason::Normal);
        assert_eq!(ExitReason::from("noconnection"), ExitReason::NoConnection);
        assert!(matches!(ExitReason::from("other"), ExitReason::Custom(_)));
    }

    #[test]
    fn test_serialization() {
        let reasons = vec![
            ExitReason::Normal,
            ExitReason::Kill,
            ExitReason::NoProc,
            ExitReason::Custom("database gone".into()),
        ];
        for reason in reasons {
            let bytes = postcard::to_allocvec(&reason).unwrap();
            let decoded: ExitReason = postcard::from_bytes(&bytes).unwrap();
            assert_eq!(reason, decoded);
        }
    }
}
