//! Mailbox and control-channel message shapes.
//!
//! Every process owns three inbound channels:
//!
//! - the **mailbox**, a bounded queue of [`Envelope`]s carrying ordinary
//!   messages plus trapped exit signals and monitor notifications;
//! - the **graceful-exit** queue of [`ExitRequest`]s, which exit signals
//!   enter before the process scope is cancelled;
//! - the **direct** rendezvous channel of [`DirectRequest`]s for
//!   synchronous calls into the behavior loop.

use crate::atom::Atom;
use crate::core::{ExitReason, Pid, ProcessId, Ref, Term};
use tokio::sync::oneshot;

/// A delivered mailbox item: who sent it and what it is.
#[derive(Debug)]
pub struct Envelope {
    /// The sending process.
    pub from: Pid,
    /// The delivered message.
    pub message: Message,
}

/// A mailbox message.
///
/// Ordinary sends arrive as [`Message::User`]. The remaining variants are
/// runtime notifications: trapped exit signals, monitor downs and node
/// downs, delivered through the same mailbox so a behavior loop observes
/// them in receive order.
#[derive(Debug)]
pub enum Message {
    /// An ordinary message from another process.
    User(Term),
    /// A trapped exit signal from a linked process.
    Exit {
        /// The terminated process.
        from: Pid,
        /// Why it terminated.
        reason: ExitReason,
    },
    /// A monitored process terminated or became unreachable.
    Down {
        /// The monitor reference returned when the monitor was created.
        reference: Ref,
        /// What was being monitored.
        source: DownSource,
        /// Why the monitor fired.
        reason: ExitReason,
    },
    /// A monitored node's connection dropped.
    NodeDown {
        /// The disconnected node.
        name: Atom,
    },
}

/// What a fired monitor was watching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownSource {
    /// A monitor on a pid.
    Process(Pid),
    /// A monitor on a registered name.
    Name(ProcessId),
}

/// A graceful-exit request queued ahead of termination.
#[derive(Debug, Clone)]
pub struct ExitRequest {
    /// The process that sent the exit signal.
    pub from: Pid,
    /// The exit reason.
    pub reason: ExitReason,
}

/// A synchronous request into a behavior loop.
///
/// The caller blocks on `reply` until the loop answers or the timeout
/// elapses.
#[derive(Debug)]
pub struct DirectRequest {
    /// The request payload.
    pub message: Term,
    /// Single-shot reply slot.
    pub reply: oneshot::Sender<Term>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom;

    #[test]
    fn test_down_source_eq() {
        let pid = Pid::new(atom!("n@h"), 1001, 0);
        assert_eq!(DownSource::Process(pid), DownSource::Process(pid));
        assert_ne!(
            DownSource::Process(pid),
            DownSource::Name(ProcessId::new("svc", atom!("n@h")))
        );
    }

    #[test]
    fn test_envelope_carries_sender() {
        let from = Pid::new(atom!("n@h"), 1001, 0);
        let envelope = Envelope {
            from,
            message: Message::User(Term::from(1)),
        };
        assert_eq!(envelope.from, from);
        assert!(matches!(envelope.message, Message::User(Term::Int(1))));
    }
}
