//! # Filament - distributed actor runtime core
//!
//! Filament hosts lightweight *processes* (actors) on a *node*. Processes
//! communicate by asynchronous messages, are identified by globally unique
//! identifiers, can be linked and monitored, and may transparently address
//! peers on other nodes through a pluggable TCP-based distribution layer.
//!
//! This crate is the routing core:
//!
//! - **Processes**: isolated tokio tasks with bounded mailboxes
//! - **Registry**: concurrent lookup by pid, registered name and alias
//! - **Links**: bidirectional failure propagation between processes
//! - **Monitors**: unidirectional process observation with `Down` delivery
//! - **Router**: one dispatch path for local mailbox delivery and remote
//!   forwarding over a peer [`Connection`](node::Connection)
//!
//! The actor behaviors themselves (generic server, supervisor, application)
//! as well as the name-resolution service and the distribution wire codec
//! are external collaborators plugged in through the traits in [`node`].
//!
//! # Quick start
//!
//! ```ignore
//! use filament::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), NodeError> {
//!     let node = Node::start("demo@localhost", NodeOptions::default()).await?;
//!
//!     let echo = node.spawn(Box::new(Echo::default()), vec![]).await?;
//!     println!("spawned {}", echo.pid());
//!
//!     node.stop();
//!     node.wait().await;
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};

/// Interned node-name strings.
pub mod atom;

/// Identifier, term and message types shared across the runtime.
pub mod core;

/// The process behavior contract consumed by the spawner.
pub mod behavior;

/// The node: registry, spawner, router and network surface.
pub mod node;

/// Global panic-isolation policy.
///
/// When enabled (the default), a panic inside a behavior's `init` rolls the
/// process back out of the registry and surfaces as an error to the spawn
/// caller, and a panic inside the behavior loop terminates the process with
/// reason [`ExitReason::Panic`](core::ExitReason::Panic). When disabled,
/// panics propagate, which is deliberate for development builds.
static CATCH_PANIC: AtomicBool = AtomicBool::new(true);

/// Returns whether panic isolation is currently enabled.
pub fn catch_panic() -> bool {
    CATCH_PANIC.load(Ordering::Relaxed)
}

/// Enables or disables panic isolation for behavior callbacks.
///
/// Returns the previous value.
pub fn set_catch_panic(enabled: bool) -> bool {
    CATCH_PANIC.swap(enabled, Ordering::Relaxed)
}

/// Prelude module for convenient imports.
///
/// ```ignore
/// use filament::prelude::*;
/// ```
pub mod prelude {
    pub use crate::atom::Atom;
    pub use crate::behavior::{ProcessBehavior, RegisteredBehavior, Started};
    pub use crate::core::{
        Alias, DownSource, Envelope, ExitReason, Message, Pid, ProcessId, Ref, Term,
    };
    pub use crate::node::{
        Connection, CoreRouter, Node, NodeError, NodeOptions, Process, ProcessContext,
        ProcessInfo, ProcessOptions,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catch_panic_toggle() {
        let prev = set_catch_panic(false);
        assert!(!catch_panic());
        set_catch_panic(true);
        assert!(catch_panic());
        set_catch_panic(prev);
    }
}
