//! The process behavior contract.
//!
//! A behavior is the polymorphic actor implementation driven by the
//! spawner: `init` runs on the spawning caller before the loop task starts,
//! and `run` is the behavior loop, executed on its own task until it
//! returns an [`ExitReason`]. Generic behaviors (server, supervisor,
//! application) compose on top of this contract in downstream crates; the
//! core only consumes it.

use crate::core::{ExitReason, Term};
use crate::node::{NodeError, ProcessContext};

// Implementors need the same macro the trait is declared with.
pub use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

/// The actor implementation attached to a process.
///
/// # Contract
///
/// - `init` is awaited by the spawn caller. Returning an error aborts the
///   spawn and rolls the process back out of the registry.
/// - `run` must call [`Started::notify`] once it is ready to receive;
///   the spawner blocks until then. Dropping the guard counts as started.
/// - The string form of the returned reason is propagated verbatim in exit
///   signals and `Down` messages; return [`ExitReason::Normal`] for a
///   clean stop.
///
/// # Example
///
/// ```ignore
/// struct Echo;
///
/// #[async_trait]
/// impl ProcessBehavior for Echo {
///     async fn init(&mut self, _ctx: &mut ProcessContext, _args: Vec<Term>) -> Result<(), NodeError> {
///         Ok(())
///     }
///
///     async fn run(&mut self, ctx: &mut ProcessContext, started: Started) -> ExitReason {
///         started.notify();
///         while let Some(envelope) = ctx.recv().await {
///             if let Message::User(term) = envelope.message {
///                 let _ = ctx.send(envelope.from, term).await;
///             }
///         }
///         ExitReason::Normal
///     }
/// }
/// ```
#[async_trait]
pub trait ProcessBehavior: Send + 'static {
    /// Initializes the process. Runs on the spawning caller, before the
    /// process is visible as started.
    async fn init(&mut self, ctx: &mut ProcessContext, args: Vec<Term>) -> Result<(), NodeError>;

    /// The behavior loop. Runs on a dedicated task; its return value is the
    /// process exit reason.
    async fn run(&mut self, ctx: &mut ProcessContext, started: Started) -> ExitReason;
}

/// Start signal handed to [`ProcessBehavior::run`].
///
/// The spawner blocks until the loop notifies (or drops) this guard, so a
/// spawn call never returns before the loop is ready to receive.
#[derive(Debug)]
pub struct Started {
    tx: Option<oneshot::Sender<()>>,
}

impl Started {
    pub(crate) fn new(tx: oneshot::Sender<()>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Signals the spawner that the loop is ready.
    pub fn notify(mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Constructor for fresh behavior instances.
///
/// Registered behaviors are spawned many times (notably by remote spawn
/// requests), so the registry stores a factory rather than an instance.
pub type BehaviorFactory = Arc<dyn Fn() -> Box<dyn ProcessBehavior> + Send + Sync>;

/// A behavior registered in a named group.
///
/// Registration is unique per `(group, name)`; the group a remote-spawn
/// request searches is [`REMOTE_SPAWN_GROUP`](crate::node::REMOTE_SPAWN_GROUP).
#[derive(Clone)]
pub struct RegisteredBehavior {
    /// Builds a fresh instance for each spawn.
    pub factory: BehaviorFactory,
    /// User data attached at registration time.
    pub data: Term,
}

impl RegisteredBehavior {
    /// Registers a behavior constructor with attached user data.
    pub fn new(
        factory: impl Fn() -> Box<dyn ProcessBehavior> + Send + Sync + 'static,
        data: Term,
    ) -> Self {
        Self {
            factory: Arc::new(factory),
            data,
        }
    }
}

impl fmt::Debug for RegisteredBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredBehavior")
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}
