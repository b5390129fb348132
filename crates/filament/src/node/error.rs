//! The node error taxonomy.

use thiserror::Error;

/// Errors surfaced by registry, routing and lifecycle operations.
///
/// Every variant here is caller-recoverable except [`NodeError::ProcessPanic`]
/// (fatal to the process being spawned) and [`NodeError::Io`] (fatal to the
/// listener being set up). A dropped peer connection is never an error of a
/// local call; it arrives as a `route_node_down` instead.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Application is already loaded.
    #[error("application is already loaded")]
    AppAlreadyLoaded,

    /// Application is already started.
    #[error("application is already started")]
    AppAlreadyStarted,

    /// Unknown application name.
    #[error("unknown application name")]
    AppUnknown,

    /// Application is not running.
    #[error("application is not running")]
    AppNotRunning,

    /// Unknown registered name.
    #[error("unknown registered name")]
    NameUnknown,

    /// The caller does not own the registered name.
    #[error("not the owner of the registered name")]
    NameOwner,

    /// The process cannot accept the signal right now.
    #[error("process is busy")]
    ProcessBusy,

    /// Unknown process.
    #[error("unknown process")]
    ProcessUnknown,

    /// The pid belongs to a previous incarnation of this node.
    #[error("process id belongs to a previous incarnation")]
    ProcessIncarnation,

    /// The process has terminated.
    #[error("process terminated")]
    ProcessTerminated,

    /// The behavior panicked during initialization.
    #[error("process initialization panicked")]
    ProcessPanic,

    /// Unknown monitor reference.
    #[error("unknown monitor reference")]
    MonitorUnknown,

    /// The sender pid does not belong to this node.
    #[error("unknown sender")]
    SenderUnknown,

    /// Unknown behavior name.
    #[error("unknown behavior")]
    BehaviorUnknown,

    /// Unknown behavior group.
    #[error("unknown behavior group")]
    BehaviorGroupUnknown,

    /// Unknown alias.
    #[error("unknown alias")]
    AliasUnknown,

    /// The caller does not own the alias.
    #[error("not the owner of the alias")]
    AliasOwner,

    /// No route to the node.
    #[error("no route to node")]
    NoRoute,

    /// The resource is taken.
    #[error("resource is taken")]
    Taken,

    /// The operation timed out.
    #[error("timed out")]
    Timeout,

    /// Fragmented data.
    #[error("fragmented data")]
    Fragmented,

    /// Not supported.
    #[error("not supported")]
    Unsupported,

    /// The node name is not a valid `name@host` pair.
    #[error("node name must have the form name@host: {0:?}")]
    InvalidNodeName(String),

    /// I/O failure while setting up the network listener.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
