//! Node bootstrap options.

use crate::core::Term;
use crate::node::connection::{Handshake, Proto};
use crate::node::network::Resolver;
use std::collections::HashMap;
use std::sync::Arc;

/// Default start of the listening port range.
pub const DEFAULT_LISTEN_BEGIN: u16 = 15000;
/// Default end of the listening port range.
pub const DEFAULT_LISTEN_END: u16 = 65000;

/// TLS mode for peer connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// No TLS.
    #[default]
    Disabled,
    /// TLS with a self-signed certificate generated at start.
    Auto,
    /// TLS with certificate validation.
    Strict,
}

/// Proxy mode for the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProxyMode {
    /// Proxying disabled.
    #[default]
    Disabled,
    /// Proxying enabled. Reserved; proxy routing is not implemented.
    Enabled,
}

/// Node version information, exchanged during handshakes and exposed for
/// diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    /// Release string of this runtime.
    pub release: String,
    /// Human-readable node kind prefix.
    pub prefix: String,
    /// Wire-dialect generation the node speaks.
    pub dialect: u16,
}

impl Default for Version {
    fn default() -> Self {
        Self {
            release: env!("CARGO_PKG_VERSION").to_string(),
            prefix: "filament".to_string(),
            dialect: 6,
        }
    }
}

/// Bootstrap options for [`Node::start`](crate::node::Node::start).
///
/// All fields have working defaults; a plain `NodeOptions::default()`
/// starts a local-only node (no listener, no resolver).
#[derive(Clone, Default)]
pub struct NodeOptions {
    /// Environment inherited by every spawned process.
    pub env: HashMap<String, Term>,

    /// Creation epoch. Defaults to Unix-seconds at boot, which makes pids
    /// from a previous incarnation of the same node name detectable.
    pub creation: Option<u32>,

    /// Fixed listening port. When unset, the first free port in
    /// `listen_begin..=listen_end` is used.
    pub listen: Option<u16>,

    /// Start of the listening port range.
    pub listen_begin: u16,

    /// End of the listening port range.
    pub listen_end: u16,

    /// Compression flag handed to the proto layer for outgoing messages.
    pub compression: bool,

    /// When set, peers are resolved from the static route table only and
    /// the resolver is never consulted.
    pub static_routes_only: bool,

    /// Host of the name-resolution service, for resolvers that need one.
    pub resolver_host: Option<String>,

    /// Port of the name-resolution service.
    pub resolver_port: Option<u16>,

    /// Name-resolution service. A node without one can still reach peers
    /// through static routes.
    pub resolver: Option<Arc<dyn Resolver>>,

    /// TLS mode for peer connections.
    pub tls: TlsMode,

    /// Proxy mode. Reserved.
    pub proxy: ProxyMode,

    /// Handshake implementation for the listener and for dialing. A node
    /// without one is local-only.
    pub handshake: Option<Arc<dyn Handshake>>,

    /// Proto (wire codec) implementation. A node without one is local-only.
    pub proto: Option<Arc<dyn Proto>>,
}

impl NodeOptions {
    /// Returns options with all defaults.
    pub fn new() -> Self {
        Self {
            listen_begin: DEFAULT_LISTEN_BEGIN,
            listen_end: DEFAULT_LISTEN_END,
            ..Self::default()
        }
    }

    /// Sets an environment entry inherited by every spawned process.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<Term>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Sets the creation epoch explicitly.
    pub fn with_creation(mut self, creation: u32) -> Self {
        self.creation = Some(creation);
        self
    }

    /// Sets a fixed listening port.
    pub fn with_listen(mut self, port: u16) -> Self {
        self.listen = Some(port);
        self
    }

    /// Restricts peer resolution to the static route table.
    pub fn with_static_routes_only(mut self) -> Self {
        self.static_routes_only = true;
        self
    }

    pub(crate) fn listen_range(&self) -> (u16, u16) {
        match self.listen {
            Some(port) => (port, port),
            None => {
                let begin = if self.listen_begin == 0 {
                    DEFAULT_LISTEN_BEGIN
                } else {
                    self.listen_begin
                };
                let end = if self.listen_end == 0 {
                    DEFAULT_LISTEN_END
                } else {
                    self.listen_end
                };
                (begin, end.max(begin))
            }
        }
    }
}

impl std::fmt::Debug for NodeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeOptions")
            .field("env", &self.env)
            .field("creation", &self.creation)
            .field("listen", &self.listen)
            .field("listen_begin", &self.listen_begin)
            .field("listen_end", &self.listen_end)
            .field("compression", &self.compression)
            .field("static_routes_only", &self.static_routes_only)
            .field("tls", &self.tls)
            .field("proxy", &self.proxy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listen_range_defaults() {
        let opts = NodeOptions::default();
        assert_eq!(
            opts.listen_range(),
            (DEFAULT_LISTEN_BEGIN, DEFAULT_LISTEN_END)
        );
    }

    #[test]
    fn test_listen_range_fixed_port() {
        let opts = NodeOptions::default().with_listen(17000);
        assert_eq!(opts.listen_range(), (17000, 17000));
    }

    #[test]
    fn test_env_builder() {
        let opts = NodeOptions::new().with_env("region", "eu");
        assert_eq!(opts.env.get("region"), Some(&Term::from("eu")));
    }
}
