/*
 * Copyright 2019 Joyent, Inc.
 */

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use slog::Logger;

use crate::error::Error;

// Operation timeout in milliseconds
const DEFAULT_OP_TIMEOUT_MS: u64 = 1000;

/// Settings forwarded verbatim to the client factory. The pool itself only
/// reads `enable_hashtagging`.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct ConnPoolSettings {
    /// Per operation timeout in milliseconds, enforced by the client.
    pub op_timeout_ms: u64,
    /// Route keys by their redis cluster hashtag instead of the whole key.
    pub enable_hashtagging: bool,
}

impl ConnPoolSettings {
    /// The per operation timeout a `Client` should apply to its requests.
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    /// Parse settings from a JSON document. Missing fields take their
    /// default values.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(json)?)
    }
}

impl Default for ConnPoolSettings {
    fn default() -> Self {
        ConnPoolSettings {
            op_timeout_ms: DEFAULT_OP_TIMEOUT_MS,
            enable_hashtagging: false,
        }
    }
}

/// The configuration options for a cluster pool. This is required to
/// instantiate a new `PoolInstance`.
#[derive(Debug, Default)]
pub struct PoolOptions {
    /// Name of the cluster whose hosts the pool connects to.
    pub cluster_name: String,
    pub settings: ConnPoolSettings,
    /// An optional `slog` logger instance. If none is provided then the logging
    /// will fall back to using the [`slog-stdlog`](https://docs.rs/slog-stdlog)
    /// drain which is essentially the same as using the rust standard
    /// [`log`](https://docs.rs/log) crate.
    pub log: Option<Logger>,
}

/// Whether a thread-local pool currently tracks a cluster.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AttachState {
    /// No cluster of the configured name is known. Requests fail.
    Unattached,
    /// A cluster is known and its hosts are indexed.
    Attached,
}

impl fmt::Display for AttachState {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AttachState::Unattached => String::from("unattached").fmt(fmt),
            AttachState::Attached => String::from("attached").fmt(fmt),
        }
    }
}

/// Counts describing one thread-local pool
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ThreadLocalPoolStats {
    pub state: AttachState,
    /// Hosts with an open or opening client on this thread
    pub active_clients: usize,
    /// Hosts indexed by address, cluster and synthetic
    pub indexed_hosts: usize,
}
