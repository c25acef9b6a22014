/*
 * Copyright 2019 Joyent, Inc.
 */

use thiserror::Error;

/// Errors returned by the pool entry points. Every variant means that no
/// request was dispatched. Failures that happen after dispatch are reported
/// through the request callbacks instead.
#[derive(Error, Debug)]
pub enum Error {
    /// The pool on the calling thread is not attached to its cluster.
    #[error("cluster {0} is not available")]
    NoCluster(String),
    /// The cluster load balancer did not select a host for the key.
    #[error("no host selected for routing key")]
    NoHostSelected,
    /// The host address text is not of the form `ip:port`.
    #[error("malformed host address: {0}")]
    MalformedAddress(String),
    /// The address text split cleanly but the ip literal was rejected.
    #[error("invalid host address {address}: {reason}")]
    AddressConstruction { address: String, reason: String },
    /// The calling thread never registered itself as a worker.
    #[error("calling thread is not a registered worker")]
    NotWorkerThread,
    #[error("worker already registered on this thread")]
    WorkerAlreadyRegistered,
    #[error("invalid connection pool settings")]
    InvalidSettings(#[from] serde_json::Error),
}
