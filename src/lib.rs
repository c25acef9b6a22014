//
// Copyright 2019 Joyent, Inc.
//

//! A thread-sharded, cluster-aware connection pool
//!
//! This crate lets a proxy route keyed requests to the hosts of a named,
//! dynamically changing cluster, and also send requests to a host given by
//! raw address even when that host is not a member of the cluster.
//!
//! ## Worker threads
//!
//! Connection state is not shared between threads. Every worker thread runs
//! its own event loop, represented by a [`Dispatcher`](dispatcher/struct.Dispatcher.html),
//! and registers it together with its view of the cluster manager using
//! [`register_worker`](slot/fn.register_worker.html). The first request a
//! worker makes through a [`PoolInstance`](instance/struct.PoolInstance.html)
//! creates that worker's
//! [`ThreadLocalPool`](connection_pool/struct.ThreadLocalPool.html). From
//! then on requests, cluster membership events and connection events for
//! that worker are all handled on the worker's own thread, so no locks are
//! involved.
//!
//! ## Clusters
//!
//! Cluster discovery and health checking are outside of this crate. The pool
//! consumes membership changes through the
//! [`ClusterManager`](cluster/trait.ClusterManager.html) and
//! [`ThreadLocalCluster`](cluster/trait.ThreadLocalCluster.html) traits:
//!
//! * When the configured cluster appears the pool attaches to it and indexes
//!   every host by address.
//! * When hosts are removed their connections are closed, failing any
//!   requests still pending on them.
//! * When the cluster is updated the pool drains the old generation
//!   completely before attaching to the new one.
//! * When the cluster is removed every connection is closed and requests fail
//!   until it comes back.
//!
//! ## Clients
//!
//! A [`Client`](client/trait.Client.html) is one connection to one host and
//! owns the wire protocol. The pool keeps at most one client per host per
//! worker thread and creates them through a
//! [`ClientFactory`](client/trait.ClientFactory.html) shared by all workers.
//! When a client reports that its connection closed it is removed from the
//! pool and released at the end of the dispatcher's current turn.
//!
//! ## Key routing
//!
//! Keys are handed to the cluster load balancer in an
//! [`LbContext`](key_router/struct.LbContext.html). With hashtagging enabled
//! only the redis cluster hashtag of the key is used, so `{user1}.name` and
//! `{user1}.email` land on the same host.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::rc::Rc;
//! use std::sync::Arc;
//! use std::thread;
//!
//! use cueball_cluster_pool::connection_pool::types::{ConnPoolSettings, PoolOptions};
//! use cueball_cluster_pool::dispatcher::Dispatcher;
//! use cueball_cluster_pool::instance::PoolInstance;
//! use cueball_cluster_pool::slot::{register_worker, WorkerContext};
//!
//! let pool = Arc::new(PoolInstance::new(
//!     PoolOptions {
//!         cluster_name: String::from("redis"),
//!         settings: ConnPoolSettings::from_json(r#"{"enable_hashtagging": true}"#)?,
//!         log: None,
//!     },
//!     RespClientFactory::new(),
//! ));
//!
//! for i in 0..4 {
//!     let pool = pool.clone();
//!     thread::spawn(move || {
//!         let dispatcher = Rc::new(Dispatcher::new(&format!("worker_{}", i)));
//!         let _worker = register_worker(WorkerContext {
//!             dispatcher: dispatcher.clone(),
//!             cluster_manager: worker_cluster_manager(),
//!         })?;
//!         let request = pool.make_request(b"{user1}.name", &get("{user1}.name"), callbacks)?;
//!         // Run the event loop; the callbacks see the response.
//!     });
//! }
//! ```

#![allow(missing_docs)]

pub mod client;
pub mod cluster;
pub mod connection_pool;
pub mod dispatcher;
pub mod error;
pub mod host;
pub mod instance;
pub mod key_router;
pub mod slot;
