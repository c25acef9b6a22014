/*
 * Copyright 2019 Joyent, Inc.
 */

//! The cluster side of the pool. Discovery and health checking live elsewhere;
//! the pool only consumes membership changes through these traits. Every
//! event is delivered on the thread that subscribed.

use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::host::Host;
use crate::key_router::LbContext;

/// A membership change delivered to a subscriber.
pub enum ClusterEvent<'a> {
    /// A cluster was added, or an existing cluster of the same name was
    /// replaced by a new generation.
    AddOrUpdate(Rc<dyn ThreadLocalCluster>),
    /// The named cluster is gone.
    Removal(&'a str),
    /// Hosts left the named cluster.
    HostsRemoved {
        cluster: &'a str,
        hosts: &'a [Arc<Host>],
    },
}

impl<'a> fmt::Debug for ClusterEvent<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ClusterEvent::AddOrUpdate(cluster) => {
                write!(f, "AddOrUpdate({})", cluster.name())
            }
            ClusterEvent::Removal(name) => write!(f, "Removal({})", name),
            ClusterEvent::HostsRemoved { cluster, hosts } => {
                write!(f, "HostsRemoved({}, {} hosts)", cluster, hosts.len())
            }
        }
    }
}

pub trait ClusterEventHandler {
    fn on_cluster_event(&self, event: ClusterEvent<'_>);
}

/// Selects a host for a keyed request.
pub trait LoadBalancer {
    fn choose_host(&self, context: &LbContext<'_>) -> Option<Arc<Host>>;
}

/// A worker thread's view of one cluster generation.
pub trait ThreadLocalCluster {
    fn name(&self) -> &str;
    /// Current hosts, one vector per priority tier, highest priority first.
    fn hosts_per_priority(&self) -> Vec<Vec<Arc<Host>>>;
    fn load_balancer(&self) -> &dyn LoadBalancer;
    /// Subscribe to `HostsRemoved` events for this cluster generation.
    fn subscribe_members(
        &self,
        handler: Weak<dyn ClusterEventHandler>,
    ) -> Subscription;
}

/// A worker thread's view of all clusters.
///
/// Implementations must not hold interior borrows while invoking handlers;
/// a handler may drop its `Subscription` from inside the callback.
pub trait ClusterManager {
    fn get(&self, name: &str) -> Option<Rc<dyn ThreadLocalCluster>>;
    /// Subscribe to `AddOrUpdate` and `Removal` events for every cluster.
    fn subscribe(&self, handler: Weak<dyn ClusterEventHandler>) -> Subscription;
}

/// Keeps an event subscription alive. The subscription is removed when this
/// value is dropped.
pub struct Subscription {
    remove: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    pub fn new<F>(remove: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Subscription {
            remove: Some(Box::new(remove)),
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.remove.is_some())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(remove) = self.remove.take() {
            remove();
        }
    }
}
