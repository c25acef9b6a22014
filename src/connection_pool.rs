/*
 * Copyright 2019 Joyent, Inc.
 */

pub mod types;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::Result as FmtResult;
use std::fmt::{Debug, Formatter};
use std::rc::{Rc, Weak};
use std::sync::Arc;

use slog::{debug, error, info, o, trace, warn, Logger};

use crate::client::{
    CallbacksOf, Client, ClientFactory, ConnectionCallbacks, ConnectionEvent,
    PoolRequest, RequestOf,
};
use crate::cluster::{
    ClusterEvent, ClusterEventHandler, ClusterManager, Subscription,
    ThreadLocalCluster,
};
use crate::connection_pool::types::{
    AttachState, ConnPoolSettings, ThreadLocalPoolStats,
};
use crate::dispatcher::Dispatcher;
use crate::error::Error;
use crate::host::{parse_host_address, Host, HostAddress, HostHandle};
use crate::key_router::LbContext;

// Configuration shared read-only by the pools of every worker thread.
pub(crate) struct PoolShared<F> {
    pub cluster_name: String,
    pub settings: ConnPoolSettings,
    pub client_factory: F,
    pub log: Logger,
}

// The one client a thread holds for a host. Registered as the client's
// connection callbacks so that a close, local or remote, removes it from the
// pool.
struct ActiveClient<F: ClientFactory> {
    parent: Weak<ThreadLocalPool<F>>,
    host: HostHandle,
    client: Rc<F::Client>,
}

impl<F: ClientFactory> ConnectionCallbacks for ActiveClient<F> {
    fn on_event(&self, event: ConnectionEvent) {
        if event.is_close() {
            // The pool is gone while it shuts down; it drained its own map.
            if let Some(parent) = self.parent.upgrade() {
                parent.on_client_closed(&self.host, event);
            }
        }
    }
}

struct PoolState<F: ClientFactory> {
    cluster: Option<Rc<dyn ThreadLocalCluster>>,
    member_subscription: Option<Subscription>,
    client_map: HashMap<HostHandle, Rc<ActiveClient<F>>>,
    address_registry: HashMap<HostAddress, HostHandle>,
}

impl<F: ClientFactory> PoolState<F> {
    fn new() -> Self {
        PoolState {
            cluster: None,
            member_subscription: None,
            client_map: HashMap::new(),
            address_registry: HashMap::new(),
        }
    }
}

/// The connection state of one worker thread for one cluster.
///
/// Holds at most one client per host, the address index used for ad-hoc
/// requests, and the cluster subscriptions. Only the owning worker thread
/// ever touches it: requests, cluster events and connection events all
/// arrive on that thread. No call into a client, the cluster or the factory
/// is made while the internal state is borrowed, so any of them may call
/// back into the pool.
pub struct ThreadLocalPool<F: ClientFactory> {
    shared: Arc<PoolShared<F>>,
    dispatcher: Rc<Dispatcher>,
    weak_self: Weak<ThreadLocalPool<F>>,
    state: RefCell<PoolState<F>>,
    cluster_subscription: RefCell<Option<Subscription>>,
    log: Logger,
}

impl<F: ClientFactory> ThreadLocalPool<F> {
    pub(crate) fn new(
        shared: Arc<PoolShared<F>>,
        dispatcher: Rc<Dispatcher>,
        cluster_manager: &dyn ClusterManager,
    ) -> Rc<Self> {
        let log = shared.log.new(o!(
            "cluster" => shared.cluster_name.clone(),
            "worker" => dispatcher.name().to_string()
        ));

        let pool = Rc::new_cyclic(|weak_self| ThreadLocalPool {
            shared,
            dispatcher,
            weak_self: weak_self.clone(),
            state: RefCell::new(PoolState::new()),
            cluster_subscription: RefCell::new(None),
            log,
        });

        let handler: Weak<dyn ClusterEventHandler> = pool.weak_self.clone();
        let subscription = cluster_manager.subscribe(handler);
        *pool.cluster_subscription.borrow_mut() = Some(subscription);

        match cluster_manager.get(&pool.shared.cluster_name) {
            Some(cluster) => pool.on_cluster_add_or_update(cluster),
            None => debug!(pool.log, "cluster not yet known, waiting"),
        }

        pool
    }

    pub fn cluster_name(&self) -> &str {
        &self.shared.cluster_name
    }

    pub fn state(&self) -> AttachState {
        if self.state.borrow().cluster.is_some() {
            AttachState::Attached
        } else {
            AttachState::Unattached
        }
    }

    pub fn stats(&self) -> ThreadLocalPoolStats {
        let state = self.state.borrow();
        ThreadLocalPoolStats {
            state: if state.cluster.is_some() {
                AttachState::Attached
            } else {
                AttachState::Unattached
            },
            active_clients: state.client_map.len(),
            indexed_hosts: state.address_registry.len(),
        }
    }

    /// Addresses of the hosts with a client on this thread, sorted.
    pub fn client_addresses(&self) -> Vec<HostAddress> {
        let mut addresses: Vec<HostAddress> = self
            .state
            .borrow()
            .client_map
            .keys()
            .map(|host| host.host_address())
            .collect();
        addresses.sort();
        addresses
    }

    /// Addresses in the host index, sorted.
    pub fn indexed_addresses(&self) -> Vec<HostAddress> {
        let mut addresses: Vec<HostAddress> = self
            .state
            .borrow()
            .address_registry
            .keys()
            .cloned()
            .collect();
        addresses.sort();
        addresses
    }

    /// Route a request by key through the cluster load balancer.
    pub fn make_request(
        &self,
        key: &[u8],
        request: &RequestOf<F>,
        callbacks: CallbacksOf<F>,
    ) -> Result<Box<dyn PoolRequest>, Error> {
        let cluster = self.attached_cluster()?;

        let context =
            LbContext::new(key, self.shared.settings.enable_hashtagging);
        let host = match cluster.load_balancer().choose_host(&context) {
            Some(host) => HostHandle::Cluster(host),
            None => {
                debug!(
                    self.log,
                    "no host selected for key {}",
                    String::from_utf8_lossy(key)
                );
                return Err(Error::NoHostSelected);
            }
        };

        let client = self.client_for(&host);

        // Keep the address index in step with the client map.
        self.state
            .borrow_mut()
            .address_registry
            .entry(host.host_address())
            .or_insert_with(|| host.clone());

        trace!(
            self.log,
            "dispatching request for key {} to {}",
            String::from_utf8_lossy(key),
            host.host_address()
        );
        Ok(client.make_request(request, callbacks))
    }

    /// Route a request to the host at `host_address`, which need not be a
    /// member of the cluster. Unknown addresses get a host record owned by
    /// this pool.
    pub fn make_request_to_host(
        &self,
        host_address: &str,
        request: &RequestOf<F>,
        callbacks: CallbacksOf<F>,
    ) -> Result<Box<dyn PoolRequest>, Error> {
        self.attached_cluster()?;

        let address = parse_host_address(host_address).map_err(|e| {
            warn!(self.log, "rejecting host address {}: {}", host_address, e);
            e
        })?;
        let key = HostAddress::from(address);

        let host = {
            let mut state = self.state.borrow_mut();
            let log = &self.log;
            let host = state.address_registry.entry(key).or_insert_with(|| {
                debug!(log, "creating host for unknown address {}", address);
                HostHandle::Synthetic(Rc::new(Host::new(address)))
            });
            host.clone()
        };

        let client = self.client_for(&host);

        trace!(self.log, "dispatching request to {}", host.host_address());
        Ok(client.make_request(request, callbacks))
    }

    fn attached_cluster(&self) -> Result<Rc<dyn ThreadLocalCluster>, Error> {
        let state = self.state.borrow();
        if let Some(cluster) = &state.cluster {
            return Ok(cluster.clone());
        }
        debug_assert!(state.client_map.is_empty());
        debug_assert!(state.member_subscription.is_none());
        Err(Error::NoCluster(self.shared.cluster_name.clone()))
    }

    // Return the client for `host`, creating it on first use.
    fn client_for(&self, host: &HostHandle) -> Rc<F::Client> {
        if let Some(active) = self.state.borrow().client_map.get(host) {
            return active.client.clone();
        }

        debug!(
            self.log,
            "creating client for host {} (op timeout {:?})",
            host.host_address(),
            self.shared.settings.op_timeout()
        );
        let client = self.shared.client_factory.create(
            host,
            &self.dispatcher,
            &self.shared.settings,
        );
        let active = Rc::new(ActiveClient {
            parent: self.weak_self.clone(),
            host: host.clone(),
            client: client.clone(),
        });
        let callbacks: Weak<dyn ConnectionCallbacks> = Rc::downgrade(&active) as Weak<ActiveClient<F>>;
        client.add_connection_callbacks(callbacks);

        self.state
            .borrow_mut()
            .client_map
            .insert(host.clone(), active);
        client
    }

    fn on_client_closed(&self, host: &HostHandle, event: ConnectionEvent) {
        let removed = self.state.borrow_mut().client_map.remove(host);
        debug_assert!(removed.is_some(), "closed client missing from pool");
        match removed {
            Some(active) => {
                debug!(
                    self.log,
                    "client for host {} closed ({:?})",
                    host.host_address(),
                    event
                );
                // The client is still reporting this event; release it once
                // the current dispatch turn is over.
                self.dispatcher.deferred_delete(Box::new(active));
            }
            None => error!(
                self.log,
                "close reported for unknown client {}",
                host.host_address()
            ),
        }
    }

    // Close the client for `host`. Its close callback removes it from the map.
    fn close_client(&self, host: &HostHandle, client: Rc<F::Client>) {
        client.close();

        let lingering = self.state.borrow_mut().client_map.remove(host);
        debug_assert!(lingering.is_none(), "client did not report its close");
        if let Some(active) = lingering {
            error!(
                self.log,
                "client for host {} did not report its close",
                host.host_address()
            );
            self.dispatcher.deferred_delete(Box::new(active));
        }
    }

    fn close_all_clients(&self) {
        loop {
            let next = self
                .state
                .borrow()
                .client_map
                .iter()
                .next()
                .map(|(host, active)| (host.clone(), active.client.clone()));
            match next {
                Some((host, client)) => self.close_client(&host, client),
                None => break,
            }
        }
    }

    fn on_cluster_add_or_update(&self, cluster: Rc<dyn ThreadLocalCluster>) {
        if cluster.name() != self.shared.cluster_name {
            return;
        }

        // A new generation of our cluster. Never merge state across
        // generations: drain the old one completely first.
        if self.state.borrow().cluster.is_some() {
            info!(self.log, "cluster updated, releasing previous generation");
            self.on_cluster_removal(cluster.name());
        }

        let handler: Weak<dyn ClusterEventHandler> = self.weak_self.clone();
        let member_subscription = cluster.subscribe_members(handler);
        let hosts_per_priority = cluster.hosts_per_priority();

        let mut state = self.state.borrow_mut();
        debug_assert!(state.cluster.is_none());
        debug_assert!(state.client_map.is_empty());
        debug_assert!(state.address_registry.is_empty());

        for host in hosts_per_priority.into_iter().flatten() {
            state
                .address_registry
                .insert(host.host_address(), HostHandle::Cluster(host));
        }
        info!(
            self.log,
            "attached to cluster with {} hosts",
            state.address_registry.len()
        );

        state.member_subscription = Some(member_subscription);
        state.cluster = Some(cluster);
    }

    fn on_cluster_removal(&self, cluster_name: &str) {
        if cluster_name != self.shared.cluster_name {
            return;
        }

        // Closing a connection fails everything pending on it.
        self.close_all_clients();

        let (member_subscription, cluster) = {
            let mut state = self.state.borrow_mut();
            let member_subscription = state.member_subscription.take();
            state.address_registry.clear();
            (member_subscription, state.cluster.take())
        };

        if cluster.is_some() {
            info!(self.log, "detached from cluster");
        }
        drop(member_subscription);
    }

    fn on_hosts_removed(&self, hosts: &[Arc<Host>]) {
        for host in hosts {
            let handle = HostHandle::Cluster(host.clone());
            let client = self
                .state
                .borrow()
                .client_map
                .get(&handle)
                .map(|active| active.client.clone());

            // There is no draining of connections. A removed host's connection
            // is closed, failing whatever is pending on it.
            if let Some(client) = client {
                info!(
                    self.log,
                    "closing client for removed host {}",
                    host.host_address()
                );
                self.close_client(&handle, client);
            }

            // A pool-owned host registered under the same address stays.
            let address = host.host_address();
            let mut state = self.state.borrow_mut();
            let indexed = state
                .address_registry
                .get(&address)
                .map(|indexed| indexed.is_cluster_host(host))
                .unwrap_or(false);
            if indexed {
                state.address_registry.remove(&address);
            }
        }
    }
}

impl<F: ClientFactory> ClusterEventHandler for ThreadLocalPool<F> {
    fn on_cluster_event(&self, event: ClusterEvent<'_>) {
        match event {
            ClusterEvent::AddOrUpdate(cluster) => {
                self.on_cluster_add_or_update(cluster)
            }
            ClusterEvent::Removal(name) => self.on_cluster_removal(name),
            ClusterEvent::HostsRemoved { cluster, hosts } => {
                if cluster == self.shared.cluster_name
                    && self.state.borrow().cluster.is_some()
                {
                    self.on_hosts_removed(hosts)
                }
            }
        }
    }
}

impl<F: ClientFactory> Debug for ThreadLocalPool<F> {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("ThreadLocalPool")
            .field("cluster_name", &self.shared.cluster_name)
            .field("dispatcher", &self.dispatcher)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<F: ClientFactory> Drop for ThreadLocalPool<F> {
    fn drop(&mut self) {
        // Callbacks can no longer reach this pool, so drain the map here
        // instead of waiting for close events.
        let state = self.state.get_mut();
        let clients: Vec<Rc<ActiveClient<F>>> =
            state.client_map.drain().map(|(_, active)| active).collect();
        if !clients.is_empty() {
            info!(
                self.log,
                "shutting down, closing {} clients",
                clients.len()
            );
        }
        for active in clients {
            active.client.close();
            self.dispatcher.deferred_delete(Box::new(active));
        }

        state.member_subscription.take();
        state.address_registry.clear();
        state.cluster.take();
        self.cluster_subscription.get_mut().take();
    }
}
