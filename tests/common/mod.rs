/*
 * Copyright 2019 Joyent, Inc.
 */

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::rc::{Rc, Weak};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use slog::{o, Drain, Logger};

use cueball_cluster_pool::client::{
    Client, ClientFactory, ConnectionCallbacks, ConnectionEvent, PoolRequest,
};
use cueball_cluster_pool::cluster::{
    ClusterEvent, ClusterEventHandler, ClusterManager, LoadBalancer,
    Subscription, ThreadLocalCluster,
};
use cueball_cluster_pool::connection_pool::types::{
    AttachState, ConnPoolSettings, PoolOptions,
};
use cueball_cluster_pool::connection_pool::ThreadLocalPool;
use cueball_cluster_pool::dispatcher::Dispatcher;
use cueball_cluster_pool::error::Error;
use cueball_cluster_pool::host::{HealthStatus, Host, HostHandle, Locality};
use cueball_cluster_pool::key_router::LbContext;
use cueball_cluster_pool::slot::{register_worker, WorkerContext, WorkerGuard};

pub const CLUSTER: &str = "redis";

pub fn test_logger() -> Logger {
    let plain = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    Logger::root(
        Mutex::new(slog_term::FullFormat::new(plain).build()).fuse(),
        o!("test" => "cluster-pool"),
    )
}

pub fn pool_options(enable_hashtagging: bool) -> PoolOptions {
    PoolOptions {
        cluster_name: String::from(CLUSTER),
        settings: ConnPoolSettings {
            op_timeout_ms: 20,
            enable_hashtagging,
        },
        log: Some(test_logger()),
    }
}

pub fn dispatched(
    result: Result<Box<dyn PoolRequest>, Error>,
) -> Box<dyn PoolRequest> {
    match result {
        Ok(request) => request,
        Err(e) => panic!("request not dispatched: {}", e),
    }
}

/// Every client-mapped host must be indexed by address, and an unattached
/// pool holds nothing.
pub fn assert_invariants<F: ClientFactory>(pool: &ThreadLocalPool<F>) {
    let clients = pool.client_addresses();
    let indexed = pool.indexed_addresses();
    for address in &clients {
        assert!(
            indexed.contains(address),
            "client for {} is not indexed",
            address
        );
    }
    if pool.state() == AttachState::Unattached {
        assert!(clients.is_empty());
        assert!(indexed.is_empty());
    }
}

// Subscriber list shared by the fake cluster manager and the fake clusters.
#[derive(Clone, Default)]
pub struct Subscribers {
    handlers: Rc<RefCell<Vec<(usize, Weak<dyn ClusterEventHandler>)>>>,
    next_id: Rc<Cell<usize>>,
}

impl Subscribers {
    pub fn subscribe(&self, handler: Weak<dyn ClusterEventHandler>) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.handlers.borrow_mut().push((id, handler));

        let handlers = self.handlers.clone();
        Subscription::new(move || {
            handlers.borrow_mut().retain(|(i, _)| *i != id);
        })
    }

    pub fn len(&self) -> usize {
        self.handlers.borrow().len()
    }

    // Collected up front so handlers may unsubscribe while being notified.
    pub fn live(&self) -> Vec<Rc<dyn ClusterEventHandler>> {
        self.handlers
            .borrow()
            .iter()
            .filter_map(|(_, handler)| handler.upgrade())
            .collect()
    }
}

#[derive(Debug, Default)]
pub struct Creation {
    pub address: String,
    pub worker: String,
    pub op_timeout: Duration,
    pub synthetic: bool,
    pub locality: Locality,
    pub health: HealthStatus,
}

/// What the fake clients and clusters did, in order.
#[derive(Debug, Default)]
pub struct ClientLog {
    pub created: Vec<Creation>,
    pub requests: Vec<(String, String)>,
    pub closed: Vec<String>,
    pub timeline: Vec<String>,
}

pub type SharedLog = Arc<Mutex<ClientLog>>;

pub struct FakeCluster {
    name: String,
    generation: u32,
    hosts: RefCell<Vec<Vec<Arc<Host>>>>,
    pinned: RefCell<Option<SocketAddr>>,
    routing_keys: RefCell<Vec<Vec<u8>>>,
    members: Subscribers,
    log: RefCell<Option<SharedLog>>,
}

impl FakeCluster {
    pub fn new(name: &str, generation: u32, tiers: &[&[&str]]) -> Rc<Self> {
        let hosts = tiers
            .iter()
            .enumerate()
            .map(|(priority, tier)| {
                tier.iter()
                    .map(|address| {
                        let address: SocketAddr = address.parse().unwrap();
                        Arc::new(Host::new(address).with_priority(priority as u32))
                    })
                    .collect()
            })
            .collect();

        Rc::new(FakeCluster {
            name: name.to_string(),
            generation,
            hosts: RefCell::new(hosts),
            pinned: RefCell::new(None),
            routing_keys: RefCell::new(Vec::new()),
            members: Subscribers::default(),
            log: RefCell::new(None),
        })
    }

    pub fn record_into(&self, log: &SharedLog) {
        *self.log.borrow_mut() = Some(log.clone());
    }

    /// Make the load balancer always choose `address`, if it is a member.
    pub fn pin(&self, address: &str) {
        *self.pinned.borrow_mut() = Some(address.parse().unwrap());
    }

    pub fn host(&self, address: &str) -> Arc<Host> {
        let address: SocketAddr = address.parse().unwrap();
        self.hosts
            .borrow()
            .iter()
            .flatten()
            .find(|host| *host.address() == address)
            .cloned()
            .unwrap()
    }

    pub fn routing_keys(&self) -> Vec<Vec<u8>> {
        self.routing_keys.borrow().clone()
    }

    pub fn member_subscribers(&self) -> usize {
        self.members.len()
    }

    /// Add cluster hosts to the lowest priority tier. Subscribers are not
    /// notified; the pool only learns about hosts when it attaches or when
    /// the load balancer picks them.
    pub fn add_hosts(&self, addresses: &[&str]) {
        let mut hosts = self.hosts.borrow_mut();
        if hosts.is_empty() {
            hosts.push(Vec::new());
        }
        let priority = hosts.len() - 1;
        for address in addresses {
            let address: SocketAddr = address.parse().unwrap();
            hosts[priority]
                .push(Arc::new(Host::new(address).with_priority(priority as u32)));
        }
    }

    pub fn remove_hosts(&self, addresses: &[&str]) {
        let addresses: Vec<SocketAddr> =
            addresses.iter().map(|a| a.parse().unwrap()).collect();
        let mut removed = Vec::new();
        for tier in self.hosts.borrow_mut().iter_mut() {
            tier.retain(|host| {
                if addresses.contains(host.address()) {
                    removed.push(host.clone());
                    false
                } else {
                    true
                }
            });
        }

        for handler in self.members.live() {
            handler.on_cluster_event(ClusterEvent::HostsRemoved {
                cluster: &self.name,
                hosts: &removed,
            });
        }
    }
}

impl LoadBalancer for FakeCluster {
    fn choose_host(&self, context: &LbContext<'_>) -> Option<Arc<Host>> {
        self.routing_keys
            .borrow_mut()
            .push(context.routing_key().to_vec());

        let hosts: Vec<Arc<Host>> =
            self.hosts.borrow().iter().flatten().cloned().collect();
        if hosts.is_empty() {
            return None;
        }
        if let Some(pinned) = *self.pinned.borrow() {
            return hosts.into_iter().find(|host| *host.address() == pinned);
        }
        let hash = context.compute_hash_key().unwrap_or(0);
        Some(hosts[(hash % hosts.len() as u64) as usize].clone())
    }
}

impl ThreadLocalCluster for FakeCluster {
    fn name(&self) -> &str {
        &self.name
    }

    fn hosts_per_priority(&self) -> Vec<Vec<Arc<Host>>> {
        if let Some(log) = self.log.borrow().as_ref() {
            log.lock()
                .unwrap()
                .timeline
                .push(format!("index {}#{}", self.name, self.generation));
        }
        self.hosts.borrow().clone()
    }

    fn load_balancer(&self) -> &dyn LoadBalancer {
        self
    }

    fn subscribe_members(
        &self,
        handler: Weak<dyn ClusterEventHandler>,
    ) -> Subscription {
        self.members.subscribe(handler)
    }
}

#[derive(Default)]
pub struct FakeClusterManager {
    clusters: RefCell<HashMap<String, Rc<FakeCluster>>>,
    subscribers: Subscribers,
}

impl FakeClusterManager {
    pub fn new() -> Rc<Self> {
        Rc::new(FakeClusterManager::default())
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn add_or_update(&self, cluster: Rc<FakeCluster>) {
        self.clusters
            .borrow_mut()
            .insert(cluster.name.clone(), cluster.clone());
        for handler in self.subscribers.live() {
            handler.on_cluster_event(ClusterEvent::AddOrUpdate(cluster.clone()));
        }
    }

    pub fn remove(&self, name: &str) {
        self.clusters.borrow_mut().remove(name);
        for handler in self.subscribers.live() {
            handler.on_cluster_event(ClusterEvent::Removal(name));
        }
    }
}

impl ClusterManager for FakeClusterManager {
    fn get(&self, name: &str) -> Option<Rc<dyn ThreadLocalCluster>> {
        let cluster = self.clusters.borrow().get(name).cloned();
        cluster.map(|cluster| cluster as Rc<dyn ThreadLocalCluster>)
    }

    fn subscribe(&self, handler: Weak<dyn ClusterEventHandler>) -> Subscription {
        self.subscribers.subscribe(handler)
    }
}

/// Completion callbacks that record what happened to one request.
#[derive(Debug, Default)]
pub struct RecordingCallbacks {
    pub responses: RefCell<Vec<String>>,
    pub failures: Cell<usize>,
}

impl RecordingCallbacks {
    pub fn new() -> Rc<Self> {
        Rc::new(RecordingCallbacks::default())
    }
}

pub struct FakeRequest {
    cancelled: Rc<Cell<bool>>,
}

impl PoolRequest for FakeRequest {
    fn cancel(&mut self) {
        self.cancelled.set(true);
    }
}

struct Pending {
    callbacks: Rc<RecordingCallbacks>,
    cancelled: Rc<Cell<bool>>,
}

pub struct FakeClient {
    address: String,
    pending: RefCell<Vec<Pending>>,
    observers: RefCell<Vec<Weak<dyn ConnectionCallbacks>>>,
    closed: Cell<bool>,
    log: SharedLog,
}

thread_local! {
    static CLIENTS: RefCell<Vec<Rc<FakeClient>>> = RefCell::new(Vec::new());
}

/// The open client this thread holds for `address`, if any.
pub fn open_client(address: &str) -> Option<Rc<FakeClient>> {
    CLIENTS.with(|clients| {
        clients
            .borrow()
            .iter()
            .rev()
            .find(|client| client.address == address && !client.is_closed())
            .cloned()
    })
}

impl FakeClient {
    pub fn pending(&self) -> usize {
        self.pending.borrow().len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Answer every pending request that was not cancelled.
    pub fn respond_all(&self, response: &str) {
        let pending: Vec<Pending> = self.pending.borrow_mut().drain(..).collect();
        for request in pending {
            if !request.cancelled.get() {
                request
                    .callbacks
                    .responses
                    .borrow_mut()
                    .push(response.to_string());
            }
        }
    }

    pub fn remote_close(&self) {
        self.shutdown(ConnectionEvent::RemoteClose);
    }

    fn shutdown(&self, event: ConnectionEvent) {
        if self.closed.replace(true) {
            return;
        }

        let pending: Vec<Pending> = self.pending.borrow_mut().drain(..).collect();
        for request in pending {
            request.callbacks.failures.set(request.callbacks.failures.get() + 1);
        }

        {
            let mut log = self.log.lock().unwrap();
            log.closed.push(self.address.clone());
            log.timeline.push(format!("close {}", self.address));
        }

        let observers: Vec<Rc<dyn ConnectionCallbacks>> = self
            .observers
            .borrow()
            .iter()
            .filter_map(|observer| observer.upgrade())
            .collect();
        for observer in observers {
            observer.on_event(event);
        }
    }
}

impl Client for FakeClient {
    type Request = str;
    type Callbacks = Rc<RecordingCallbacks>;

    fn make_request(
        &self,
        request: &str,
        callbacks: Rc<RecordingCallbacks>,
    ) -> Box<dyn PoolRequest> {
        let cancelled = Rc::new(Cell::new(false));
        self.log
            .lock()
            .unwrap()
            .requests
            .push((self.address.clone(), request.to_string()));

        if self.is_closed() {
            callbacks.failures.set(callbacks.failures.get() + 1);
        } else {
            self.pending.borrow_mut().push(Pending {
                callbacks,
                cancelled: cancelled.clone(),
            });
        }
        Box::new(FakeRequest { cancelled })
    }

    fn add_connection_callbacks(&self, callbacks: Weak<dyn ConnectionCallbacks>) {
        self.observers.borrow_mut().push(callbacks);
    }

    fn close(&self) {
        self.shutdown(ConnectionEvent::LocalClose);
    }
}

#[derive(Clone, Default)]
pub struct FakeClientFactory {
    pub log: SharedLog,
}

impl FakeClientFactory {
    pub fn new() -> Self {
        FakeClientFactory::default()
    }

    pub fn created(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .created
            .iter()
            .map(|creation| creation.address.clone())
            .collect()
    }

    pub fn closed(&self) -> Vec<String> {
        self.log.lock().unwrap().closed.clone()
    }

    pub fn requests(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().requests.clone()
    }

    pub fn timeline(&self) -> Vec<String> {
        self.log.lock().unwrap().timeline.clone()
    }
}

impl ClientFactory for FakeClientFactory {
    type Client = FakeClient;

    fn create(
        &self,
        host: &HostHandle,
        dispatcher: &Rc<Dispatcher>,
        settings: &ConnPoolSettings,
    ) -> Rc<FakeClient> {
        let address = host.host_address().to_string();
        {
            let mut log = self.log.lock().unwrap();
            log.created.push(Creation {
                address: address.clone(),
                worker: dispatcher.name().to_string(),
                op_timeout: settings.op_timeout(),
                synthetic: host.is_synthetic(),
                locality: host.locality().clone(),
                health: host.health(),
            });
            log.timeline.push(format!("create {}", address));
        }

        let client = Rc::new(FakeClient {
            address,
            pending: RefCell::new(Vec::new()),
            observers: RefCell::new(Vec::new()),
            closed: Cell::new(false),
            log: self.log.clone(),
        });
        CLIENTS.with(|clients| clients.borrow_mut().push(client.clone()));
        client
    }
}

/// A registered worker thread with its own fake cluster manager. Dropping it
/// unregisters the thread.
pub struct Worker {
    guard: Option<WorkerGuard>,
    pub dispatcher: Rc<Dispatcher>,
    pub cluster_manager: Rc<FakeClusterManager>,
}

impl Worker {
    pub fn register(name: &str) -> Self {
        let dispatcher = Rc::new(Dispatcher::new(name));
        let cluster_manager = FakeClusterManager::new();
        let guard = register_worker(WorkerContext {
            dispatcher: dispatcher.clone(),
            cluster_manager: cluster_manager.clone(),
        })
        .unwrap();
        Worker {
            guard: Some(guard),
            dispatcher,
            cluster_manager,
        }
    }

    pub fn unregister(&mut self) {
        self.guard.take();
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.unregister();
    }
}
