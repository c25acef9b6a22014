/*
 * Copyright 2019 Joyent, Inc.
 */

use std::fmt::Result as FmtResult;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;
use std::sync::Arc;

use slog::{debug, o, Drain, Logger};

use crate::client::{CallbacksOf, ClientFactory, PoolRequest, RequestOf};
use crate::connection_pool::types::PoolOptions;
use crate::connection_pool::{PoolShared, ThreadLocalPool};
use crate::error::Error;
use crate::slot::{Slot, WorkerContext};

/// A cluster connection pool shared by every worker thread.
///
/// The instance itself only holds configuration and the client factory. Each
/// worker thread that makes a request gets its own `ThreadLocalPool`, created
/// on first use, and every call is forwarded to the calling thread's pool.
/// Calls from threads that never called `slot::register_worker` fail with
/// `Error::NotWorkerThread`.
pub struct PoolInstance<F>
where
    F: ClientFactory,
{
    shared: Arc<PoolShared<F>>,
    slot: Slot<ThreadLocalPool<F>>,
}

impl<F> PoolInstance<F>
where
    F: ClientFactory,
{
    pub fn new(options: PoolOptions, client_factory: F) -> Self {
        let log = options
            .log
            .unwrap_or_else(|| Logger::root(slog_stdlog::StdLog.fuse(), o!()));

        debug!(
            log,
            "creating pool for cluster {} (hashtagging: {})",
            options.cluster_name,
            options.settings.enable_hashtagging
        );

        let shared = Arc::new(PoolShared {
            cluster_name: options.cluster_name,
            settings: options.settings,
            client_factory,
            log,
        });

        let slot_shared = shared.clone();
        let slot = Slot::new(move |context: &WorkerContext| {
            ThreadLocalPool::new(
                slot_shared.clone(),
                context.dispatcher.clone(),
                &*context.cluster_manager,
            )
        });

        PoolInstance { shared, slot }
    }

    pub fn cluster_name(&self) -> &str {
        &self.shared.cluster_name
    }

    /// Make a request routed by `key` through the cluster load balancer.
    pub fn make_request(
        &self,
        key: &[u8],
        request: &RequestOf<F>,
        callbacks: CallbacksOf<F>,
    ) -> Result<Box<dyn PoolRequest>, Error> {
        self.slot.get()?.make_request(key, request, callbacks)
    }

    /// Make a request to the host at `host_address` (`ip:port`), bypassing
    /// the load balancer.
    pub fn make_request_to_host(
        &self,
        host_address: &str,
        request: &RequestOf<F>,
        callbacks: CallbacksOf<F>,
    ) -> Result<Box<dyn PoolRequest>, Error> {
        self.slot
            .get()?
            .make_request_to_host(host_address, request, callbacks)
    }

    /// The calling thread's pool, created if this is the thread's first use.
    pub fn thread_local_pool(&self) -> Result<Rc<ThreadLocalPool<F>>, Error> {
        self.slot.get()
    }
}

impl<F> Debug for PoolInstance<F>
where
    F: ClientFactory,
{
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        f.debug_struct("PoolInstance")
            .field("cluster_name", &self.shared.cluster_name)
            .field("settings", &self.shared.settings)
            .field("slot", &self.slot)
            .finish()
    }
}
