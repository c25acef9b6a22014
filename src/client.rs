/*
 * Copyright 2019 Joyent, Inc.
 */

use std::rc::{Rc, Weak};

use crate::connection_pool::types::ConnPoolSettings;
use crate::dispatcher::Dispatcher;
use crate::host::HostHandle;

/// Connection lifecycle events reported by a `Client`.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectionEvent {
    Connected,
    RemoteClose,
    LocalClose,
}

impl ConnectionEvent {
    pub fn is_close(self) -> bool {
        self == ConnectionEvent::RemoteClose
            || self == ConnectionEvent::LocalClose
    }
}

pub trait ConnectionCallbacks {
    fn on_event(&self, event: ConnectionEvent);
}

/// Handle for one dispatched request. Cancellation is up to the client
/// that issued it.
pub trait PoolRequest {
    fn cancel(&mut self);
}

/// One connection to one host.
///
/// The wire protocol lives behind this trait. A client is created and used on
/// a single worker thread. `close` must report `ConnectionEvent::LocalClose`
/// to every registered callback before it returns and must fail every request
/// still outstanding on the connection.
pub trait Client: 'static {
    /// The request payload.
    type Request: ?Sized;
    /// Completion callbacks supplied by the caller for each request.
    type Callbacks;

    /// Send `request` on this connection. Requests are written in call order.
    fn make_request(
        &self,
        request: &Self::Request,
        callbacks: Self::Callbacks,
    ) -> Box<dyn PoolRequest>;
    fn add_connection_callbacks(&self, callbacks: Weak<dyn ConnectionCallbacks>);
    fn close(&self);
}

/// Creates clients. Shared by every worker thread.
///
/// `create` must not block; the connection is established asynchronously
/// and its outcome reported through `ConnectionCallbacks`.
pub trait ClientFactory: Send + Sync + 'static {
    type Client: Client;

    fn create(
        &self,
        host: &HostHandle,
        dispatcher: &Rc<Dispatcher>,
        settings: &ConnPoolSettings,
    ) -> Rc<Self::Client>;
}

/// Request payload type accepted by the clients of factory `F`.
pub type RequestOf<F> = <<F as ClientFactory>::Client as Client>::Request;
/// Callback type accepted by the clients of factory `F`.
pub type CallbacksOf<F> = <<F as ClientFactory>::Client as Client>::Callbacks;
