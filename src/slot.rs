/*
 * Copyright 2019 Joyent, Inc.
 */

//! Per-thread slots.
//!
//! A worker thread registers its dispatcher and its view of the cluster
//! manager with `register_worker`. A `Slot` then holds one lazily created
//! object per registered worker thread. The object is created the first time
//! the slot is read on that thread and lives in that thread's storage, so it
//! is never shared across threads and needs no locking.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cluster::ClusterManager;
use crate::dispatcher::Dispatcher;
use crate::error::Error;

static NEXT_SLOT_ID: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static WORKER: RefCell<Option<WorkerState>> = RefCell::new(None);
}

/// What a worker thread provides to the objects living in its slots.
#[derive(Clone)]
pub struct WorkerContext {
    pub dispatcher: Rc<Dispatcher>,
    pub cluster_manager: Rc<dyn ClusterManager>,
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

struct WorkerState {
    context: WorkerContext,
    slots: HashMap<usize, Rc<dyn Any>>,
}

/// Registration of the current thread as a worker. Dropping the guard
/// releases every slot object on this thread and then clears the
/// dispatcher's deferred deletion list.
#[derive(Debug)]
pub struct WorkerGuard {
    _not_send: PhantomData<Rc<()>>,
}

pub fn register_worker(context: WorkerContext) -> Result<WorkerGuard, Error> {
    WORKER.with(|worker| {
        let mut worker = worker.borrow_mut();
        if worker.is_some() {
            return Err(Error::WorkerAlreadyRegistered);
        }
        *worker = Some(WorkerState {
            context,
            slots: HashMap::new(),
        });
        Ok(WorkerGuard {
            _not_send: PhantomData,
        })
    })
}

/// Whether the calling thread is a registered worker.
pub fn is_worker_thread() -> bool {
    WORKER.with(|worker| worker.borrow().is_some())
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let state = WORKER
            .try_with(|worker| worker.borrow_mut().take())
            .ok()
            .flatten();
        if let Some(state) = state {
            let WorkerState { context, slots } = state;
            drop(slots);
            context.dispatcher.clear_deferred_delete_list();
        }
    }
}

type Initializer<T> = dyn Fn(&WorkerContext) -> Rc<T> + Send + Sync;

/// One object of type `T` per worker thread.
pub struct Slot<T> {
    id: usize,
    initializer: Arc<Initializer<T>>,
    _marker: PhantomData<fn() -> Rc<T>>,
}

impl<T: 'static> Slot<T> {
    pub fn new<I>(initializer: I) -> Self
    where
        I: Fn(&WorkerContext) -> Rc<T> + Send + Sync + 'static,
    {
        Slot {
            id: NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed),
            initializer: Arc::new(initializer),
            _marker: PhantomData,
        }
    }

    /// Return the calling thread's object, creating it first if needed.
    pub fn get(&self) -> Result<Rc<T>, Error> {
        let existing = WORKER.with(|worker| {
            worker.borrow().as_ref().map(|state| {
                (state.slots.get(&self.id).cloned(), state.context.clone())
            })
        });

        let context = match existing {
            None => return Err(Error::NotWorkerThread),
            Some((Some(object), _)) => return Ok(downcast(object)),
            Some((None, context)) => context,
        };

        // The initializer may reach back into the worker (for instance through
        // the cluster manager), so it runs without the worker borrowed.
        let object = (self.initializer)(&context);
        let stored: Rc<dyn Any> = object.clone();
        WORKER.with(|worker| {
            if let Some(state) = worker.borrow_mut().as_mut() {
                state.slots.insert(self.id, stored);
            }
        });
        Ok(object)
    }

    /// Whether the calling thread already created its object.
    pub fn is_initialized(&self) -> bool {
        WORKER.with(|worker| {
            worker
                .borrow()
                .as_ref()
                .map(|state| state.slots.contains_key(&self.id))
                .unwrap_or(false)
        })
    }
}

fn downcast<T: 'static>(object: Rc<dyn Any>) -> Rc<T> {
    match object.downcast::<T>() {
        Ok(object) => object,
        // Slot ids are never reused, so the stored type always matches.
        Err(_) => unreachable!("slot holds an object of another type"),
    }
}

impl<T> fmt::Debug for Slot<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Slot").field("id", &self.id).finish()
    }
}

impl<T> Drop for Slot<T> {
    fn drop(&mut self) {
        let id = self.id;
        let removed = WORKER
            .try_with(|worker| {
                worker
                    .borrow_mut()
                    .as_mut()
                    .and_then(|state| state.slots.remove(&id))
            })
            .ok()
            .flatten();
        drop(removed);
    }
}
