/*
 * Copyright 2019 Joyent, Inc.
 */

use std::any::Any;
use std::cell::RefCell;
use std::fmt;

/// The execution context of one worker thread.
///
/// Everything a thread-local pool does happens on its dispatcher's thread.
/// Objects that may still be on the call stack, such as a client reporting its
/// own close, are handed to `deferred_delete` and released by
/// `clear_deferred_delete_list` once the current turn of the event loop ends.
pub struct Dispatcher {
    name: String,
    deferred_delete_list: RefCell<Vec<Box<dyn Any>>>,
}

impl Dispatcher {
    pub fn new(name: &str) -> Self {
        Dispatcher {
            name: name.to_string(),
            deferred_delete_list: RefCell::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn deferred_delete(&self, item: Box<dyn Any>) {
        self.deferred_delete_list.borrow_mut().push(item);
    }

    pub fn deferred_delete_len(&self) -> usize {
        self.deferred_delete_list.borrow().len()
    }

    /// Release everything queued so far. Objects queued by the destructors
    /// that run here stay queued for the next turn. Returns the number of
    /// objects released.
    pub fn clear_deferred_delete_list(&self) -> usize {
        let to_delete: Vec<Box<dyn Any>> =
            self.deferred_delete_list.borrow_mut().drain(..).collect();
        let count = to_delete.len();
        drop(to_delete);
        count
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("name", &self.name)
            .field("deferred_delete_len", &self.deferred_delete_len())
            .finish()
    }
}
