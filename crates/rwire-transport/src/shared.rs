use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::trace;

use crate::serializer::{CommandHandler, Deliver};

/// Endpoint wrapper that lets transports deliver through a shared `Rc`.
///
/// Bytes arriving while the endpoint is already borrowed (a synchronous
/// round trip that comes back to the same endpoint) are queued and handled,
/// in arrival order, as soon as the outer borrow ends.
pub struct SharedHandler<H> {
    inner: RefCell<H>,
    backlog: RefCell<VecDeque<Vec<u8>>>,
    failed: Cell<bool>,
}

impl<H: CommandHandler> SharedHandler<H> {
    pub fn new(handler: H) -> Rc<Self> {
        Rc::new(Self {
            inner: RefCell::new(handler),
            backlog: RefCell::new(VecDeque::new()),
            failed: Cell::new(false),
        })
    }

    /// Run `f` with exclusive access to the endpoint, then handle whatever
    /// was delivered in the meantime.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut H) -> R) -> R {
        let result = {
            let mut inner = self.inner.borrow_mut();
            f(&mut inner)
        };
        self.drain_backlog();
        result
    }

    pub fn with<R>(&self, f: impl FnOnce(&H) -> R) -> R {
        f(&self.inner.borrow())
    }

    pub fn has_failed(&self) -> bool {
        self.failed.get()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.borrow().len()
    }

    fn drain_backlog(&self) {
        loop {
            let Ok(mut inner) = self.inner.try_borrow_mut() else {
                // An outer frame still holds the endpoint; it drains later.
                return;
            };
            let Some(data) = self.backlog.borrow_mut().pop_front() else {
                return;
            };
            if !self.failed.get() && !inner.handle_commands(&data) {
                self.failed.set(true);
            }
        }
    }
}

impl<H: CommandHandler> Deliver for SharedHandler<H> {
    fn deliver(&self, data: &[u8]) -> bool {
        if self.failed.get() {
            return false;
        }
        match self.inner.try_borrow_mut() {
            Ok(mut inner) => {
                if !inner.handle_commands(data) {
                    self.failed.set(true);
                    return false;
                }
            }
            Err(_) => {
                trace!(bytes = data.len(), "endpoint busy, queueing delivery");
                self.backlog.borrow_mut().push_back(data.to_vec());
                return true;
            }
        }
        self.drain_backlog();
        !self.failed.get()
    }
}
