//! Host callback slots.
//!
//! A slot stores one `(function pointer, user context)` registration. Events
//! copy the registration out under the lock and invoke it after the lock is
//! released, so a callback may call back into the API, including to clear
//! its own slot.

use parking_lot::{Mutex, ReentrantMutex};
use std::ffi::c_void;

/// Opaque host context passed back verbatim to every invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserData(pub *mut c_void);

// SAFETY: the pointer is never dereferenced on this side; the host owns it and
// guarantees validity for as long as the registration is in place.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    pub fn null() -> Self {
        Self(std::ptr::null_mut())
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }
}

/// A registered callback: function pointer plus host context.
#[derive(Debug, Clone, Copy)]
pub struct Callback<F: Copy> {
    pub func: F,
    pub user: UserData,
}

/// One registration slot for one event kind on one object.
pub struct CallbackSlot<F: Copy> {
    name: &'static str,
    current: Mutex<Option<Callback<F>>>,
    /// Present for ordered event kinds; serializes invocations across threads.
    order: Option<ReentrantMutex<()>>,
}

impl<F: Copy> CallbackSlot<F> {
    /// Unordered slot: invocations from different threads may overlap.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            current: Mutex::new(None),
            order: None,
        }
    }

    /// Ordered slot: at most one invocation runs at a time.
    pub fn ordered(name: &'static str) -> Self {
        Self {
            name,
            current: Mutex::new(None),
            order: Some(ReentrantMutex::new(())),
        }
    }

    /// Replace the registration. `None` clears it.
    pub fn register(&self, func: Option<F>, user: *mut c_void) {
        let mut current = self.current.lock();
        match func {
            Some(func) => {
                *current = Some(Callback {
                    func,
                    user: UserData(user),
                });
            }
            None => {
                if current.take().is_none() {
                    log::warn!("clearing {} callback that was never registered", self.name);
                }
            }
        }
    }

    pub fn clear(&self) {
        *self.current.lock() = None;
    }

    pub fn is_registered(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Snapshot of the current registration.
    pub fn get(&self) -> Option<Callback<F>> {
        *self.current.lock()
    }

    /// Invoke the current registration, if any. Returns whether it ran.
    ///
    /// The registration is read once; the slot lock is not held while `call`
    /// runs. An unregistered event is dropped.
    pub fn invoke<R>(&self, call: impl FnOnce(F, *mut c_void) -> R) -> Option<R> {
        let _order = self.order.as_ref().map(|m| m.lock());
        let cb = self.get()?;
        Some(call(cb.func, cb.user.as_ptr()))
    }
}
