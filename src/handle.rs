//! Reference-counted handle registry.
//!
//! Every object exposed to the host is identified by an opaque, non-zero
//! handle. Handles are never reused: once an object's count reaches zero
//! its handle stays invalid for the lifetime of the process.

use crate::result::{Error, Result};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// Raw handle value as seen by the host.
pub type HandleId = u64;

type Teardown = Box<dyn FnOnce() + Send>;

struct Entry {
    refs: AtomicU32,
    type_name: &'static str,
    object: Arc<dyn Any + Send + Sync>,
    /// Taken by the release that reaches zero.
    teardown: Mutex<Option<Teardown>>,
}

/// Snapshot of one live object, used by the live-object report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveObject {
    pub handle: HandleId,
    pub type_name: &'static str,
    pub refs: u32,
}

/// Registry mapping handles to shared objects with an explicit count.
pub struct HandleRegistry {
    next_id: AtomicU64,
    entries: RwLock<HashMap<HandleId, Entry>>,
}

impl Default for HandleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Register an object with an initial reference count.
    ///
    /// `teardown` runs exactly once, synchronously, on the thread whose
    /// release brings the count to zero.
    ///
    /// # Arguments
    /// * `object` - Shared object to expose
    /// * `initial_refs` - Starting count (at least 1)
    /// * `teardown` - Release action run when the count reaches zero
    pub fn register<T, F>(&self, object: Arc<T>, initial_refs: u32, teardown: F) -> HandleId
    where
        T: Any + Send + Sync,
        F: FnOnce(Arc<T>) + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let owned = object.clone();
        let entry = Entry {
            refs: AtomicU32::new(initial_refs.max(1)),
            type_name: short_type_name::<T>(),
            object,
            teardown: Mutex::new(Some(Box::new(move || teardown(owned)))),
        };
        self.entries.write().insert(id, entry);
        log::trace!("registered {} handle {}", short_type_name::<T>(), id);
        id
    }

    /// Increment the count of a live handle. Returns the new count.
    pub fn add_ref(&self, id: HandleId) -> Result<u32> {
        let entries = self.entries.read();
        let entry = entries.get(&id).ok_or(Error::InvalidHandle)?;
        let mut current = entry.refs.load(Ordering::Acquire);
        loop {
            // A count of zero means teardown is already under way.
            if current == 0 {
                return Err(Error::InvalidHandle);
            }
            match entry.refs.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(current + 1),
                Err(actual) => current = actual,
            }
        }
    }

    /// Decrement the count of a handle. Returns the remaining count.
    ///
    /// Releasing an unknown handle is a logged no-op.
    pub fn remove_ref(&self, id: HandleId) -> Result<u32> {
        let remaining = {
            let entries = self.entries.read();
            let Some(entry) = entries.get(&id) else {
                log::warn!("release of unknown or already released handle {}", id);
                return Err(Error::InvalidHandle);
            };
            let mut current = entry.refs.load(Ordering::Acquire);
            loop {
                if current == 0 {
                    log::warn!("release of handle {} whose count is already zero", id);
                    return Err(Error::InvalidHandle);
                }
                match entry.refs.compare_exchange_weak(
                    current,
                    current - 1,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => break current - 1,
                    Err(actual) => current = actual,
                }
            }
        };

        if remaining == 0 {
            let teardown = self
                .entries
                .write()
                .remove(&id)
                .and_then(|entry| entry.teardown.into_inner());
            // Outside the lock: teardown may release child handles.
            if let Some(teardown) = teardown {
                teardown();
            }
            log::trace!("handle {} destroyed", id);
        }
        Ok(remaining)
    }

    /// Resolve a handle to its object, checking the concrete type.
    pub fn get<T: Any + Send + Sync>(&self, id: HandleId) -> Result<Arc<T>> {
        let entries = self.entries.read();
        let entry = entries.get(&id).ok_or(Error::InvalidHandle)?;
        if entry.refs.load(Ordering::Acquire) == 0 {
            return Err(Error::InvalidHandle);
        }
        entry
            .object
            .clone()
            .downcast::<T>()
            .map_err(|_| Error::InvalidHandle)
    }

    /// Current count of a handle, if live.
    pub fn ref_count(&self, id: HandleId) -> Option<u32> {
        self.entries
            .read()
            .get(&id)
            .map(|e| e.refs.load(Ordering::Acquire))
    }

    pub fn is_live(&self, id: HandleId) -> bool {
        self.ref_count(id).map_or(false, |c| c > 0)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every live object, ordered by handle.
    pub fn live_objects(&self) -> Vec<LiveObject> {
        let mut out: Vec<LiveObject> = self
            .entries
            .read()
            .iter()
            .map(|(id, e)| LiveObject {
                handle: *id,
                type_name: e.type_name,
                refs: e.refs.load(Ordering::Acquire),
            })
            .collect();
        out.sort_by_key(|o| o.handle);
        out
    }
}

fn short_type_name<T>() -> &'static str {
    let full = std::any::type_name::<T>();
    full.rsplit("::").next().unwrap_or(full)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Dummy(u32);

    #[test]
    fn test_handles_are_unique_and_non_zero() {
        let reg = HandleRegistry::new();
        let a = reg.register(Arc::new(Dummy(1)), 1, |_| {});
        let b = reg.register(Arc::new(Dummy(2)), 1, |_| {});
        assert_ne!(a, 0);
        assert_ne!(a, b);
    }

    #[test]
    fn test_add_remove_symmetry() {
        let reg = HandleRegistry::new();
        let torn = Arc::new(AtomicUsize::new(0));
        let t = torn.clone();
        let h = reg.register(Arc::new(Dummy(7)), 1, move |_| {
            t.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(reg.add_ref(h).unwrap(), 2);
        assert_eq!(reg.add_ref(h).unwrap(), 3);
        assert_eq!(reg.remove_ref(h).unwrap(), 2);
        assert_eq!(reg.remove_ref(h).unwrap(), 1);
        assert_eq!(torn.load(Ordering::SeqCst), 0);
        assert_eq!(reg.get::<Dummy>(h).unwrap().0, 7);

        assert_eq!(reg.remove_ref(h).unwrap(), 0);
        assert_eq!(torn.load(Ordering::SeqCst), 1);
        assert!(matches!(reg.get::<Dummy>(h), Err(Error::InvalidHandle)));
        assert!(reg.add_ref(h).is_err());
    }

    #[test]
    fn test_release_of_unknown_handle_is_noop() {
        let reg = HandleRegistry::new();
        assert!(reg.remove_ref(42).is_err());
        let h = reg.register(Arc::new(Dummy(0)), 1, |_| {});
        reg.remove_ref(h).unwrap();
        assert!(reg.remove_ref(h).is_err());
        assert!(reg.is_empty());
    }

    #[test]
    fn test_wrong_type_is_invalid_handle() {
        let reg = HandleRegistry::new();
        let h = reg.register(Arc::new(Dummy(0)), 1, |_| {});
        assert!(matches!(reg.get::<String>(h), Err(Error::InvalidHandle)));
    }

    #[test]
    fn test_handles_are_not_reused() {
        let reg = HandleRegistry::new();
        let h = reg.register(Arc::new(Dummy(0)), 1, |_| {});
        reg.remove_ref(h).unwrap();
        let h2 = reg.register(Arc::new(Dummy(1)), 1, |_| {});
        assert_ne!(h, h2);
        assert!(reg.get::<Dummy>(h).is_err());
    }

    #[test]
    fn test_teardown_may_release_children() {
        let reg = Arc::new(HandleRegistry::new());
        let child = reg.register(Arc::new(Dummy(1)), 1, |_| {});
        let r = reg.clone();
        let parent = reg.register(Arc::new(Dummy(2)), 1, move |_| {
            let _ = r.remove_ref(child);
        });
        reg.remove_ref(parent).unwrap();
        assert!(!reg.is_live(child));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_live_objects_report() {
        let reg = HandleRegistry::new();
        let h = reg.register(Arc::new(Dummy(0)), 2, |_| {});
        let live = reg.live_objects();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].handle, h);
        assert_eq!(live[0].refs, 2);
        assert_eq!(live[0].type_name, "Dummy");
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_registry_is_shareable() {
        assert_send_sync::<HandleRegistry>();

        // teardown state only needs to be Send
        let reg = Arc::new(HandleRegistry::new());
        let fired = std::cell::Cell::new(false);
        let h = reg.register(Arc::new(Dummy(3)), 1, move |d| {
            fired.set(true);
            assert!(fired.get());
            assert_eq!(d.0, 3);
        });
        let r = reg.clone();
        std::thread::spawn(move || r.remove_ref(h).unwrap())
            .join()
            .unwrap();
        assert!(reg.is_empty());
    }

    #[test]
    fn test_concurrent_add_remove() {
        let reg = Arc::new(HandleRegistry::new());
        let h = reg.register(Arc::new(Dummy(0)), 1, |_| {});
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let reg = reg.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        reg.add_ref(h).unwrap();
                        reg.remove_ref(h).unwrap();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        assert_eq!(reg.ref_count(h), Some(1));
    }
}
