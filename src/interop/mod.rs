//! C ABI entry points.
//!
//! Each exported function is a thin shell: it checks raw pointers, resolves
//! handles through the process factory, calls the safe implementation and
//! translates the outcome into an [`MrsResult`]. No panic crosses the
//! boundary.

pub mod data_channel;
pub mod external_source;
pub mod global;
pub mod local_video_track;
pub mod peer_connection;
pub mod types;

use crate::factory::{Factory, GlobalFactory};
use crate::handle::HandleId;
use crate::result::{Error, MrsResult, Result};
use std::any::Any;
use std::ffi::{c_char, c_void, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use types::mrsHandle;

/// Raw handle value to registry id.
pub(crate) fn handle_id(handle: mrsHandle) -> HandleId {
    handle as usize as HandleId
}

/// Registry id to raw handle value.
pub(crate) fn raw_handle(id: HandleId) -> mrsHandle {
    id as usize as *mut c_void
}

/// Borrow a C string. Null and non-UTF-8 strings read as `None`.
pub(crate) unsafe fn cstr<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Borrow a C string, treating null and empty alike.
pub(crate) unsafe fn cstr_non_empty<'a>(ptr: *const c_char) -> Option<&'a str> {
    cstr(ptr).filter(|s| !s.is_empty())
}

/// Run an entry point body, mapping errors and panics to a result code.
pub(crate) fn guard(name: &str, body: impl FnOnce() -> Result<()>) -> MrsResult {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => MrsResult::Success,
        Ok(Err(e)) => {
            log::debug!("{} failed: {}", name, e);
            e.code()
        }
        Err(_) => {
            log::error!("{} panicked", name);
            MrsResult::Unknown
        }
    }
}

/// The process factory, if one has been created. Handles can only be live
/// while it exists.
pub(crate) fn existing_factory() -> Result<Arc<Factory>> {
    GlobalFactory::try_get().ok_or(Error::InvalidHandle)
}

/// Resolve a raw handle to its object on the process factory.
pub(crate) fn resolve<T: Any + Send + Sync>(handle: mrsHandle) -> Result<(Arc<Factory>, Arc<T>)> {
    if handle.is_null() {
        return Err(Error::InvalidHandle);
    }
    let factory = existing_factory()?;
    let object = factory.registry().get::<T>(handle_id(handle))?;
    Ok((factory, object))
}

pub(crate) fn add_ref(handle: mrsHandle) -> Result<()> {
    if handle.is_null() {
        return Err(Error::InvalidHandle);
    }
    existing_factory()?.registry().add_ref(handle_id(handle))?;
    Ok(())
}

/// Release one reference. Releasing an unknown handle is a logged no-op.
pub(crate) fn remove_ref(handle: mrsHandle) -> Result<()> {
    if handle.is_null() {
        return Err(Error::InvalidHandle);
    }
    let Some(factory) = GlobalFactory::try_get() else {
        log::warn!("release of handle {:?} with no live factory", handle);
        return Ok(());
    };
    match factory.registry().remove_ref(handle_id(handle)) {
        Ok(_) | Err(Error::InvalidHandle) => Ok(()),
        Err(e) => Err(e),
    }
}

/// Store a value through a host out-pointer.
pub(crate) unsafe fn write_out<T>(out: *mut T, value: T) -> Result<()> {
    debug_assert!(!out.is_null(), "null out-pointer");
    if out.is_null() {
        return Err(Error::InvalidParameter("null out-pointer".into()));
    }
    out.write(value);
    Ok(())
}

/// Copy `text` plus a terminator into a host buffer.
///
/// `size` carries the capacity in and the required size out. When the buffer
/// is null or too small nothing is written and `InvalidParameter` is returned.
pub(crate) unsafe fn write_to_buffer(text: &str, buffer: *mut c_char, size: *mut u64) -> Result<()> {
    if size.is_null() {
        return Err(Error::InvalidParameter("null buffer size".into()));
    }
    let required = text.len() as u64 + 1;
    let capacity = *size;
    *size = required;
    if buffer.is_null() || capacity < required {
        return Err(Error::InvalidParameter(format!(
            "buffer too small ({} < {})",
            capacity, required
        )));
    }
    std::ptr::copy_nonoverlapping(text.as_ptr(), buffer as *mut u8, text.len());
    *buffer.add(text.len()) = 0;
    Ok(())
}
