//! Real Symbol Storage
//!
//! Lazily resolved pointers to the next definition of an interposed function,
//! so hooks can reach libc without calling themselves.

use libc::{c_char, c_void};
use std::sync::atomic::{AtomicPtr, Ordering};

pub struct RealSymbol {
    ptr: AtomicPtr<c_void>,
    /// NUL-terminated symbol name.
    name: &'static str,
}

impl RealSymbol {
    pub const fn new(name: &'static str) -> Self {
        Self {
            ptr: AtomicPtr::new(std::ptr::null_mut()),
            name,
        }
    }

    /// Symbol name without the trailing NUL.
    pub fn name(&self) -> &'static str {
        self.name.trim_end_matches('\0')
    }

    /// Address of the next definition, or null when nothing after us exports it.
    pub fn resolve(&self) -> *mut c_void {
        let p = self.ptr.load(Ordering::Acquire);
        if !p.is_null() {
            return p;
        }
        // Safety: `name` is a NUL-terminated static string.
        let f = unsafe { libc::dlsym(libc::RTLD_NEXT, self.name.as_ptr() as *const c_char) };
        self.ptr.store(f, Ordering::Release);
        f
    }

    /// The next definition as a function pointer of type `F`.
    ///
    /// # Safety
    /// `F` must be an `extern "C"` function pointer type matching the symbol's
    /// real signature.
    pub unsafe fn get<F: Copy>(&self) -> Option<F> {
        debug_assert_eq!(std::mem::size_of::<F>(), std::mem::size_of::<*mut c_void>());
        let p = self.resolve();
        if p.is_null() {
            None
        } else {
            Some(std::mem::transmute_copy::<*mut c_void, F>(&p))
        }
    }
}
