// =============================================================================
// hooks.rs: Interposed libc entry points
// =============================================================================
//
// Every interposer calls the real function first and hands its result to the
// slot's interceptor, if one is armed. With nothing armed (before activation,
// after teardown, on re-entry) an interposer is a plain pass-through.
//
// libc convention in, kernel convention to the engine: `-1` + errno becomes
// `Outcome(-errno)`, an overridden `Outcome(-e)` goes back out as `-1` with
// errno = e. errno is otherwise restored to what the real call left.
// =============================================================================

use std::cell::Cell;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use libc::{c_char, c_int, c_uint, c_void, gid_t, mode_t, off_t, size_t, ssize_t, uid_t};

use fsfault_engine::{Interceptor, LibcReturn};

use crate::port::LibcCall;
use crate::reals::RealSymbol;

/// Interception point for one libc entry point.
pub struct HookSlot {
    pub name: &'static str,
    pub real: RealSymbol,
    interceptor: AtomicPtr<Interceptor>,
}

impl HookSlot {
    pub const fn new(name: &'static str, symbol: &'static str) -> Self {
        Self {
            name,
            real: RealSymbol::new(symbol),
            interceptor: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    /// Installs `interceptor`; false if the slot is already armed.
    pub fn arm(&self, interceptor: Arc<Interceptor>) -> bool {
        let raw = Arc::into_raw(interceptor) as *mut Interceptor;
        match self.interceptor.compare_exchange(
            std::ptr::null_mut(),
            raw,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(_) => {
                // Safety: `raw` came from `Arc::into_raw` above and was never published.
                drop(unsafe { Arc::from_raw(raw) });
                false
            }
        }
    }

    /// Stops new firings. The interceptor is leaked: a thread may still be
    /// inside `fire` and there is no cheap way to wait for it.
    pub fn disarm(&self) {
        self.interceptor.swap(std::ptr::null_mut(), Ordering::AcqRel);
    }

    pub fn is_armed(&self) -> bool {
        !self.interceptor.load(Ordering::Acquire).is_null()
    }

    fn armed(&self) -> Option<&'static Interceptor> {
        let p = self.interceptor.load(Ordering::Acquire);
        // Safety: armed pointers come from `Arc::into_raw` and are never released.
        unsafe { p.as_ref() }
    }
}

thread_local! {
    static IN_HOOK: Cell<bool> = const { Cell::new(false) };
}

/// Keeps a firing from re-entering the engine through our own hooks.
struct ReentryGuard;

impl ReentryGuard {
    fn enter() -> Option<Self> {
        IN_HOOK
            .try_with(|flag| (!flag.replace(true)).then_some(ReentryGuard))
            .ok()
            .flatten()
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        let _ = IN_HOOK.try_with(|flag| flag.set(false));
    }
}

fn errno() -> c_int {
    // Safety: glibc's errno location is valid for the calling thread.
    unsafe { *libc::__errno_location() }
}

fn set_errno(value: c_int) {
    // Safety: as above.
    unsafe { *libc::__errno_location() = value };
}

/// Runs the slot's interceptor over a finished real call and returns what the
/// caller should see, in libc convention.
pub fn complete(slot: &HookSlot, ret: i64) -> i64 {
    let Some(interceptor) = slot.armed() else {
        return ret;
    };
    let Some(_guard) = ReentryGuard::enter() else {
        return ret;
    };

    let finished = LibcReturn::new(ret, errno());
    let mut call = LibcCall::new(finished.outcome());
    interceptor.fire(&mut call);

    let seen = finished.rewrite(call.observed());
    set_errno(seen.errno);
    seen.ret
}

/// Result when nothing after us defines the symbol.
pub fn missing_real() -> i64 {
    set_errno(libc::ENOSYS);
    -1
}

macro_rules! interpose {
    (@real_type ($($ty:ty),*) () $ret:ty) => {
        unsafe extern "C" fn($($ty),*) -> $ret
    };
    (@real_type ($($ty:ty),*) ($($vty:ty),+) $ret:ty) => {
        unsafe extern "C" fn($($ty),*, ...) -> $ret
    };

    (@define $symbol:ident, $slot:path, ($($arg:ident: $ty:ty),*), ($($varg:ident: $vty:ty),*), $ret:ty, $real:expr) => {
        #[no_mangle]
        pub unsafe extern "C" fn $symbol($($arg: $ty,)* $($varg: $vty),*) -> $ret {
            type Real = interpose!(@real_type ($($ty),*) ($($vty),*) $ret);
            match $real.get::<Real>() {
                Some(real) => $crate::hooks::complete(&$slot, real($($arg,)* $($varg),*) as i64) as $ret,
                None => $crate::hooks::missing_real() as $ret,
            }
        }
    };

    (@slot $name:ident) => {
        pub mod $name {
            pub static SLOT: $crate::hooks::HookSlot =
                $crate::hooks::HookSlot::new(stringify!($name), concat!(stringify!($name), "\0"));
        }
    };

    (@alias $alias:ident) => {
        pub mod $alias {
            pub static REAL: $crate::reals::RealSymbol =
                $crate::reals::RealSymbol::new(concat!(stringify!($alias), "\0"));
        }
    };

    (@munch [$($done:ident)*]) => {
        /// Every primary interception point, in declaration order.
        pub static HOOKS: &[&HookSlot] = &[$(&$done::SLOT),*];
    };

    (@munch [$($done:ident)*] fn $name:ident($($arg:ident: $ty:ty),*; ...$($varg:ident: $vty:ty),+) -> $ret:ty; $($rest:tt)*) => {
        interpose!(@slot $name);
        interpose!(@define $name, $name::SLOT, ($($arg: $ty),*), ($($varg: $vty),+), $ret, $name::SLOT.real);
        interpose!(@munch [$($done)* $name] $($rest)*);
    };
    (@munch [$($done:ident)*] fn $name:ident($($arg:ident: $ty:ty),*) -> $ret:ty; $($rest:tt)*) => {
        interpose!(@slot $name);
        interpose!(@define $name, $name::SLOT, ($($arg: $ty),*), (), $ret, $name::SLOT.real);
        interpose!(@munch [$($done)* $name] $($rest)*);
    };
    (@munch [$($done:ident)*] alias $alias:ident = $name:ident($($arg:ident: $ty:ty),*; ...$($varg:ident: $vty:ty),+) -> $ret:ty; $($rest:tt)*) => {
        interpose!(@alias $alias);
        interpose!(@define $alias, $name::SLOT, ($($arg: $ty),*), ($($varg: $vty),+), $ret, $alias::REAL);
        interpose!(@munch [$($done)*] $($rest)*);
    };
    (@munch [$($done:ident)*] alias $alias:ident = $name:ident($($arg:ident: $ty:ty),*) -> $ret:ty; $($rest:tt)*) => {
        interpose!(@alias $alias);
        interpose!(@define $alias, $name::SLOT, ($($arg: $ty),*), (), $ret, $alias::REAL);
        interpose!(@munch [$($done)*] $($rest)*);
    };

    ($($body:tt)*) => {
        interpose!(@munch [] $($body)*);
    };
}

// `alias` entries are large-file twins that feed the primary slot.
interpose! {
    fn access(path: *const c_char, mode: c_int) -> c_int;
    fn chdir(path: *const c_char) -> c_int;
    fn chmod(path: *const c_char, mode: mode_t) -> c_int;
    fn chown(path: *const c_char, owner: uid_t, group: gid_t) -> c_int;
    fn close(fd: c_int) -> c_int;
    fn copy_file_range(fd_in: c_int, off_in: *mut libc::loff_t, fd_out: c_int, off_out: *mut libc::loff_t, len: size_t, flags: c_uint) -> ssize_t;
    fn faccessat(dirfd: c_int, path: *const c_char, mode: c_int, flags: c_int) -> c_int;
    fn fallocate(fd: c_int, mode: c_int, offset: off_t, len: off_t) -> c_int;
    alias fallocate64 = fallocate(fd: c_int, mode: c_int, offset: libc::off64_t, len: libc::off64_t) -> c_int;
    fn fchdir(fd: c_int) -> c_int;
    fn fchmod(fd: c_int, mode: mode_t) -> c_int;
    fn fchmodat(dirfd: c_int, path: *const c_char, mode: mode_t, flags: c_int) -> c_int;
    fn fchown(fd: c_int, owner: uid_t, group: gid_t) -> c_int;
    fn fchownat(dirfd: c_int, path: *const c_char, owner: uid_t, group: gid_t, flags: c_int) -> c_int;
    fn fdatasync(fd: c_int) -> c_int;
    fn fsetxattr(fd: c_int, name: *const c_char, value: *const c_void, size: size_t, flags: c_int) -> c_int;
    fn fstat(fd: c_int, buf: *mut libc::stat) -> c_int;
    alias fstat64 = fstat(fd: c_int, buf: *mut libc::stat64) -> c_int;
    fn fstatat(dirfd: c_int, path: *const c_char, buf: *mut libc::stat, flags: c_int) -> c_int;
    alias fstatat64 = fstatat(dirfd: c_int, path: *const c_char, buf: *mut libc::stat64, flags: c_int) -> c_int;
    fn fstatfs(fd: c_int, buf: *mut libc::statfs) -> c_int;
    fn fsync(fd: c_int) -> c_int;
    fn ftruncate(fd: c_int, length: off_t) -> c_int;
    alias ftruncate64 = ftruncate(fd: c_int, length: libc::off64_t) -> c_int;
    fn lchown(path: *const c_char, owner: uid_t, group: gid_t) -> c_int;
    fn link(oldpath: *const c_char, newpath: *const c_char) -> c_int;
    fn linkat(olddirfd: c_int, oldpath: *const c_char, newdirfd: c_int, newpath: *const c_char, flags: c_int) -> c_int;
    fn lstat(path: *const c_char, buf: *mut libc::stat) -> c_int;
    alias lstat64 = lstat(path: *const c_char, buf: *mut libc::stat64) -> c_int;
    fn mkdir(path: *const c_char, mode: mode_t) -> c_int;
    fn mkdirat(dirfd: c_int, path: *const c_char, mode: mode_t) -> c_int;
    fn mknod(path: *const c_char, mode: mode_t, dev: libc::dev_t) -> c_int;
    fn mknodat(dirfd: c_int, path: *const c_char, mode: mode_t, dev: libc::dev_t) -> c_int;
    fn open(path: *const c_char, flags: c_int; ...mode: mode_t) -> c_int;
    alias open64 = open(path: *const c_char, flags: c_int; ...mode: mode_t) -> c_int;
    fn openat(dirfd: c_int, path: *const c_char, flags: c_int; ...mode: mode_t) -> c_int;
    alias openat64 = openat(dirfd: c_int, path: *const c_char, flags: c_int; ...mode: mode_t) -> c_int;
    fn readahead(fd: c_int, offset: libc::off64_t, count: size_t) -> ssize_t;
    fn readlink(path: *const c_char, buf: *mut c_char, bufsiz: size_t) -> ssize_t;
    fn readlinkat(dirfd: c_int, path: *const c_char, buf: *mut c_char, bufsiz: size_t) -> ssize_t;
    fn rename(oldpath: *const c_char, newpath: *const c_char) -> c_int;
    fn renameat(olddirfd: c_int, oldpath: *const c_char, newdirfd: c_int, newpath: *const c_char) -> c_int;
    fn renameat2(olddirfd: c_int, oldpath: *const c_char, newdirfd: c_int, newpath: *const c_char, flags: c_uint) -> c_int;
    fn rmdir(path: *const c_char) -> c_int;
    fn sendfile(out_fd: c_int, in_fd: c_int, offset: *mut off_t, count: size_t) -> ssize_t;
    alias sendfile64 = sendfile(out_fd: c_int, in_fd: c_int, offset: *mut libc::off64_t, count: size_t) -> ssize_t;
    fn splice(fd_in: c_int, off_in: *mut libc::loff_t, fd_out: c_int, off_out: *mut libc::loff_t, len: size_t, flags: c_uint) -> ssize_t;
    fn stat(path: *const c_char, buf: *mut libc::stat) -> c_int;
    alias stat64 = stat(path: *const c_char, buf: *mut libc::stat64) -> c_int;
    fn statfs(path: *const c_char, buf: *mut libc::statfs) -> c_int;
    fn statx(dirfd: c_int, path: *const c_char, flags: c_int, mask: c_uint, buf: *mut libc::statx) -> c_int;
    fn symlink(target: *const c_char, linkpath: *const c_char) -> c_int;
    fn symlinkat(target: *const c_char, newdirfd: c_int, linkpath: *const c_char) -> c_int;
    fn tee(fd_in: c_int, fd_out: c_int, len: size_t, flags: c_uint) -> ssize_t;
    fn truncate(path: *const c_char, length: off_t) -> c_int;
    alias truncate64 = truncate(path: *const c_char, length: libc::off64_t) -> c_int;
    fn unlink(path: *const c_char) -> c_int;
    fn unlinkat(dirfd: c_int, path: *const c_char, flags: c_int) -> c_int;
    fn utime(path: *const c_char, times: *const libc::utimbuf) -> c_int;
    fn utimensat(dirfd: c_int, path: *const c_char, times: *const libc::timespec, flags: c_int) -> c_int;
    fn utimes(path: *const c_char, times: *const libc::timeval) -> c_int;
    fn vmsplice(fd: c_int, iov: *const libc::iovec, nr_segs: size_t, flags: c_uint) -> ssize_t;
}

/// Primary slot for a canonical operation name.
pub fn find(name: &str) -> Option<(usize, &'static HookSlot)> {
    HOOKS
        .iter()
        .copied()
        .enumerate()
        .find(|(_, slot)| slot.name == name)
}
