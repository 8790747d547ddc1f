//! Scenario registry.
//!
//! One independent action per filesystem operation. Each action performs a
//! single occurrence of its operation inside the sandbox, plus whatever setup
//! and cleanup keeps the next occurrence meaningful. Cleanup always runs, since
//! an injected failure may still have let the real call take effect.

use std::ffi::CStr;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use fsfault_config::log_exerciser_warn;
use libc::{c_int, c_long, mode_t};
use nix::errno::Errno;

/// Failure of one scenario run, captured right after the failing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub detail: &'static str,
    pub ret: i64,
    pub errno: Errno,
}

impl Failure {
    fn last(detail: &'static str, ret: i64) -> Self {
        Self {
            detail,
            ret,
            errno: Errno::last(),
        }
    }

    /// Operations that need real mount plumbing are never driven.
    fn not_exercised() -> Self {
        Self {
            detail: "not exercised",
            ret: -1,
            errno: Errno::ENOSYS,
        }
    }

    #[cfg_attr(target_arch = "x86_64", allow(dead_code))]
    fn unavailable() -> Self {
        Self {
            detail: "unavailable on this architecture",
            ret: -1,
            errno: Errno::ENOSYS,
        }
    }

    pub fn log(&self, scenario: &str) {
        log_exerciser_warn!(
            "scenario failed",
            scenario = scenario,
            ret = self.ret,
            errno = self.errno as i32,
            description = self.errno.desc(),
            detail = self.detail
        );
    }
}

pub type Step = Result<(), Failure>;

pub struct Scenario {
    pub name: &'static str,
    action: fn() -> Step,
}

impl Scenario {
    pub fn run(&self) -> Step {
        (self.action)()
    }
}

impl std::fmt::Debug for Scenario {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scenario").field("name", &self.name).finish()
    }
}

pub fn find(name: &str) -> Option<&'static Scenario> {
    SCENARIOS.iter().find(|s| s.name == name)
}

pub fn names() -> impl Iterator<Item = &'static str> {
    SCENARIOS.iter().map(|s| s.name)
}

/// Raw return values from libc and `syscall(2)`.
trait SysRet: Copy {
    fn widen(self) -> i64;
}

impl SysRet for i32 {
    fn widen(self) -> i64 {
        self.into()
    }
}

impl SysRet for i64 {
    fn widen(self) -> i64 {
        self
    }
}

impl SysRet for isize {
    fn widen(self) -> i64 {
        self as i64
    }
}

fn check<R: SysRet>(ret: R, detail: &'static str) -> Result<R, Failure> {
    if ret.widen() < 0 {
        Err(Failure::last(detail, ret.widen()))
    } else {
        Ok(ret)
    }
}

fn name_of(path: &'static CStr) -> &'static str {
    path.to_str().unwrap_or("?")
}

fn open_fd(path: &'static CStr, flags: c_int) -> Result<OwnedFd, Failure> {
    // Safety: `path` is NUL-terminated.
    let fd = check(unsafe { libc::open(path.as_ptr(), flags | libc::O_CLOEXEC) }, name_of(path))?;
    // Safety: `fd` was just opened and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn create_fd(path: &'static CStr, flags: c_int, mode: mode_t) -> Result<OwnedFd, Failure> {
    let flags = flags | libc::O_CREAT | libc::O_CLOEXEC;
    // Safety: `path` is NUL-terminated; O_CREAT takes the mode argument.
    let fd = check(unsafe { libc::open(path.as_ptr(), flags, mode as libc::c_uint) }, name_of(path))?;
    // Safety: as in `open_fd`.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

fn write_all(fd: RawFd, data: &[u8]) {
    // Safety: `data` is valid for `data.len()` bytes.
    unsafe { libc::write(fd, data.as_ptr().cast(), data.len()) };
}

fn pipe(detail: &'static str) -> Result<(OwnedFd, OwnedFd), Failure> {
    nix::unistd::pipe().map_err(|errno| Failure { detail, ret: -1, errno })
}

fn ids() -> (libc::uid_t, libc::gid_t) {
    (nix::unistd::getuid().as_raw(), nix::unistd::getgid().as_raw())
}

fn remove(path: &'static CStr) {
    // Safety: `path` is NUL-terminated.
    unsafe { libc::unlink(path.as_ptr()) };
}

// Entry points without a libc wrapper. Numbers from the unified syscall table.
const SYS_OPEN_TREE: c_long = 428;
const SYS_OPENAT2: c_long = 437;
const OPEN_TREE_CLOEXEC: libc::c_uint = libc::O_CLOEXEC as libc::c_uint;

#[repr(C)]
struct OpenHow {
    flags: u64,
    mode: u64,
    resolve: u64,
}

macro_rules! registry {
    ($($name:ident),* $(,)?) => {
        /// Every scenario, sorted by name.
        pub static SCENARIOS: &[Scenario] = &[
            $(Scenario { name: stringify!($name), action: run::$name },)*
        ];
    };
}

registry! {
    access, chdir, chmod, chown, close, copy_file_range, faccessat2, fallocate,
    fchdir, fchmod, fchmodat, fchown, fchownat, fdatasync, fsconfig, fsetxattr,
    fsmount, fsopen, fspick, fstat, fstatfs, fsync, ftruncate, getdents,
    getdents64, lchown, link, linkat, lstat, mkdir, mkdirat, mknod, mknodat,
    mount, mount_setattr, open, open_by_handle_at, open_tree, openat, openat2,
    readahead, readlink, readlinkat, rename, renameat, renameat2, rmdir,
    sendfile, splice, stat, statfs, statx, symlink, symlinkat, sync, tee,
    truncate, unlink, unlinkat, utime, utimensat, utimes, vmsplice,
}

/// Scenario bodies. All paths are relative to the sandbox.
mod run {
    use super::*;
    use libc::{AT_FDCWD, O_APPEND, O_DIRECTORY, O_RDONLY, O_RDWR, O_TRUNC, O_WRONLY};
    use std::ptr;

    pub fn access() -> Step {
        check(unsafe { libc::access(c"file_ok.txt".as_ptr(), libc::R_OK) }, "file_ok.txt").map(drop)
    }

    pub fn chdir() -> Step {
        let home = open_fd(c".", O_RDONLY | O_DIRECTORY)?;
        let ret = check(unsafe { libc::chdir(c"dir1".as_ptr()) }, "dir1");
        unsafe { libc::fchdir(home.as_raw_fd()) };
        ret.map(drop)
    }

    pub fn chmod() -> Step {
        check(unsafe { libc::chmod(c"file_ok.txt".as_ptr(), 0o600) }, "file_ok.txt").map(drop)
    }

    pub fn chown() -> Step {
        let (uid, gid) = ids();
        check(unsafe { libc::chown(c"file_ok.txt".as_ptr(), uid, gid) }, "file_ok.txt").map(drop)
    }

    pub fn close() -> Step {
        use std::os::fd::IntoRawFd;
        let fd = open_fd(c"file_ok.txt", O_RDONLY)?;
        check(unsafe { libc::close(fd.into_raw_fd()) }, "file_ok.txt").map(drop)
    }

    pub fn copy_file_range() -> Step {
        let src = open_fd(c"tmp_copy_src.bin", O_RDONLY)?;
        let dst = create_fd(c"tmp_copy_dst.bin", O_WRONLY | O_TRUNC, 0o600)?;
        let mut offset: libc::loff_t = 0;
        check(
            unsafe {
                libc::copy_file_range(src.as_raw_fd(), &mut offset, dst.as_raw_fd(), ptr::null_mut(), 1024, 0)
            },
            "tmp_copy_src.bin -> tmp_copy_dst.bin",
        )
        .map(drop)
    }

    /// glibc routes `faccessat` with flags through the faccessat2 entry.
    pub fn faccessat2() -> Step {
        check(
            unsafe { libc::faccessat(AT_FDCWD, c"file_ok.txt".as_ptr(), libc::R_OK, 0) },
            "file_ok.txt",
        )
        .map(drop)
    }

    pub fn fallocate() -> Step {
        let fd = create_fd(c"tmp/falloc.bin", O_RDWR, 0o600)?;
        check(unsafe { libc::fallocate(fd.as_raw_fd(), 0, 0, 4096) }, "tmp/falloc.bin").map(drop)
    }

    pub fn fchdir() -> Step {
        let home = std::env::current_dir().map_err(|_| Failure::last("getcwd", -1))?;
        let dir = open_fd(c"dir1", O_RDONLY | O_DIRECTORY)?;
        let ret = check(unsafe { libc::fchdir(dir.as_raw_fd()) }, "dir1");
        let _ = std::env::set_current_dir(home);
        ret.map(drop)
    }

    pub fn fchmod() -> Step {
        let fd = open_fd(c"file_ok.txt", O_RDONLY)?;
        check(unsafe { libc::fchmod(fd.as_raw_fd(), 0o600) }, "file_ok.txt").map(drop)
    }

    pub fn fchmodat() -> Step {
        let dir = open_fd(c".", O_RDONLY | O_DIRECTORY)?;
        check(
            unsafe { libc::fchmodat(dir.as_raw_fd(), c"file_ok.txt".as_ptr(), 0o600, 0) },
            "file_ok.txt",
        )
        .map(drop)
    }

    pub fn fchown() -> Step {
        let (uid, gid) = ids();
        let fd = open_fd(c"file_ok.txt", O_RDONLY)?;
        check(unsafe { libc::fchown(fd.as_raw_fd(), uid, gid) }, "file_ok.txt").map(drop)
    }

    pub fn fchownat() -> Step {
        let (uid, gid) = ids();
        let dir = open_fd(c".", O_RDONLY | O_DIRECTORY)?;
        check(
            unsafe { libc::fchownat(dir.as_raw_fd(), c"file_ok.txt".as_ptr(), uid, gid, 0) },
            "file_ok.txt",
        )
        .map(drop)
    }

    pub fn fdatasync() -> Step {
        let fd = create_fd(c"tmp_fdatasync.log", O_WRONLY | O_APPEND, 0o600)?;
        write_all(fd.as_raw_fd(), b"fdatasync\n");
        check(unsafe { libc::fdatasync(fd.as_raw_fd()) }, "tmp_fdatasync.log").map(drop)
    }

    pub fn fsconfig() -> Step {
        Err(Failure::not_exercised())
    }

    pub fn fsetxattr() -> Step {
        let fd = open_fd(c"file_ok.txt", O_RDONLY)?;
        let value = b"abc";
        check(
            unsafe {
                libc::fsetxattr(fd.as_raw_fd(), c"user.test".as_ptr(), value.as_ptr().cast(), value.len(), 0)
            },
            "file_ok.txt",
        )
        .map(drop)
    }

    pub fn fsmount() -> Step {
        Err(Failure::not_exercised())
    }

    pub fn fsopen() -> Step {
        Err(Failure::not_exercised())
    }

    pub fn fspick() -> Step {
        Err(Failure::not_exercised())
    }

    pub fn fstat() -> Step {
        let fd = open_fd(c"file_ok.txt", O_RDONLY)?;
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        check(unsafe { libc::fstat(fd.as_raw_fd(), &mut st) }, "file_ok.txt").map(drop)
    }

    pub fn fstatfs() -> Step {
        let dir = open_fd(c".", O_RDONLY | O_DIRECTORY)?;
        let mut sfs: libc::statfs = unsafe { std::mem::zeroed() };
        check(unsafe { libc::fstatfs(dir.as_raw_fd(), &mut sfs) }, ".").map(drop)
    }

    pub fn fsync() -> Step {
        let fd = create_fd(c"tmp_fsync.log", O_WRONLY | O_APPEND, 0o600)?;
        write_all(fd.as_raw_fd(), b"fsync\n");
        check(unsafe { libc::fsync(fd.as_raw_fd()) }, "tmp_fsync.log").map(drop)
    }

    pub fn ftruncate() -> Step {
        let fd = open_fd(c"tmp_trunc.log", O_RDWR)?;
        check(unsafe { libc::ftruncate(fd.as_raw_fd(), 0) }, "tmp_trunc.log").map(drop)
    }

    #[cfg(target_arch = "x86_64")]
    pub fn getdents() -> Step {
        let dir = open_fd(c".", O_RDONLY | O_DIRECTORY)?;
        let mut buf = [0u8; 4096];
        check(
            unsafe { libc::syscall(libc::SYS_getdents, dir.as_raw_fd(), buf.as_mut_ptr(), buf.len()) },
            ".",
        )
        .map(drop)
    }

    #[cfg(not(target_arch = "x86_64"))]
    pub fn getdents() -> Step {
        Err(Failure::unavailable())
    }

    pub fn getdents64() -> Step {
        let dir = open_fd(c".", O_RDONLY | O_DIRECTORY)?;
        let mut buf = [0u8; 4096];
        check(
            unsafe { libc::syscall(libc::SYS_getdents64, dir.as_raw_fd(), buf.as_mut_ptr(), buf.len()) },
            ".",
        )
        .map(drop)
    }

    pub fn lchown() -> Step {
        let (uid, gid) = ids();
        check(unsafe { libc::lchown(c"link1".as_ptr(), uid, gid) }, "link1").map(drop)
    }

    pub fn link() -> Step {
        remove(c"hardlink1");
        let ret = check(
            unsafe { libc::link(c"file_ok.txt".as_ptr(), c"hardlink1".as_ptr()) },
            "file_ok.txt -> hardlink1",
        );
        remove(c"hardlink1");
        ret.map(drop)
    }

    pub fn linkat() -> Step {
        remove(c"hardlink2");
        let ret = check(
            unsafe { libc::linkat(AT_FDCWD, c"file_ok.txt".as_ptr(), AT_FDCWD, c"hardlink2".as_ptr(), 0) },
            "file_ok.txt -> hardlink2",
        );
        remove(c"hardlink2");
        ret.map(drop)
    }

    pub fn lstat() -> Step {
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        check(unsafe { libc::lstat(c"link1".as_ptr(), &mut st) }, "link1").map(drop)
    }

    pub fn mkdir() -> Step {
        let made = check(unsafe { libc::mkdir(c"tmp/mkdir_test".as_ptr(), 0o700) }, "tmp/mkdir_test");
        let removed = check(unsafe { libc::rmdir(c"tmp/mkdir_test".as_ptr()) }, "rmdir tmp/mkdir_test");
        made.and(removed).map(drop)
    }

    pub fn mkdirat() -> Step {
        let dir = open_fd(c"tmp", O_RDONLY | O_DIRECTORY)?;
        let made = check(
            unsafe { libc::mkdirat(dir.as_raw_fd(), c"mkdirat_test".as_ptr(), 0o700) },
            "tmp/mkdirat_test",
        );
        unsafe { libc::unlinkat(dir.as_raw_fd(), c"mkdirat_test".as_ptr(), libc::AT_REMOVEDIR) };
        made.map(drop)
    }

    pub fn mknod() -> Step {
        remove(c"tmp/node1");
        let ret = check(
            unsafe { libc::mknod(c"tmp/node1".as_ptr(), libc::S_IFREG | 0o600, 0) },
            "tmp/node1",
        );
        remove(c"tmp/node1");
        ret.map(drop)
    }

    pub fn mknodat() -> Step {
        let dir = open_fd(c"tmp", O_RDONLY | O_DIRECTORY)?;
        unsafe { libc::unlinkat(dir.as_raw_fd(), c"node2".as_ptr(), 0) };
        let ret = check(
            unsafe { libc::mknodat(dir.as_raw_fd(), c"node2".as_ptr(), libc::S_IFREG | 0o600, 0) },
            "tmp/node2",
        );
        unsafe { libc::unlinkat(dir.as_raw_fd(), c"node2".as_ptr(), 0) };
        ret.map(drop)
    }

    pub fn mount() -> Step {
        Err(Failure::not_exercised())
    }

    pub fn mount_setattr() -> Step {
        Err(Failure::not_exercised())
    }

    pub fn open() -> Step {
        open_fd(c"file_ok.txt", O_RDONLY).map(drop)
    }

    pub fn open_by_handle_at() -> Step {
        Err(Failure::not_exercised())
    }

    pub fn open_tree() -> Step {
        let fd = check(
            unsafe { libc::syscall(SYS_OPEN_TREE, AT_FDCWD, c"tree".as_ptr(), OPEN_TREE_CLOEXEC) },
            "tree",
        )?;
        drop(unsafe { OwnedFd::from_raw_fd(fd as RawFd) });
        Ok(())
    }

    pub fn openat() -> Step {
        let dir = open_fd(c"dir1", O_RDONLY | O_DIRECTORY)?;
        let fd = check(
            unsafe {
                libc::openat(dir.as_raw_fd(), c"deep".as_ptr(), O_RDONLY | O_DIRECTORY | libc::O_CLOEXEC)
            },
            "dir1/deep",
        )?;
        drop(unsafe { OwnedFd::from_raw_fd(fd) });
        Ok(())
    }

    pub fn openat2() -> Step {
        let how = OpenHow {
            flags: (O_RDONLY | libc::O_CLOEXEC) as u64,
            mode: 0,
            resolve: 0,
        };
        let fd = check(
            unsafe {
                libc::syscall(
                    SYS_OPENAT2,
                    AT_FDCWD,
                    c"file_ok.txt".as_ptr(),
                    &how as *const OpenHow,
                    std::mem::size_of::<OpenHow>(),
                )
            },
            "file_ok.txt",
        )?;
        drop(unsafe { OwnedFd::from_raw_fd(fd as RawFd) });
        Ok(())
    }

    pub fn readahead() -> Step {
        let fd = open_fd(c"file_ok.txt", O_RDONLY)?;
        check(unsafe { libc::readahead(fd.as_raw_fd(), 0, 4096) }, "file_ok.txt").map(drop)
    }

    pub fn readlink() -> Step {
        let mut buf = [0u8; 128];
        check(
            unsafe { libc::readlink(c"link1".as_ptr(), buf.as_mut_ptr().cast(), buf.len() - 1) },
            "link1",
        )
        .map(drop)
    }

    pub fn readlinkat() -> Step {
        let dir = open_fd(c".", O_RDONLY | O_DIRECTORY)?;
        let mut buf = [0u8; 128];
        check(
            unsafe {
                libc::readlinkat(dir.as_raw_fd(), c"link1".as_ptr(), buf.as_mut_ptr().cast(), buf.len() - 1)
            },
            "link1",
        )
        .map(drop)
    }

    pub fn rename() -> Step {
        let moved = check(
            unsafe { libc::rename(c"tmp/unlink_me".as_ptr(), c"tmp/unlink_tmp".as_ptr()) },
            "tmp/unlink_me -> tmp/unlink_tmp",
        );
        let restored = check(
            unsafe { libc::rename(c"tmp/unlink_tmp".as_ptr(), c"tmp/unlink_me".as_ptr()) },
            "tmp/unlink_tmp -> tmp/unlink_me",
        );
        moved.and(restored).map(drop)
    }

    pub fn renameat() -> Step {
        let dir = open_fd(c"tmp", O_RDONLY | O_DIRECTORY)?;
        let d = dir.as_raw_fd();
        let moved = check(
            unsafe { libc::renameat(d, c"unlink_me".as_ptr(), d, c"unlink_tmp2".as_ptr()) },
            "tmp/unlink_me -> tmp/unlink_tmp2",
        );
        let restored = check(
            unsafe { libc::renameat(d, c"unlink_tmp2".as_ptr(), d, c"unlink_me".as_ptr()) },
            "tmp/unlink_tmp2 -> tmp/unlink_me",
        );
        moved.and(restored).map(drop)
    }

    pub fn renameat2() -> Step {
        let dir = open_fd(c"tmp", O_RDONLY | O_DIRECTORY)?;
        let d = dir.as_raw_fd();
        let moved = check(
            unsafe { libc::renameat2(d, c"unlink_me".as_ptr(), d, c"unlink_tmp3".as_ptr(), 0) },
            "tmp/unlink_me -> tmp/unlink_tmp3",
        );
        let restored = check(
            unsafe { libc::renameat2(d, c"unlink_tmp3".as_ptr(), d, c"unlink_me".as_ptr(), 0) },
            "tmp/unlink_tmp3 -> tmp/unlink_me",
        );
        moved.and(restored).map(drop)
    }

    pub fn rmdir() -> Step {
        unsafe { libc::mkdir(c"rmdir_test".as_ptr(), 0o700) };
        check(unsafe { libc::rmdir(c"rmdir_test".as_ptr()) }, "rmdir_test").map(drop)
    }

    pub fn sendfile() -> Step {
        let src = open_fd(c"tmp/sendfile_src", O_RDONLY)?;
        let dst = create_fd(c"tmp/sendfile_dst", O_WRONLY | O_TRUNC, 0o600)?;
        let mut offset: libc::off_t = 0;
        check(
            unsafe { libc::sendfile(dst.as_raw_fd(), src.as_raw_fd(), &mut offset, 1024) },
            "tmp/sendfile_src -> tmp/sendfile_dst",
        )
        .map(drop)
    }

    pub fn splice() -> Step {
        let (_read_end, write_end) = pipe("pipe")?;
        let fd = open_fd(c"file_ok.txt", O_RDONLY)?;
        check(
            unsafe {
                libc::splice(fd.as_raw_fd(), ptr::null_mut(), write_end.as_raw_fd(), ptr::null_mut(), 64, 0)
            },
            "file_ok.txt -> pipe",
        )
        .map(drop)
    }

    pub fn stat() -> Step {
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        check(unsafe { libc::stat(c"file_ok.txt".as_ptr(), &mut st) }, "file_ok.txt").map(drop)
    }

    pub fn statfs() -> Step {
        let mut sfs: libc::statfs = unsafe { std::mem::zeroed() };
        check(unsafe { libc::statfs(c".".as_ptr(), &mut sfs) }, ".").map(drop)
    }

    pub fn statx() -> Step {
        let mut sx: libc::statx = unsafe { std::mem::zeroed() };
        check(
            unsafe {
                libc::statx(
                    AT_FDCWD,
                    c"file_ok.txt".as_ptr(),
                    libc::AT_STATX_SYNC_AS_STAT,
                    libc::STATX_BASIC_STATS,
                    &mut sx,
                )
            },
            "file_ok.txt",
        )
        .map(drop)
    }

    pub fn symlink() -> Step {
        remove(c"sym2");
        let ret = check(
            unsafe { libc::symlink(c"file_ok.txt".as_ptr(), c"sym2".as_ptr()) },
            "sym2 -> file_ok.txt",
        );
        remove(c"sym2");
        ret.map(drop)
    }

    pub fn symlinkat() -> Step {
        remove(c"sym3");
        let ret = check(
            unsafe { libc::symlinkat(c"file_ok.txt".as_ptr(), AT_FDCWD, c"sym3".as_ptr()) },
            "sym3 -> file_ok.txt",
        );
        remove(c"sym3");
        ret.map(drop)
    }

    /// sync(2) has no return value; a set errno is the only signal.
    pub fn sync() -> Step {
        Errno::clear();
        unsafe { libc::sync() };
        match Errno::last() {
            Errno::UnknownErrno => Ok(()),
            errno => Err(Failure { detail: "", ret: 0, errno }),
        }
    }

    pub fn tee() -> Step {
        let (source_read, source_write) = pipe("pipe")?;
        let (_sink_read, sink_write) = pipe("pipe")?;
        write_all(source_write.as_raw_fd(), b"data");
        check(
            unsafe { libc::tee(source_read.as_raw_fd(), sink_write.as_raw_fd(), 4, 0) },
            "pipe -> pipe",
        )
        .map(drop)
    }

    pub fn truncate() -> Step {
        check(unsafe { libc::truncate(c"tmp_trunc.log".as_ptr(), 0) }, "tmp_trunc.log").map(drop)
    }

    pub fn unlink() -> Step {
        let fd = create_fd(c"tmp/unlink_me", O_WRONLY | O_TRUNC, 0o600)?;
        write_all(fd.as_raw_fd(), b"again");
        drop(fd);
        check(unsafe { libc::unlink(c"tmp/unlink_me".as_ptr()) }, "tmp/unlink_me").map(drop)
    }

    pub fn unlinkat() -> Step {
        let dir = open_fd(c"tmp", O_RDONLY | O_DIRECTORY)?;
        let flags = O_WRONLY | O_TRUNC | libc::O_CREAT | libc::O_CLOEXEC;
        let fd = unsafe { libc::openat(dir.as_raw_fd(), c"unlink_me".as_ptr(), flags, 0o600 as libc::c_uint) };
        if fd >= 0 {
            let fd = unsafe { OwnedFd::from_raw_fd(fd) };
            write_all(fd.as_raw_fd(), b"again");
        }
        check(
            unsafe { libc::unlinkat(dir.as_raw_fd(), c"unlink_me".as_ptr(), 0) },
            "tmp/unlink_me",
        )
        .map(drop)
    }

    pub fn utime() -> Step {
        check(unsafe { libc::utime(c"file_ok.txt".as_ptr(), ptr::null()) }, "file_ok.txt").map(drop)
    }

    pub fn utimensat() -> Step {
        let now = libc::timespec {
            tv_sec: 0,
            tv_nsec: libc::UTIME_NOW,
        };
        let times = [now, now];
        check(
            unsafe { libc::utimensat(AT_FDCWD, c"file_ok.txt".as_ptr(), times.as_ptr(), 0) },
            "file_ok.txt",
        )
        .map(drop)
    }

    pub fn utimes() -> Step {
        check(unsafe { libc::utimes(c"file_ok.txt".as_ptr(), ptr::null()) }, "file_ok.txt").map(drop)
    }

    pub fn vmsplice() -> Step {
        let (_read_end, write_end) = pipe("pipe")?;
        let data = b"vmsplice-test";
        let iov = libc::iovec {
            iov_base: data.as_ptr() as *mut libc::c_void,
            iov_len: data.len(),
        };
        check(unsafe { libc::vmsplice(write_end.as_raw_fd(), &iov, 1, 0) }, "pipe").map(drop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_registry_covers_catalog() {
        assert_eq!(SCENARIOS.len(), 63);
        let unique: HashSet<_> = names().collect();
        assert_eq!(unique.len(), SCENARIOS.len());
    }

    #[test]
    fn test_registry_sorted() {
        let listed: Vec<_> = names().collect();
        let mut sorted = listed.clone();
        sorted.sort_unstable();
        assert_eq!(listed, sorted);
    }

    #[test]
    fn test_find() {
        assert_eq!(find("readlink").map(|s| s.name), Some("readlink"));
        assert_eq!(find("faccessat2").map(|s| s.name), Some("faccessat2"));
        assert!(find("readlink2").is_none());
        assert!(find("").is_none());
    }

    #[test]
    fn test_mount_family_not_exercised() {
        for name in ["fsconfig", "fsmount", "fsopen", "fspick", "mount", "mount_setattr", "open_by_handle_at"] {
            let failure = find(name).unwrap().run().unwrap_err();
            assert_eq!(failure.errno, Errno::ENOSYS, "{name}");
            assert_eq!(failure.detail, "not exercised");
        }
    }

    #[test]
    fn test_check_captures_errno() {
        let failure = check(unsafe { libc::access(c"/nonexistent/fsfault".as_ptr(), libc::F_OK) }, "missing path")
            .unwrap_err();
        assert_eq!(failure.ret, -1);
        assert_eq!(failure.errno, Errno::ENOENT);
        assert_eq!(failure.detail, "missing path");

        assert_eq!(check(5isize, "ok").unwrap(), 5);
    }
}
