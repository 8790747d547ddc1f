//! Filesystem operation catalog.
//!
//! One entry per exerciser mode: the kernel entry symbol, the libc symbol the
//! preload layer interposes (if any) and the error variants a sweep walks.

use std::path::Path;

use anyhow::{Context, Result};
use fsfault_engine::normalize_target;
use nix::errno::Errno;
use serde::{Deserialize, Serialize};

/// Exerciser modes, one per filesystem operation.
pub const MODES: &[&str] = &[
    "access", "chdir", "chmod", "chown", "close", "copy_file_range", "faccessat2", "fallocate",
    "fchdir", "fchmod", "fchmodat", "fchown", "fchownat", "fdatasync", "fsconfig", "fsetxattr",
    "fsmount", "fsopen", "fspick", "fstat", "fstatfs", "fsync", "ftruncate", "getdents",
    "getdents64", "lchown", "link", "linkat", "lstat", "mkdir", "mkdirat", "mknod", "mknodat",
    "mount", "mount_setattr", "open", "open_by_handle_at", "open_tree", "openat", "openat2",
    "readahead", "readlink", "readlinkat", "rename", "renameat", "renameat2", "rmdir",
    "sendfile", "splice", "stat", "statfs", "statx", "symlink", "symlinkat", "sync", "tee",
    "truncate", "unlink", "unlinkat", "utime", "utimensat", "utimes", "vmsplice",
];

/// Libc entry points with an interposer in the preload layer.
pub const INTERPOSED: &[&str] = &[
    "access", "chdir", "chmod", "chown", "close", "copy_file_range", "faccessat", "fallocate",
    "fchdir", "fchmod", "fchmodat", "fchown", "fchownat", "fdatasync", "fsetxattr", "fstat",
    "fstatat", "fstatfs", "fsync", "ftruncate", "lchown", "link", "linkat", "lstat", "mkdir",
    "mkdirat", "mknod", "mknodat", "open", "openat", "readahead", "readlink", "readlinkat",
    "rename", "renameat", "renameat2", "rmdir", "sendfile", "splice", "stat", "statfs", "statx",
    "symlink", "symlinkat", "tee", "truncate", "unlink", "unlinkat", "utime", "utimensat",
    "utimes", "vmsplice",
];

/// Candidate error codes for filesystem, mount and I/O operations.
pub const ERRNOS: &[(&str, Errno)] = &[
    ("EPERM", Errno::EPERM),
    ("EACCES", Errno::EACCES),
    ("EBADF", Errno::EBADF),
    ("EFAULT", Errno::EFAULT),
    ("EFBIG", Errno::EFBIG),
    ("EINTR", Errno::EINTR),
    ("EINVAL", Errno::EINVAL),
    ("EIO", Errno::EIO),
    ("EISDIR", Errno::EISDIR),
    ("ELOOP", Errno::ELOOP),
    ("EMFILE", Errno::EMFILE),
    ("ENAMETOOLONG", Errno::ENAMETOOLONG),
    ("ENFILE", Errno::ENFILE),
    ("ENODEV", Errno::ENODEV),
    ("ENOENT", Errno::ENOENT),
    ("ENOMEM", Errno::ENOMEM),
    ("ENOSPC", Errno::ENOSPC),
    ("ENOTDIR", Errno::ENOTDIR),
    ("ENOTEMPTY", Errno::ENOTEMPTY),
    ("ENXIO", Errno::ENXIO),
    ("EOVERFLOW", Errno::EOVERFLOW),
    ("EROFS", Errno::EROFS),
    ("ETIMEDOUT", Errno::ETIMEDOUT),
    ("ETXTBSY", Errno::ETXTBSY),
    ("EXDEV", Errno::EXDEV),
    ("EBUSY", Errno::EBUSY),
    ("EOPNOTSUPP", Errno::EOPNOTSUPP),
];

#[cfg(target_arch = "aarch64")]
const KERNEL_PREFIX: &str = "__arm64_sys_";
#[cfg(not(target_arch = "aarch64"))]
const KERNEL_PREFIX: &str = "__x64_sys_";

pub const CATEGORY_FILE: &str = "file";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorVariant {
    pub errno_name: String,
    pub errno_num: i32,
    /// What the kernel entry returns for this variant (`-errno_num`).
    pub kernel_ret: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub name: String,
    pub kernel_symbol: String,
    pub libc_symbol: Option<String>,
    pub interposable: bool,
    pub category: String,
    pub error_variants: Vec<ErrorVariant>,
}

/// Serialized as a plain JSON array of entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn builtin() -> Self {
        let variants = error_variants();
        let entries = MODES
            .iter()
            .map(|&name| {
                let libc_symbol = libc_symbol(name);
                CatalogEntry {
                    name: name.to_string(),
                    kernel_symbol: kernel_symbol(name),
                    interposable: libc_symbol.is_some(),
                    libc_symbol,
                    category: CATEGORY_FILE.to_string(),
                    error_variants: variants.clone(),
                }
            })
            .collect();
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("Invalid catalog {}", path.display()))
    }

    /// Entry for `name`; only filesystem entries take part.
    pub fn entry(&self, name: &str) -> Option<&CatalogEntry> {
        self.entries
            .iter()
            .find(|e| e.category == CATEGORY_FILE && e.name == name)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

pub fn kernel_symbol(mode: &str) -> String {
    match mode {
        "stat" | "lstat" | "fstat" => format!("{KERNEL_PREFIX}new{mode}"),
        _ => format!("{KERNEL_PREFIX}{mode}"),
    }
}

pub fn libc_symbol(mode: &str) -> Option<String> {
    let canonical = normalize_target(mode);
    INTERPOSED.contains(&canonical).then(|| canonical.to_string())
}

pub fn error_variants() -> Vec<ErrorVariant> {
    ERRNOS
        .iter()
        .map(|&(name, errno)| ErrorVariant {
            errno_name: name.to_string(),
            errno_num: errno as i32,
            kernel_ret: -(errno as i64),
        })
        .collect()
}

/// Accepts a symbolic name (`EACCES`, case-insensitive) or a number.
pub fn parse_errno(value: &str) -> Option<i32> {
    let value = value.trim();
    if let Ok(num) = value.parse() {
        return Some(num);
    }
    ERRNOS
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(value))
        .map(|&(_, errno)| errno as i32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_shape() {
        let catalog = Catalog::builtin();
        assert_eq!(catalog.entries.len(), 63);
        assert!(catalog.entries.iter().all(|e| e.category == "file"));
        assert!(catalog.entries.iter().all(|e| e.error_variants.len() == 27));
    }

    #[test]
    fn test_kernel_symbols() {
        assert_eq!(kernel_symbol("readlink"), format!("{KERNEL_PREFIX}readlink"));
        assert_eq!(kernel_symbol("stat"), format!("{KERNEL_PREFIX}newstat"));
        assert_eq!(kernel_symbol("fstat"), format!("{KERNEL_PREFIX}newfstat"));
        assert_eq!(normalize_target(&kernel_symbol("lstat")), "lstat");
    }

    #[test]
    fn test_interposable_modes() {
        let catalog = Catalog::builtin();
        let faccessat2 = catalog.entry("faccessat2").unwrap();
        assert!(faccessat2.interposable);
        assert_eq!(faccessat2.libc_symbol.as_deref(), Some("faccessat"));

        for name in ["getdents", "getdents64", "openat2", "open_tree", "mount", "sync"] {
            let entry = catalog.entry(name).unwrap();
            assert!(!entry.interposable, "{name}");
            assert!(entry.libc_symbol.is_none(), "{name}");
        }
        assert_eq!(catalog.entries.iter().filter(|e| e.interposable).count(), 51);
    }

    #[test]
    fn test_error_variants_use_kernel_convention() {
        let variants = error_variants();
        let eacces = variants.iter().find(|v| v.errno_name == "EACCES").unwrap();
        assert_eq!(eacces.errno_num, 13);
        assert_eq!(eacces.kernel_ret, -13);
        assert!(variants.iter().all(|v| v.errno_num > 0 && v.kernel_ret == -(v.errno_num as i64)));
    }

    #[test]
    fn test_parse_errno() {
        assert_eq!(parse_errno("EACCES"), Some(13));
        assert_eq!(parse_errno("enoent"), Some(2));
        assert_eq!(parse_errno("28"), Some(28));
        assert_eq!(parse_errno("EWHATEVER"), None);
    }

    #[test]
    fn test_json_is_plain_array() {
        let json = Catalog::builtin().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let entries = value.as_array().unwrap();
        assert_eq!(entries.len(), 63);
        assert_eq!(entries[0]["name"], "access");
        assert_eq!(entries[0]["error_variants"][0]["errno_name"], "EPERM");

        let back: Catalog = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Catalog::builtin());
    }
}
