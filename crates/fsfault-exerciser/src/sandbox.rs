//! Sandbox fixture: the files, links and directories every scenario expects.
//!
//! Preparing an existing sandbox again resets file contents and modes, so a
//! sandbox left behind by an interrupted run is reusable.

use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::{symlink, DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;

use anyhow::{Context, Result};

struct Fixture {
    path: &'static str,
    mode: u32,
    content: Content,
}

enum Content {
    Text(&'static [u8]),
    Fill(u8, usize),
}

const DIRECTORIES: &[&str] = &["dir1", "dir1/deep", "tmp", "tree", "tree/a", "tree/b", "tree/c", "rmdir_test"];

const FILES: &[Fixture] = &[
    Fixture { path: "file_ok.txt", mode: 0o600, content: Content::Text(b"hello\n") },
    Fixture { path: "file_ro.txt", mode: 0o400, content: Content::Text(b"read only\n") },
    Fixture { path: "tmp_trunc.log", mode: 0o600, content: Content::Text(b"truncate\n") },
    Fixture { path: "tmp_fsync.log", mode: 0o600, content: Content::Text(b"fsync\n") },
    Fixture { path: "tmp_fdatasync.log", mode: 0o600, content: Content::Text(b"fdatasync\n") },
    Fixture { path: "tmp_copy_src.bin", mode: 0o600, content: Content::Fill(b'A', 1024) },
    Fixture { path: "tmp/unlink_me", mode: 0o600, content: Content::Text(b"unlink data\n") },
    Fixture { path: "tmp/sendfile_src", mode: 0o600, content: Content::Fill(b'B', 2048) },
];

/// (link name, link target). `broken1` dangles on purpose.
const SYMLINKS: &[(&str, &str)] = &[("link1", "file_ok.txt"), ("broken1", "missing_target")];

/// Create `root` and lay out the fixture inside it.
pub fn prepare(root: &Path) -> Result<()> {
    ensure_dir(root).with_context(|| format!("Failed to create sandbox {}", root.display()))?;

    for dir in DIRECTORIES {
        ensure_dir(&root.join(dir)).with_context(|| format!("Failed to create {dir}"))?;
    }
    for fixture in FILES {
        write_fixture(root, fixture).with_context(|| format!("Failed to write {}", fixture.path))?;
    }
    for (name, target) in SYMLINKS {
        match symlink(target, root.join(name)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to link {name} -> {target}")),
        }
    }
    Ok(())
}

fn ensure_dir(path: &Path) -> io::Result<()> {
    match DirBuilder::new().mode(0o700).create(path) {
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        other => other,
    }
}

fn write_fixture(root: &Path, fixture: &Fixture) -> io::Result<()> {
    let path = root.join(fixture.path);
    // A read-only fixture from an earlier run has to become writable first.
    if path.exists() {
        fs::set_permissions(&path, Permissions::from_mode(0o600))?;
    }

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(fixture.mode)
        .open(&path)?;
    match fixture.content {
        Content::Text(bytes) => file.write_all(bytes)?,
        Content::Fill(byte, len) => file.write_all(&vec![byte; len])?,
    }
    drop(file);

    fs::set_permissions(&path, Permissions::from_mode(fixture.mode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    #[test]
    fn test_prepare_lays_out_fixture() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("fs_sandbox");
        prepare(&root).unwrap();

        assert_eq!(fs::read(root.join("file_ok.txt")).unwrap(), b"hello\n");
        assert_eq!(fs::metadata(root.join("file_ro.txt")).unwrap().mode() & 0o777, 0o400);
        assert_eq!(fs::read(root.join("tmp_copy_src.bin")).unwrap(), vec![b'A'; 1024]);
        assert_eq!(fs::read(root.join("tmp/sendfile_src")).unwrap().len(), 2048);
        assert!(root.join("dir1/deep").is_dir());
        assert!(root.join("tree/c").is_dir());
        assert_eq!(fs::read_link(root.join("link1")).unwrap(), Path::new("file_ok.txt"));
        assert!(fs::symlink_metadata(root.join("broken1")).is_ok());
        assert!(!root.join("broken1").exists());
    }

    #[test]
    fn test_prepare_is_repeatable() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("fs_sandbox");
        prepare(&root).unwrap();

        fs::write(root.join("file_ok.txt"), b"scribbled").unwrap();
        fs::remove_file(root.join("tmp/unlink_me")).unwrap();

        prepare(&root).unwrap();
        assert_eq!(fs::read(root.join("file_ok.txt")).unwrap(), b"hello\n");
        assert_eq!(fs::read(root.join("tmp/unlink_me")).unwrap(), b"unlink data\n");
        assert_eq!(fs::metadata(root.join("file_ro.txt")).unwrap().mode() & 0o777, 0o400);
    }

    #[test]
    fn test_prepare_rejects_file_in_place_of_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("occupied");
        fs::write(&root, b"not a directory").unwrap();
        assert!(prepare(&root).is_err());
    }
}
