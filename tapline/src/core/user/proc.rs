//! Process
//!
//! Host-side view of container processes through procfs: executable paths
//! reachable from the host, PID namespaces and file identities.

use std::{
    fs,
    os::unix::fs::MetadataExt,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Result};
use log::warn;

/// Access to a procfs mount, `/proc` or the host's one mounted in a pod
/// (eg. `/host/proc`).
#[derive(Clone, Debug)]
pub(crate) struct ProcFs {
    root: PathBuf,
}

impl ProcFs {
    pub(crate) fn new<P: AsRef<Path>>(root: P) -> ProcFs {
        ProcFs {
            root: root.as_ref().to_path_buf(),
        }
    }

    /// Path of a file as seen from inside the mount namespace of a process,
    /// reachable from the host through `<proc>/<pid>/root`.
    pub(crate) fn path_in_root(&self, pid: u32, path: &Path) -> PathBuf {
        let relative = path.strip_prefix("/").unwrap_or(path);
        self.root.join(pid.to_string()).join("root").join(relative)
    }

    /// Host path of the executable of a process.
    pub(crate) fn executable(&self, pid: u32) -> Result<PathBuf> {
        let link = self.root.join(pid.to_string()).join("exe");
        let exe = fs::read_link(&link)
            .with_context(|| format!("Could not resolve executable of pid {pid}"))?;

        let exe = match exe.to_str().and_then(|s| s.strip_suffix(" (deleted)")) {
            Some(stripped) => {
                warn!("Executable of pid {pid} was deleted from disk, trying {stripped} anyway");
                PathBuf::from(stripped)
            }
            None => exe,
        };

        Ok(self.path_in_root(pid, &exe))
    }

    /// Inode of the PID namespace of a process.
    pub(crate) fn pid_namespace(&self, pid: u32) -> Result<u32> {
        let link = self.root.join(pid.to_string()).join("ns").join("pid");
        let target = fs::read_link(&link)
            .with_context(|| format!("Could not read PID namespace of pid {pid}"))?;

        parse_ns_link(&target.to_string_lossy())
    }
}

/// Parse a namespace link target, eg. `pid:[4026531836]`.
pub(crate) fn parse_ns_link(link: &str) -> Result<u32> {
    let inode = link
        .split_once(":[")
        .and_then(|(_, rest)| rest.strip_suffix(']'))
        .ok_or_else(|| anyhow!("Invalid namespace link '{link}'"))?;

    inode
        .parse()
        .with_context(|| format!("Invalid namespace inode in '{link}'"))
}

/// Inode of a file, used to identify binaries shared by several containers.
pub(crate) fn file_inode(path: &Path) -> Result<u64> {
    Ok(fs::metadata(path)
        .with_context(|| format!("Could not stat {}", path.display()))?
        .ino())
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::symlink;

    use test_case::test_case;

    use super::*;

    fn fake_proc() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let pid = dir.path().join("42");

        fs::create_dir_all(pid.join("ns")).unwrap();
        symlink("pid:[4026532210]", pid.join("ns").join("pid")).unwrap();
        symlink("/usr/local/bin/server", pid.join("exe")).unwrap();

        let deleted = dir.path().join("43");
        fs::create_dir_all(&deleted).unwrap();
        symlink("/app/server (deleted)", deleted.join("exe")).unwrap();

        dir
    }

    #[test_case("pid:[4026531836]", Some(4026531836))]
    #[test_case("pid:[12]", Some(12))]
    #[test_case("pid:[]", None)]
    #[test_case("pid:4026531836", None)]
    #[test_case("pid:[99999999999]", None ; "overflow")]
    fn ns_link(link: &str, inode: Option<u32>) {
        assert_eq!(parse_ns_link(link).ok(), inode);
    }

    #[test]
    fn executable() {
        let dir = fake_proc();
        let proc = ProcFs::new(dir.path());

        assert_eq!(
            proc.executable(42).unwrap(),
            dir.path().join("42/root/usr/local/bin/server")
        );
        assert_eq!(
            proc.executable(43).unwrap(),
            dir.path().join("43/root/app/server")
        );
        assert!(proc.executable(44).is_err());
    }

    #[test]
    fn pid_namespace() {
        let dir = fake_proc();
        let proc = ProcFs::new(dir.path());

        assert_eq!(proc.pid_namespace(42).unwrap(), 4026532210);
        assert!(proc.pid_namespace(43).is_err());
    }

    #[test]
    fn inode() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let ino = file_inode(file.path()).unwrap();

        assert_eq!(ino, fs::metadata(file.path()).unwrap().ino());
        assert!(file_inode(Path::new("/nonexistent/tapline")).is_err());
    }
}
