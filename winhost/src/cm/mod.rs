//! Configuration Manager (registry)
//!
//! A hierarchical typed key/value store persisted to a host directory
//! tree: one subdirectory per hive, one directory per key, one file per
//! value ([`value::encode`] describes the file layout).
//!
//! The root directory comes from `WINHOST_REGISTRY_ROOT`, falling back
//! to the host's configuration area. Hive roots are pseudo-handles that
//! resolve without entering the handle table.

pub mod operations;
pub mod value;

pub use value::RegType;

use crate::abi::{Dword, Handle};
use crate::status::HostError;
use spin::Mutex as SpinMutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

// Hive pseudo-handles, resolved without the handle table.
pub const HKEY_CLASSES_ROOT: Handle = 0x8000_0000;
pub const HKEY_CURRENT_USER: Handle = 0x8000_0001;
pub const HKEY_LOCAL_MACHINE: Handle = 0x8000_0002;
pub const HKEY_USERS: Handle = 0x8000_0003;

/// An open key behind a real handle.
pub struct KeyObject {
    /// Absolute host directory of the key.
    pub path: PathBuf,
    /// Requested access mask, recorded for diagnostics.
    pub access: Dword,
}

static ROOT: OnceLock<PathBuf> = OnceLock::new();

/// Resolve the registry root once, from the environment or the host's
/// configuration area, and create the hive directories.
pub fn init_from_env() {
    let _ = root();
}

/// The registry root directory.
pub fn root() -> &'static Path {
    ROOT.get_or_init(|| {
        let base = std::env::var("WINHOST_REGISTRY_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_root());
        for hive in ["local-machine", "current-user", "classes-root", "users"] {
            let _ = std::fs::create_dir_all(base.join(hive));
        }
        log::debug!("[CM] registry root {base:?}");
        base
    })
}

fn default_root() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("winhost/registry");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".config/winhost/registry");
    }
    PathBuf::from("./winhost-registry")
}

/// Host directory of a hive pseudo-handle.
pub fn hive_dir(handle: Handle) -> Option<PathBuf> {
    let hive = match handle {
        HKEY_CLASSES_ROOT => "classes-root",
        HKEY_CURRENT_USER => "current-user",
        HKEY_LOCAL_MACHINE => "local-machine",
        HKEY_USERS => "users",
        _ => return None,
    };
    Some(root().join(hive))
}

/// Validate one key-path or value-name component: must be expressible as
/// a file name.
pub fn safe_component(name: &str) -> Result<(), HostError> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.bytes().any(|b| b == b'/' || b == 0)
    {
        return Err(HostError::ProtocolViolation(format!(
            "registry name {name:?}"
        )));
    }
    Ok(())
}

/// Append a guest subkey path (backslash separated) to a key directory.
pub fn join_subkey(base: &Path, subkey: &str) -> Result<PathBuf, HostError> {
    let mut path = base.to_path_buf();
    for component in subkey.split('\\').filter(|c| !c.is_empty()) {
        safe_component(component)?;
        path.push(component);
    }
    Ok(path)
}

// ============================================================================
// Per-key advisory write locks
// ============================================================================

static WRITE_LOCKS: spin::Lazy<SpinMutex<HashMap<PathBuf, Arc<Mutex<()>>>>> =
    spin::Lazy::new(|| SpinMutex::new(HashMap::new()));

/// The advisory write lock for a key. Readers do not take it.
pub fn write_lock(key: &Path) -> Arc<Mutex<()>> {
    let mut locks = WRITE_LOCKS.lock();
    locks.entry(key.to_path_buf()).or_default().clone()
}

/// Point the store at a scratch directory for in-process tests. First
/// caller wins; later calls are no-ops against the same root.
#[cfg(test)]
pub(crate) fn init_test_root() {
    let scratch = std::env::temp_dir().join(format!("winhost-cm-{}", std::process::id()));
    let _ = ROOT.set(scratch);
    for hive in ["local-machine", "current-user", "classes-root", "users"] {
        let _ = std::fs::create_dir_all(root().join(hive));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hive_dirs_distinct() {
        init_test_root();
        let lm = hive_dir(HKEY_LOCAL_MACHINE).unwrap();
        let cu = hive_dir(HKEY_CURRENT_USER).unwrap();
        assert_ne!(lm, cu);
        assert!(hive_dir(0x1234).is_none());
    }

    #[test]
    fn test_unsafe_components_rejected() {
        assert!(safe_component("SOFTWARE").is_ok());
        assert!(safe_component("..").is_err());
        assert!(safe_component("a/b").is_err());
        assert!(safe_component("").is_err());
    }

    #[test]
    fn test_join_subkey_walks_backslashes() {
        let p = join_subkey(Path::new("/r"), "SOFTWARE\\Vendor\\App").unwrap();
        assert_eq!(p, PathBuf::from("/r/SOFTWARE/Vendor/App"));
    }
}
