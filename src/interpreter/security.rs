//! Filesystem and process security policy.
//!
//! Paths are resolved through symlinks before any allow/restrict list is
//! consulted, in both directions: the checked path AND every configured list
//! entry are canonicalized. A symlink inside an allowed directory pointing
//! outside it is denied, and an allowed directory reached through a symlink
//! is still allowed. For paths that do not exist yet (writes), the nearest
//! existing ancestor is resolved and the remaining components are appended.

use std::path::{Path, PathBuf};

use crate::interpreter::error::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Execute,
}

impl Access {
    fn verb(self) -> &'static str {
        match self {
            Access::Read => "read",
            Access::Write => "write",
            Access::Execute => "execute",
        }
    }
}

/// Host-configured access policy. With no policy installed, reads and
/// imports are allowed and writes and process execution are denied.
#[derive(Debug, Clone, Default)]
pub struct SecurityPolicy {
    pub no_read: bool,
    pub restrict_read: Vec<PathBuf>,
    pub no_write: bool,
    pub allow_write_all: bool,
    pub allow_write: Vec<PathBuf>,
    pub restrict_write: Vec<PathBuf>,
    pub allow_execute_all: bool,
    pub allow_execute: Vec<PathBuf>,
}

impl SecurityPolicy {
    /// The default posture when the host installs no policy
    pub fn permissive_read_only() -> Self {
        Self::default()
    }

    pub fn check(&self, path: &Path, access: Access) -> Result<(), RuntimeError> {
        let resolved = resolve_symlinks(path);
        match access {
            Access::Read => {
                if self.no_read {
                    return Err(denied(path, access));
                }
                if path_in_list(&resolved, &self.restrict_read) {
                    return Err(RuntimeError::security(
                        "SEC-0001",
                        format!("read access to '{}' is restricted", path.display()),
                    ));
                }
                Ok(())
            }
            Access::Write => {
                if self.no_write {
                    return Err(denied(path, access));
                }
                if path_in_list(&resolved, &self.restrict_write) {
                    return Err(denied(path, access));
                }
                if self.allow_write_all || path_in_list(&resolved, &self.allow_write) {
                    Ok(())
                } else {
                    Err(denied(path, access))
                }
            }
            Access::Execute => {
                if self.allow_execute_all || path_in_list(&resolved, &self.allow_execute) {
                    Ok(())
                } else {
                    Err(denied(path, access))
                }
            }
        }
    }
}

fn denied(path: &Path, access: Access) -> RuntimeError {
    RuntimeError::security(
        "SEC-0002",
        format!(
            "{} access to '{}' denied by security policy",
            access.verb(),
            path.display()
        ),
    )
}

/// Resolve a path through symlinks. For nonexistent paths, resolve the
/// closest existing ancestor and re-append the trailing components, so a
/// not-yet-created file inside a symlinked directory still resolves to the
/// real location.
pub fn resolve_symlinks(path: &Path) -> PathBuf {
    if let Ok(resolved) = path.canonicalize() {
        return resolved;
    }
    let mut ancestor = path.to_path_buf();
    let mut trailing = Vec::new();
    loop {
        if let Some(name) = ancestor.file_name() {
            trailing.push(name.to_os_string());
        } else {
            return path.to_path_buf();
        }
        if !ancestor.pop() {
            return path.to_path_buf();
        }
        if let Ok(mut resolved) = ancestor.canonicalize() {
            for part in trailing.iter().rev() {
                resolved.push(part);
            }
            return resolved;
        }
    }
}

/// Is `path` equal to or under any entry of `list`? List entries resolve
/// through symlinks too.
fn path_in_list(path: &Path, list: &[PathBuf]) -> bool {
    list.iter()
        .any(|entry| path.starts_with(resolve_symlinks(entry)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_allows_read_denies_write_and_execute() {
        let policy = SecurityPolicy::permissive_read_only();
        assert!(policy.check(Path::new("/tmp/x"), Access::Read).is_ok());
        assert!(policy.check(Path::new("/tmp/x"), Access::Write).is_err());
        assert!(policy.check(Path::new("/bin/ls"), Access::Execute).is_err());
    }

    #[test]
    fn restricted_read_uses_its_own_code() {
        let policy = SecurityPolicy {
            restrict_read: vec![PathBuf::from("/")],
            ..Default::default()
        };
        let err = policy.check(Path::new("/etc/passwd"), Access::Read).unwrap_err();
        assert_eq!(err.code, "SEC-0001");
        assert!(!err.is_catchable());
    }

    #[test]
    fn write_allow_list_is_prefix_scoped() {
        let policy = SecurityPolicy {
            allow_write: vec![PathBuf::from("/")],
            restrict_write: vec![PathBuf::from("/etc")],
            ..Default::default()
        };
        assert!(policy.check(Path::new("/tmp/out.txt"), Access::Write).is_ok());
        assert!(policy
            .check(Path::new("/etc/hosts"), Access::Write)
            .is_err());
    }

    #[test]
    fn nonexistent_paths_resolve_through_existing_ancestors() {
        let resolved = resolve_symlinks(Path::new("/tmp/definitely/not/created/yet.txt"));
        assert!(resolved.ends_with("definitely/not/created/yet.txt"));
    }
}
