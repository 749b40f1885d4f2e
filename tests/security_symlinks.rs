//! Symlink resolution in the security policy, exercised against a real
//! filesystem layout. Allow lists are scoped to real locations: a link
//! escaping an allowed directory is denied, and an allowed directory is
//! still allowed when reached through a link.

#![cfg(unix)]

use std::os::unix::fs::symlink;
use std::path::Path;

use sorrel::interpreter::security::{Access, SecurityPolicy};

#[test]
fn symlink_escaping_an_allowed_directory_is_denied() {
    let dir = tempfile::tempdir().unwrap();
    let allowed = dir.path().join("allowed");
    let outside = dir.path().join("outside");
    std::fs::create_dir(&allowed).unwrap();
    std::fs::create_dir(&outside).unwrap();
    std::fs::write(outside.join("secret.txt"), "x").unwrap();
    symlink(outside.join("secret.txt"), allowed.join("escape.txt")).unwrap();

    let policy = SecurityPolicy {
        allow_write: vec![allowed.clone()],
        ..Default::default()
    };
    assert!(policy
        .check(&allowed.join("plain.txt"), Access::Write)
        .is_ok());
    let err = policy
        .check(&allowed.join("escape.txt"), Access::Write)
        .unwrap_err();
    assert_eq!(err.code, "SEC-0002");
}

#[test]
fn allowed_directory_reached_through_a_symlink_is_allowed() {
    let dir = tempfile::tempdir().unwrap();
    let real = dir.path().join("real");
    std::fs::create_dir(&real).unwrap();
    let link = dir.path().join("link");
    symlink(&real, &link).unwrap();

    let policy = SecurityPolicy {
        allow_write: vec![real],
        ..Default::default()
    };
    assert!(policy.check(&link.join("out.txt"), Access::Write).is_ok());
}

#[test]
fn restrict_list_entries_resolve_symlinks_too() {
    let dir = tempfile::tempdir().unwrap();
    let real = dir.path().join("real");
    std::fs::create_dir(&real).unwrap();
    std::fs::write(real.join("data.txt"), "x").unwrap();
    let link = dir.path().join("link");
    symlink(&real, &link).unwrap();

    // restricting the link restricts the real directory behind it
    let policy = SecurityPolicy {
        restrict_read: vec![link],
        ..Default::default()
    };
    let err = policy
        .check(&real.join("data.txt"), Access::Read)
        .unwrap_err();
    assert_eq!(err.code, "SEC-0001");
}

#[test]
fn nonexistent_write_targets_resolve_via_their_parent() {
    let dir = tempfile::tempdir().unwrap();
    let real = dir.path().join("real");
    std::fs::create_dir(&real).unwrap();
    let link = dir.path().join("link");
    symlink(&real, &link).unwrap();

    let policy = SecurityPolicy {
        allow_write: vec![real],
        ..Default::default()
    };
    // the file does not exist yet; the linked parent must still resolve
    assert!(policy
        .check(&link.join("new").join("deep.txt"), Access::Write)
        .is_ok());
    assert!(policy
        .check(Path::new("/somewhere/else.txt"), Access::Write)
        .is_err());
}
