//! End-to-end tests driving the `jailrun` binary.
//!
//! Jail scenarios skip themselves unless the process may mount.

use nix::mount::{mount, umount2, MntFlags, MsFlags};
use std::collections::BTreeSet;
use std::path::Path;
use std::process::{Command, Output};

fn jailrun(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_jailrun"))
        .args(args)
        .output()
        .expect("failed to spawn jailrun")
}

fn privileged() -> bool {
    if !nix::unistd::geteuid().is_root() {
        return false;
    }
    let Ok(dir) = tempfile::tempdir() else {
        return false;
    };
    let mounted = mount(
        Some("tmpfs"),
        dir.path(),
        Some("tmpfs"),
        MsFlags::empty(),
        None::<&str>,
    )
    .is_ok();
    if mounted {
        let _ = umount2(dir.path(), MntFlags::MNT_DETACH);
    }
    mounted && Path::new("/bin/ls").exists()
}

/// Runs `jailrun unmount` for the root on drop
struct Teardown<'a> {
    root: &'a str,
    extra: Vec<&'a str>,
}

impl Drop for Teardown<'_> {
    fn drop(&mut self) {
        let mut args = vec!["unmount", "--root", self.root];
        args.extend(&self.extra);
        let _ = jailrun(&args);
    }
}

#[test]
fn version_prints_package_version() {
    let out = jailrun(&["version"]);
    assert!(out.status.success());
    assert_eq!(
        String::from_utf8_lossy(&out.stdout).trim(),
        env!("CARGO_PKG_VERSION")
    );
}

#[test]
fn relative_root_fails() {
    let out = jailrun(&["run", "--root", "relative/jail", "--", "/bin/true"]);
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert_eq!(stderr.matches("root must be absolute").count(), 1, "{stderr}");
    assert!(!Path::new("relative/jail").exists());
}

#[test]
fn invalid_log_level_fails() {
    let out = jailrun(&["--log-level", "chatty", "unmount", "--root", "/tmp/jailrun-none"]);
    assert!(!out.status.success());
}

#[test]
fn ls_sees_only_the_jail() {
    if !privileged() {
        eprintln!("Skipping: needs CAP_SYS_ADMIN and CAP_MKNOD");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_str().unwrap();
    let _teardown = Teardown { root, extra: vec![] };

    let out = jailrun(&["run", "--root", root, "--", "/bin/ls", "/"]);
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );

    let listed: BTreeSet<String> = String::from_utf8_lossy(&out.stdout)
        .lines()
        .map(str::to_owned)
        .collect();
    for entry in ["dev", "etc", "tmp", "proc"] {
        assert!(listed.contains(entry), "missing {entry} in {listed:?}");
    }
    let allowed = [
        "bin", "sbin", "lib", "lib32", "lib64", "usr", "dev", "etc", "tmp", "run", "var", "proc",
    ];
    for entry in &listed {
        assert!(allowed.contains(&entry.as_str()), "host entry {entry} leaked");
    }

    assert!(dir.path().join("dev/null").exists());
    if Path::new("/etc/passwd").exists() {
        assert_eq!(
            std::fs::read(dir.path().join("etc/passwd")).unwrap(),
            std::fs::read("/etc/passwd").unwrap()
        );
    }
}

#[test]
fn unmount_empties_bound_dirs() {
    if !privileged() {
        eprintln!("Skipping: needs CAP_SYS_ADMIN and CAP_MKNOD");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_str().unwrap();
    let _teardown = Teardown {
        root,
        extra: vec!["--bind", "/bin"],
    };

    let out = jailrun(&["run", "--root", root, "--bind", "/bin", "--", "/bin/echo", "hi"]);
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "hi");

    let out = jailrun(&["unmount", "--root", root, "--bind", "/bin"]);
    assert!(out.status.success());

    let bin = dir.path().join("bin");
    assert!(bin.is_dir());
    assert_eq!(std::fs::read_dir(&bin).unwrap().count(), 0);

    // second teardown has nothing left to do
    let out = jailrun(&["unmount", "--root", root, "--bind", "/bin"]);
    assert!(out.status.success());
}

#[test]
fn missing_copy_file_is_skipped() {
    if !privileged() {
        eprintln!("Skipping: needs CAP_SYS_ADMIN and CAP_MKNOD");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let root_dir = dir.path().join("root");
    let root = root_dir.to_str().unwrap();
    let config = dir.path().join("jail.json");
    std::fs::write(
        &config,
        r#"{"copy_files": ["/etc/jailrun-test-absent-file"]}"#,
    )
    .unwrap();
    let _teardown = Teardown { root, extra: vec![] };

    let out = jailrun(&[
        "run",
        "--root",
        root,
        "--config",
        config.to_str().unwrap(),
        "--",
        "/bin/true",
    ]);
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    assert!(root_dir.join("etc").is_dir());
    assert!(!root_dir.join("etc/jailrun-test-absent-file").exists());
}

#[test]
fn payload_exit_status_is_propagated() {
    if !privileged() {
        eprintln!("Skipping: needs CAP_SYS_ADMIN and CAP_MKNOD");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().to_str().unwrap();
    let _teardown = Teardown { root, extra: vec![] };

    let out = jailrun(&["run", "--root", root, "--", "/bin/sh", "-c", "exit 7"]);
    assert_eq!(out.status.code(), Some(7));

    let out = jailrun(&["run", "--root", root, "--", "/no/such/payload"]);
    assert_eq!(out.status.code(), Some(127));
}
