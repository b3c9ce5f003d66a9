//! End-to-end scenarios driving a `Manager` the way a real Filesystem Host
//! would: spawn real child processes, attach them, let the watcher thread
//! observe fork/exit on its own, and read back pseudo-file content. Unit
//! tests for the pure data structures (`Tree`, `PidIndex`, wire encoding)
//! live next to those modules; this file is for the scenarios that only
//! make sense wired all the way through a running `Manager`.

use std::process::Command;
use std::time::Duration;

use rustix::net::{AddressFamily, RecvFlags, SocketAddrUnix, SocketType};

use crate::config::Config;
use crate::error::Error;
use crate::manager::Manager;
use crate::notify::ExitRecord;

fn test_config(dir: &tempfile::TempDir) -> Config {
    Config {
        notify_socket_path: dir.path().join("cgrpfs.notify").to_str().unwrap().to_owned(),
        ..Config::default()
    }
}

/// spec.md §8 scenario 1: create, populate, remove.
#[test]
fn create_populate_remove() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(test_config(&dir)).unwrap();

    manager.mkdir("/", "a", 0o755, 0, 0).unwrap();
    manager.mkdir("/a", "b", 0o755, 0, 0).unwrap();

    let mut child = Command::new("sleep").arg("5").spawn().expect("spawn `sleep 5`");
    let pid = child.id();
    let b = manager.lookup("/a/b").unwrap();
    manager.attach(pid, b).unwrap();

    let handle = manager.open("/a/b/cgroup.procs").unwrap();
    assert_eq!(manager.read(handle, 0, 4096).unwrap(), format!("{pid}\n").into_bytes());
    manager.release(handle);

    manager.rmdir("/a/b").unwrap();

    let handle = manager.open("/a/cgroup.procs").unwrap();
    assert_eq!(manager.read(handle, 0, 4096).unwrap(), format!("{pid}\n").into_bytes());
    manager.release(handle);
    assert_eq!(manager.lookup("/a/b"), Err(Error::NotFound));

    let _ = child.kill();
    let _ = child.wait();
}

/// spec.md §8 scenario 3: a tracked process's fork is attached to the
/// same cgroup automatically, with no user action after the initial
/// attach.
#[test]
fn fork_tracking_attaches_child_to_parents_cgroup() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(test_config(&dir)).unwrap();
    manager.mkdir("/", "g", 0o755, 0, 0).unwrap();
    let g = manager.lookup("/g").unwrap();

    // `sh -c 'sleep 5 & wait'` forks a child (the `sleep`) while the shell
    // itself stays alive as the tracked parent.
    let mut parent = Command::new("sh")
        .arg("-c")
        .arg("sleep 5 & wait")
        .spawn()
        .expect("spawn `sh -c`");
    let parent_pid = parent.id();
    manager.attach(parent_pid, g).unwrap();

    std::thread::sleep(Duration::from_millis(500));

    let handle = manager.open("/g/cgroup.procs").unwrap();
    let procs = manager.read(handle, 0, 4096).unwrap();
    manager.release(handle);
    let listed: Vec<u32> = String::from_utf8(procs)
        .unwrap()
        .lines()
        .map(|line| line.parse().unwrap())
        .collect();
    assert!(listed.contains(&parent_pid), "parent pid missing from {listed:?}");
    assert!(listed.len() >= 2, "forked child was never attached: {listed:?}");
    // parent was attached first, so it must be listed before its child
    assert_eq!(listed[0], parent_pid);

    let _ = parent.kill();
    let _ = parent.wait();
}

/// spec.md §8 scenario 5: cross-parent rename is always rejected, and
/// both directories survive the attempt untouched.
#[test]
fn cross_parent_rename_leaves_both_directories_intact() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(test_config(&dir)).unwrap();
    manager.mkdir("/", "x", 0o755, 0, 0).unwrap();
    manager.mkdir("/", "y", 0o755, 0, 0).unwrap();

    let err = manager.rename("/", "x", "/y", "x").unwrap_err();
    assert_eq!(err, Error::NotSupported);

    manager.lookup("/x").unwrap();
    manager.lookup("/y").unwrap();
}

/// spec.md §8 scenario 2: a subscriber connected before a tracked process
/// is killed receives exactly one record with `CLD_KILLED` and the
/// terminating signal number; the owning cgroup's `cgroup.procs` goes
/// empty afterwards.
#[test]
fn killed_process_notifies_subscriber_with_signal_and_clears_procs() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(test_config(&dir)).unwrap();
    manager.mkdir("/", "a", 0o755, 0, 0).unwrap();
    let a = manager.lookup("/a").unwrap();

    let subscriber = rustix::net::socket(AddressFamily::UNIX, SocketType::SEQPACKET, None).unwrap();
    let addr = SocketAddrUnix::new(&manager.config().notify_socket_path).unwrap();
    rustix::net::connect_unix(&subscriber, &addr).unwrap();
    std::thread::sleep(Duration::from_millis(50));

    let mut child = Command::new("sleep").arg("5").spawn().expect("spawn `sleep 5`");
    let pid = child.id();
    manager.attach(pid, a).unwrap();
    child.kill().expect("send SIGKILL");
    child.wait().unwrap();

    std::thread::sleep(Duration::from_millis(200));
    let mut buf = [0u8; ExitRecord::WIRE_SIZE];
    let n = rustix::net::recv(&subscriber, &mut buf, RecvFlags::empty()).unwrap();
    assert_eq!(n, ExitRecord::WIRE_SIZE);
    assert_eq!(i32::from_ne_bytes(buf[0..4].try_into().unwrap()), pid as i32);
    const CLD_KILLED: i32 = 2;
    assert_eq!(i32::from_ne_bytes(buf[8..12].try_into().unwrap()), CLD_KILLED);
    const SIGKILL: i32 = 9;
    assert_eq!(i32::from_ne_bytes(buf[12..16].try_into().unwrap()), SIGKILL);

    let handle = manager.open("/a/cgroup.procs").unwrap();
    assert_eq!(manager.read(handle, 0, 4096).unwrap(), b"");
    manager.release(handle);
}

/// spec.md §8 scenario 4: PidDir synthesis, and `cgroup.meta/<pid>/cgroup`
/// tracking the pid's current cgroup by path as it moves.
#[test]
fn pid_cgroup_file_reflects_current_owner_path() {
    let dir = tempfile::tempdir().unwrap();
    let manager = Manager::new(test_config(&dir)).unwrap();
    manager.mkdir("/", "a", 0o755, 0, 0).unwrap();

    let mut child = Command::new("sleep").arg("5").spawn().expect("spawn `sleep 5`");
    let pid = child.id();

    let handle = manager.open(&format!("/cgroup.meta/{pid}/cgroup")).unwrap();
    assert_eq!(manager.read(handle, 0, 4096).unwrap(), b"1:name=systemd:/\n");
    manager.release(handle);

    let write_handle = manager.open("/a/cgroup.procs").unwrap();
    manager.write(write_handle, format!("{pid}\n").as_bytes()).unwrap();
    manager.release(write_handle);

    let handle = manager.open(&format!("/cgroup.meta/{pid}/cgroup")).unwrap();
    assert_eq!(manager.read(handle, 0, 4096).unwrap(), b"1:name=systemd:/a\n");
    manager.release(handle);

    let _ = child.kill();
    let _ = child.wait();
}
