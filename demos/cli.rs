//! Drives a `Manager` directly, without mounting it anywhere, to show
//! the tree and notify server behaving the way a real Filesystem Host
//! would see them. Mount-option parsing and an actual FUSE mount are
//! out of scope here; see `host::fuse` for the adapter that would sit
//! between this and a real mountpoint.

use std::time::Duration;

use cgrpfs::{Config, Manager};
use log::{error, info};

const HELP: &str = r#"
Exercise a cgrpfs Manager in memory: create a child cgroup, attach a
spawned process to it, and print cgroup.procs as processes come and go.

Usage: cgrpfs-cli [OPTIONS]

Options:
  -s, --socket <PATH>
          Notify socket path (default: /var/run/cgrpfs.notify)
"#;

fn parse_args() -> Result<Config, lexopt::Error> {
    use lexopt::prelude::*;

    let mut config = Config::default();
    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        match arg {
            Short('s') | Long("socket") => {
                config.notify_socket_path = parser.value()?.string()?;
            }
            Long("help") => {
                println!("{HELP}");
                std::process::exit(0);
            }
            _ => return Err(arg.unexpected()),
        }
    }
    Ok(config)
}

pub fn main() -> Result<(), lexopt::Error> {
    let _ = env_logger::builder().try_init();
    let config = parse_args()?;

    let manager = Manager::new(config).map_err(|err| lexopt::Error::Custom(Box::new(err)))?;

    manager
        .mkdir("/", "workload", 0o755, 0, 0)
        .expect("root always accepts a fresh child directory");

    let mut child = std::process::Command::new("sleep")
        .arg("1")
        .spawn()
        .expect("spawn `sleep 1`");
    let pid = child.id();
    let workload = manager.lookup("/workload").unwrap();
    if let Err(err) = manager.attach(pid, workload) {
        error!("failed to attach pid {pid}: {err}");
    }

    let handle = manager.open("/workload/cgroup.procs").unwrap();
    let procs = manager.read(handle, 0, 4096).unwrap();
    manager.release(handle);
    info!("cgroup.procs: {}", String::from_utf8_lossy(&procs));

    let _ = child.wait();
    std::thread::sleep(Duration::from_millis(200));

    let handle = manager.open("/workload/cgroup.procs").unwrap();
    let procs = manager.read(handle, 0, 4096).unwrap();
    manager.release(handle);
    info!("cgroup.procs after exit: {}", String::from_utf8_lossy(&procs));

    manager.shutdown();
    Ok(())
}
