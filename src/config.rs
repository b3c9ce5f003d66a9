/// Process-wide tunables fixed at `Manager::new` time: a small plain
/// struct read by the Manager and the Watcher, never mutated after
/// startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub notify_socket_path: String,
    pub root_mode: u32,
    pub root_uid: u32,
    pub root_gid: u32,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            notify_socket_path: "/var/run/cgrpfs.notify".to_owned(),
            root_mode: 0o755,
            root_uid: 0,
            root_gid: 0,
        }
    }
}
