mod sys;

use std::sync::Arc;
use std::thread::JoinHandle;

pub(crate) use sys::Kqueue;
use sys::{ProcNote, WatchEvent};

use crate::manager::Manager;

/// Owns the watcher thread's join handle and a handle to the same
/// kqueue it waits on, so shutdown can wake it out of its blocking wait
/// rather than killing the thread outright.
pub struct ProcessWatcher {
    thread: Option<JoinHandle<()>>,
    kqueue: Arc<Kqueue>,
}

impl ProcessWatcher {
    pub(crate) fn spawn(kqueue: Arc<Kqueue>, manager: Arc<Manager>) -> Self {
        let thread_kqueue = Arc::clone(&kqueue);
        let thread = std::thread::Builder::new()
            .name("cgrpfs-watcher".to_owned())
            .spawn(move || run(&thread_kqueue, &manager))
            .expect("failed to spawn watcher thread");
        ProcessWatcher {
            thread: Some(thread),
            kqueue,
        }
    }

    /// Wakes the watcher thread and waits for it to exit. Consumes
    /// `self`: a `ProcessWatcher` that has been shut down cannot be
    /// restarted.
    pub fn shutdown(mut self) {
        if let Err(err) = self.kqueue.wake() {
            log::warn!("failed to wake watcher thread for shutdown: {err}");
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run(kqueue: &Kqueue, manager: &Arc<Manager>) {
    loop {
        // `Kqueue::wait` already retries internally on EINTR; any error it
        // surfaces here is a hard kevent(2) failure. The watcher has no
        // way to recover a dropped kqueue, so it aborts rather than spin
        // in a loop that will only fail the same way forever.
        let events = match kqueue.wait() {
            Ok(events) => events,
            Err(err) => {
                log::error!("kevent wait failed, aborting: {err}");
                std::process::abort();
            }
        };
        for event in events {
            match event {
                WatchEvent::Wake => {
                    if manager.is_shutting_down() {
                        return;
                    }
                }
                WatchEvent::ListenerReadable => manager.accept_subscriber(),
                WatchEvent::Proc(note) => dispatch(manager, note),
            }
        }
    }
}

fn dispatch(manager: &Manager, note: ProcNote) {
    match note {
        ProcNote::Fork { parent, child } => manager.handle_fork(parent, child),
        ProcNote::Exit { pid, status } => manager.handle_exit(pid, status),
        ProcNote::TrackErr { pid } => log::warn!(
            "lost fork tracking for pid {pid} (EVFILT_PROC/NOTE_TRACKERR); \
             children forked after this point will not be attached automatically"
        ),
        ProcNote::Exec { pid } => log::debug!("pid {pid} exec'd; cgroup membership unchanged"),
    }
}
