// SPDX-License-Identifier: MPL-2.0

//! Filesystem trigger for background recordings
//!
//! The motion detector touches a marker file whenever it sees motion. The
//! watcher turns modify/open events on that file into background recordings,
//! relying on the recording manager to reject overlapping starts.

use crate::backends::MediaEngine;
use crate::constants::timing;
use crate::errors::RecordingError;
use crate::session::{RecordingKind, RecordingManager};
use std::ffi::CString;
use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerEvent {
    Modified,
    Opened,
}

/// Blocking source of trigger events
pub trait TriggerSource: Send {
    /// Wait up to `timeout`; an empty batch means nothing happened
    fn wait(&mut self, timeout: Duration) -> io::Result<Vec<TriggerEvent>>;
}

/// inotify watch on a single file
pub struct InotifySource {
    fd: OwnedFd,
    path: PathBuf,
}

// struct inotify_event without the trailing name
const EVENT_HEADER_LEN: usize = 16;

impl InotifySource {
    /// Watch `marker`, creating it empty (with parents) if it is missing
    pub fn open(marker: &Path) -> io::Result<Self> {
        if let Some(parent) = marker.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if !marker.exists() {
            File::create(marker)?;
            debug!(path = %marker.display(), "Created trigger marker");
        }

        let raw = unsafe { libc::inotify_init1(libc::IN_NONBLOCK | libc::IN_CLOEXEC) };
        if raw < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: inotify_init1 returned a fresh descriptor we now own
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let c_path = CString::new(marker.as_os_str().as_bytes())
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
        let wd = unsafe { libc::inotify_add_watch(fd.as_raw_fd(), c_path.as_ptr(), libc::IN_MODIFY | libc::IN_OPEN) };
        if wd < 0 {
            return Err(io::Error::last_os_error());
        }

        info!(path = %marker.display(), "Watching trigger marker");
        Ok(Self {
            fd,
            path: marker.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TriggerSource for InotifySource {
    fn wait(&mut self, timeout: Duration) -> io::Result<Vec<TriggerEvent>> {
        let mut pfd = libc::pollfd {
            fd: self.fd.as_raw_fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            return if err.kind() == io::ErrorKind::Interrupted {
                Ok(Vec::new())
            } else {
                Err(err)
            };
        }
        if ready == 0 {
            return Ok(Vec::new());
        }

        let mut buf = [0u8; 4096];
        let read = unsafe { libc::read(self.fd.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len()) };
        if read < 0 {
            let err = io::Error::last_os_error();
            return if err.kind() == io::ErrorKind::WouldBlock {
                Ok(Vec::new())
            } else {
                Err(err)
            };
        }

        Ok(parse_events(&buf[..read as usize]))
    }
}

fn parse_events(bytes: &[u8]) -> Vec<TriggerEvent> {
    let mut events = Vec::new();
    let mut offset = 0;
    while offset + EVENT_HEADER_LEN <= bytes.len() {
        let field = |at: usize| {
            let start = offset + at;
            u32::from_ne_bytes([bytes[start], bytes[start + 1], bytes[start + 2], bytes[start + 3]])
        };
        let mask = field(4);
        let name_len = field(12) as usize;

        if mask & libc::IN_MODIFY != 0 {
            events.push(TriggerEvent::Modified);
        } else if mask & libc::IN_OPEN != 0 {
            events.push(TriggerEvent::Opened);
        }
        offset += EVENT_HEADER_LEN + name_len;
    }
    events
}

/// Turns trigger events into background recordings
pub struct TriggerWatcher<E: MediaEngine> {
    recordings: Arc<RecordingManager<E>>,
}

impl<E: MediaEngine> TriggerWatcher<E> {
    pub fn new(recordings: Arc<RecordingManager<E>>) -> Self {
        Self { recordings }
    }

    /// Start a background recording for a batch of events unless one is active
    ///
    /// Returns the thread running the start, if one was spawned.
    pub fn dispatch(&self, events: &[TriggerEvent]) -> Option<JoinHandle<()>> {
        if events.is_empty() {
            return None;
        }
        if self.recordings.is_active(RecordingKind::Background) {
            debug!(events = events.len(), "Background recording active, ignoring trigger");
            return None;
        }

        let recordings = Arc::clone(&self.recordings);
        let spawned = std::thread::Builder::new()
            .name("camhub-trigger-record".into())
            .spawn(move || match recordings.start_background() {
                Ok(info) => info!(output = %info.output_path.display(), "Motion triggered recording"),
                Err(RecordingError::Busy(_)) => debug!("Trigger lost the race for the background slot"),
                Err(err) => error!(error = %err, "Triggered recording failed"),
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(err) => {
                error!(error = %err, "Failed to spawn recording thread");
                None
            }
        }
    }
}

/// Handle to a running watcher thread
pub struct WatcherHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|thread| !thread.is_finished())
    }

    /// Stop the loop and wait for it to exit
    pub fn shutdown(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("Trigger watcher thread panicked");
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Run the watch loop on its own thread
pub fn spawn_watcher<E, S>(source: S, recordings: Arc<RecordingManager<E>>) -> io::Result<WatcherHandle>
where
    E: MediaEngine,
    S: TriggerSource + 'static,
{
    spawn_watcher_with_interval(source, recordings, timing::WATCH_POLL_INTERVAL)
}

fn spawn_watcher_with_interval<E, S>(
    mut source: S,
    recordings: Arc<RecordingManager<E>>,
    interval: Duration,
) -> io::Result<WatcherHandle>
where
    E: MediaEngine,
    S: TriggerSource + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let watcher = TriggerWatcher::new(recordings);

    let thread = std::thread::Builder::new()
        .name("camhub-trigger".into())
        .spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                match source.wait(interval) {
                    Ok(events) => {
                        watcher.dispatch(&events);
                    }
                    Err(err) => {
                        error!(error = %err, "Trigger source failed, watcher exiting");
                        break;
                    }
                }
            }
            debug!("Trigger watcher stopped");
        })?;

    Ok(WatcherHandle {
        stop,
        thread: Some(thread),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::mock::MockEngine;
    use crate::config::Config;
    use crate::session::{ConsumerRegistry, RecordingState};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::io::Write;

    fn manager(root: &Path) -> (Arc<MockEngine>, Arc<RecordingManager<MockEngine>>) {
        let engine = MockEngine::new();
        let config = Config {
            root_dir: root.to_path_buf(),
            ..Default::default()
        };
        let consumers = Arc::new(ConsumerRegistry::new(Arc::clone(&engine)));
        let recordings = Arc::new(
            RecordingManager::new(
                Arc::clone(&engine),
                consumers,
                &config,
                tokio::runtime::Handle::current(),
            )
            .with_finalize_delay(Duration::ZERO),
        );
        (engine, recordings)
    }

    struct ScriptedSource {
        batches: Arc<Mutex<VecDeque<Vec<TriggerEvent>>>>,
    }

    impl TriggerSource for ScriptedSource {
        fn wait(&mut self, timeout: Duration) -> io::Result<Vec<TriggerEvent>> {
            if let Some(batch) = self.batches.lock().pop_front() {
                return Ok(batch);
            }
            std::thread::sleep(timeout);
            Ok(Vec::new())
        }
    }

    struct FailingSource;

    impl TriggerSource for FailingSource {
        fn wait(&mut self, _timeout: Duration) -> io::Result<Vec<TriggerEvent>> {
            Err(io::Error::other("watch removed"))
        }
    }

    #[test]
    fn test_parse_events() {
        let mut bytes = Vec::new();
        for (mask, name_len) in [(libc::IN_OPEN, 0u32), (libc::IN_MODIFY, 16), (libc::IN_CLOSE_WRITE, 0)] {
            bytes.extend_from_slice(&1i32.to_ne_bytes());
            bytes.extend_from_slice(&mask.to_ne_bytes());
            bytes.extend_from_slice(&0u32.to_ne_bytes());
            bytes.extend_from_slice(&name_len.to_ne_bytes());
            bytes.extend(std::iter::repeat_n(0u8, name_len as usize));
        }
        assert_eq!(parse_events(&bytes), [TriggerEvent::Opened, TriggerEvent::Modified]);
        assert!(parse_events(&bytes[..10]).is_empty());
    }

    #[test]
    fn test_inotify_source_reports_modification() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("hls/motion/motioncells-0.vamc");
        let mut source = InotifySource::open(&marker).unwrap();
        assert!(marker.exists());
        assert_eq!(source.path(), marker);

        assert!(source.wait(Duration::from_millis(10)).unwrap().is_empty());

        let mut file = std::fs::OpenOptions::new().append(true).open(&marker).unwrap();
        file.write_all(b"motion").unwrap();
        file.flush().unwrap();

        let events = source.wait(Duration::from_secs(2)).unwrap();
        assert!(events.contains(&TriggerEvent::Modified));
    }

    #[tokio::test]
    async fn test_dispatch_starts_one_background_recording() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, recordings) = manager(dir.path());
        let watcher = TriggerWatcher::new(Arc::clone(&recordings));

        assert!(watcher.dispatch(&[]).is_none());
        let first = watcher.dispatch(&[TriggerEvent::Modified]).unwrap();
        first.join().unwrap();
        assert!(recordings.is_active(RecordingKind::Background));

        assert!(watcher.dispatch(&[TriggerEvent::Opened]).is_none());
        assert_eq!(engine.pipelines_with_prefix("record-background").len(), 1);
        recordings.stop_all();
    }

    #[tokio::test]
    async fn test_watcher_loop_dispatches_and_shuts_down() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, recordings) = manager(dir.path());
        let batches = Arc::new(Mutex::new(VecDeque::from([
            vec![TriggerEvent::Modified],
            vec![TriggerEvent::Modified, TriggerEvent::Opened],
        ])));
        let source = ScriptedSource {
            batches: Arc::clone(&batches),
        };

        let handle = spawn_watcher_with_interval(source, Arc::clone(&recordings), Duration::from_millis(5)).unwrap();
        for _ in 0..400 {
            if batches.lock().is_empty() && recordings.state(RecordingKind::Background) == RecordingState::Recording {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(handle.is_running());
        handle.shutdown();

        assert_eq!(recordings.state(RecordingKind::Background), RecordingState::Recording);
        assert_eq!(engine.pipelines_with_prefix("record-background").len(), 1);
        recordings.stop_all();
    }

    #[tokio::test]
    async fn test_watcher_exits_on_source_error() {
        let dir = tempfile::tempdir().unwrap();
        let (_engine, recordings) = manager(dir.path());
        let handle = spawn_watcher(FailingSource, recordings).unwrap();
        for _ in 0..200 {
            if !handle.is_running() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(!handle.is_running());
        handle.shutdown();
    }
}
