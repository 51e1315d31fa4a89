//! Background thread loader for local assets (native only)
//!
//! This module provides a `NativeFileLoader` that reads bundled assets on a
//! background thread, reporting byte-level progress and verifying that the
//! bytes decode as an image before reporting completion. Remote URLs are not
//! fetched; they fail immediately.

use std::collections::VecDeque;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread::{self, JoinHandle};

use super::types::{LoadEvent, RequestId, ResourceLoader};
use crate::constants::NATIVE_READ_CHUNK;

/// Message sent to the loader thread.
enum ThreadMessage {
    /// Load the file at `path`
    Load { id: RequestId, path: PathBuf },
    /// Shutdown the thread
    Shutdown,
}

/// Map a resource id onto a file below `asset_root`.
///
/// Query strings and fragments are ignored. `file://` URLs are taken as
/// absolute paths. Returns `None` for other schemes.
pub fn resolve_local_path(asset_root: &Path, resource_id: &str) -> Option<PathBuf> {
    let without_fragment = resource_id.split('#').next().unwrap_or(resource_id);
    let path = without_fragment
        .split('?')
        .next()
        .unwrap_or(without_fragment);

    if let Some(absolute) = path.strip_prefix("file://") {
        return Some(PathBuf::from(absolute));
    }
    if path.contains("://") {
        return None;
    }

    let relative = path
        .strip_prefix("@/")
        .or_else(|| path.strip_prefix("./"))
        .unwrap_or(path)
        .trim_start_matches('/');
    Some(asset_root.join(relative))
}

/// Loads local assets on a background thread.
///
/// API mirrors any other [`ResourceLoader`]: `begin` queues work, `poll_event`
/// collects results without blocking.
pub struct NativeFileLoader {
    /// Root directory bundled asset paths resolve against
    asset_root: PathBuf,
    /// Sender for requests to the background thread
    request_tx: Sender<ThreadMessage>,
    /// Receiver for events from the background thread
    event_rx: Receiver<(RequestId, LoadEvent)>,
    /// Failures decided on the calling thread (unsupported scheme, dead thread)
    local_events: VecDeque<(RequestId, LoadEvent)>,
    /// Handle to the background thread (for joining on drop)
    thread_handle: Option<JoinHandle<()>>,
}

impl NativeFileLoader {
    /// Spawn a loader thread resolving paths against `asset_root`.
    pub fn spawn(asset_root: impl Into<PathBuf>) -> std::io::Result<Self> {
        let (request_tx, request_rx) = mpsc::channel::<ThreadMessage>();
        let (event_tx, event_rx) = mpsc::channel::<(RequestId, LoadEvent)>();

        let thread_handle = thread::Builder::new()
            .name("image-preloader".to_string())
            .spawn(move || {
                log::info!("Native preload thread started");
                Self::thread_loop(request_rx, event_tx);
                log::info!("Native preload thread exiting");
            })?;

        Ok(Self {
            asset_root: asset_root.into(),
            request_tx,
            event_rx,
            local_events: VecDeque::new(),
            thread_handle: Some(thread_handle),
        })
    }

    pub fn asset_root(&self) -> &Path {
        &self.asset_root
    }

    /// Background thread main loop.
    fn thread_loop(request_rx: Receiver<ThreadMessage>, event_tx: Sender<(RequestId, LoadEvent)>) {
        loop {
            match request_rx.recv() {
                Ok(ThreadMessage::Load { id, path }) => {
                    let result = Self::load_file(id, &path, &event_tx);
                    let event = match result {
                        Ok(()) => LoadEvent::Completed,
                        Err(reason) => LoadEvent::Failed(reason),
                    };
                    if event_tx.send((id, event)).is_err() {
                        log::warn!("Event channel closed, preload thread exiting");
                        break;
                    }
                }
                Ok(ThreadMessage::Shutdown) => {
                    log::debug!("Received shutdown signal");
                    break;
                }
                Err(_) => {
                    log::debug!("Request channel closed, preload thread exiting");
                    break;
                }
            }
        }
    }

    /// Read the file in chunks, reporting progress, then check it decodes.
    fn load_file(
        id: RequestId,
        path: &Path,
        event_tx: &Sender<(RequestId, LoadEvent)>,
    ) -> Result<(), String> {
        let mut file = File::open(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        let total = file.metadata().ok().map(|m| m.len());

        let mut bytes = Vec::with_capacity(total.unwrap_or(0) as usize);
        let mut chunk = vec![0u8; NATIVE_READ_CHUNK];
        loop {
            let read = file
                .read(&mut chunk)
                .map_err(|e| format!("{}: {}", path.display(), e))?;
            if read == 0 {
                break;
            }
            bytes.extend_from_slice(&chunk[..read]);
            let progress = LoadEvent::Progress {
                loaded: bytes.len() as u64,
                total,
            };
            // Progress is best-effort; a closed channel is caught on the final send
            let _ = event_tx.send((id, progress));
        }

        image::load_from_memory(&bytes)
            .map_err(|e| format!("decode error for {}: {}", path.display(), e))?;
        log::debug!("Loaded {:?} ({} bytes)", path, bytes.len());
        Ok(())
    }
}

impl ResourceLoader for NativeFileLoader {
    fn begin(&mut self, id: RequestId, url: &str) {
        let Some(path) = resolve_local_path(&self.asset_root, url) else {
            log::warn!("Unsupported resource for native loader: {}", url);
            self.local_events.push_back((
                id,
                LoadEvent::Failed(format!("unsupported resource: {}", url)),
            ));
            return;
        };

        if self
            .request_tx
            .send(ThreadMessage::Load { id, path })
            .is_err()
        {
            log::error!("Preload thread is gone, failing request {}", id);
            self.local_events.push_back((
                id,
                LoadEvent::Failed("loader thread stopped".to_string()),
            ));
        }
    }

    fn poll_event(&mut self) -> Option<(RequestId, LoadEvent)> {
        if let Some(event) = self.local_events.pop_front() {
            return Some(event);
        }
        match self.event_rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => None,
        }
    }
}

impl Drop for NativeFileLoader {
    fn drop(&mut self) {
        let _ = self.request_tx.send(ThreadMessage::Shutdown);
        if let Some(handle) = self.thread_handle.take() {
            if handle.join().is_err() {
                log::error!("Native preload thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for_terminal(loader: &mut NativeFileLoader) -> Vec<(RequestId, LoadEvent)> {
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut events = Vec::new();
        while Instant::now() < deadline {
            match loader.poll_event() {
                Some(event) => {
                    let done = !matches!(event.1, LoadEvent::Progress { .. });
                    events.push(event);
                    if done {
                        return events;
                    }
                }
                None => std::thread::sleep(Duration::from_millis(5)),
            }
        }
        panic!("loader did not finish in time: {:?}", events);
    }

    fn temp_root(name: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "gallery-loader-{}-{}",
            name,
            std::process::id()
        ));
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    #[test]
    fn test_resolve_local_path() {
        let root = Path::new("/srv/assets");
        assert_eq!(
            resolve_local_path(root, "/img/hero.png?q=95"),
            Some(PathBuf::from("/srv/assets/img/hero.png"))
        );
        assert_eq!(
            resolve_local_path(root, "@/img/hero.png"),
            Some(PathBuf::from("/srv/assets/img/hero.png"))
        );
        assert_eq!(
            resolve_local_path(root, "./hero.png#x"),
            Some(PathBuf::from("/srv/assets/hero.png"))
        );
        assert_eq!(
            resolve_local_path(root, "file:///tmp/a.png"),
            Some(PathBuf::from("/tmp/a.png"))
        );
        assert_eq!(resolve_local_path(root, "https://cdn.example/a.png"), None);
    }

    #[test]
    fn test_loads_and_decodes_png() {
        let root = temp_root("ok");
        let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([255, 0, 0, 255]));
        img.save(root.join("red.png")).unwrap();

        let mut loader = NativeFileLoader::spawn(&root).unwrap();
        loader.begin(7, "/red.png");
        let events = wait_for_terminal(&mut loader);

        assert!(events.iter().all(|(id, _)| *id == 7));
        assert_eq!(events.last().unwrap().1, LoadEvent::Completed);
        assert!(
            events
                .iter()
                .any(|(_, e)| matches!(e, LoadEvent::Progress { total: Some(_), .. }))
        );
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        let root = temp_root("garbage");
        std::fs::write(root.join("broken.png"), b"definitely not an image").unwrap();

        let mut loader = NativeFileLoader::spawn(&root).unwrap();
        loader.begin(1, "/broken.png");
        let events = wait_for_terminal(&mut loader);
        assert!(matches!(events.last().unwrap().1, LoadEvent::Failed(_)));
    }

    #[test]
    fn test_missing_file_and_remote_fail() {
        let root = temp_root("missing");
        let mut loader = NativeFileLoader::spawn(&root).unwrap();

        loader.begin(1, "https://cdn.example/a.png");
        assert!(matches!(
            loader.poll_event(),
            Some((1, LoadEvent::Failed(_)))
        ));

        loader.begin(2, "/nope.png");
        let events = wait_for_terminal(&mut loader);
        assert!(matches!(events.last().unwrap(), (2, LoadEvent::Failed(_))));
    }
}
