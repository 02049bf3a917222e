//! Background-acquired frame source.
//!
//! `FrameSource` runs one acquisition thread per device. The thread and `read()`
//! share a single `Mutex<Option<Frame>>` slot:
//! - the thread overwrites the slot on every successful capture
//! - `read()` clones out of the slot, so callers never alias the producer's buffer
//!
//! The producer never waits for a consumer and there is no queue; unread frames are
//! dropped. Stopping is cooperative: the thread checks the running flag once per
//! capture, so the worst-case stop latency is one device read.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use super::{open_device, CaptureDevice, CaptureFormat, CaptureSettings};
use crate::error::{Error, Result};
use crate::frame::Frame;

/// Upper bound on how long `stop()` waits for the acquisition thread.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Pause after a failed device read before the next attempt.
const READ_FAILURE_BACKOFF: Duration = Duration::from_millis(100);

const STOP_POLL: Duration = Duration::from_millis(5);

type DeviceSlot = Arc<Mutex<Option<Box<dyn CaptureDevice>>>>;

/// Counters for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub read_failures: u64,
    pub reconnects: u64,
    pub source: String,
}

#[derive(Default)]
struct Counters {
    frames_captured: AtomicU64,
    read_failures: AtomicU64,
    reconnects: AtomicU64,
}

/// Frame source with a background acquisition thread.
pub struct FrameSource {
    description: String,
    format: CaptureFormat,
    reconnect_after: u32,
    device: DeviceSlot,
    latest: Arc<Mutex<Option<Frame>>>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    worker: Option<JoinHandle<()>>,
    released: bool,
}

impl FrameSource {
    /// Open a device. `width`, `height` and `target_fps` are hints; read the
    /// negotiated values back with [`FrameSource::format`].
    pub fn open(source: &str, width: u32, height: u32, target_fps: u32) -> Result<Self> {
        Self::open_with(&CaptureSettings {
            source: source.to_string(),
            width,
            height,
            target_fps,
            ..CaptureSettings::default()
        })
    }

    pub fn open_with(settings: &CaptureSettings) -> Result<Self> {
        let device = open_device(settings)?;
        Ok(Self::with_device(device, settings.reconnect_after))
    }

    /// Wrap an already opened device.
    pub fn with_device(device: Box<dyn CaptureDevice>, reconnect_after: u32) -> Self {
        Self {
            description: device.describe(),
            format: device.format(),
            reconnect_after,
            device: Arc::new(Mutex::new(Some(device))),
            latest: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(Counters::default()),
            worker: None,
            released: false,
        }
    }

    /// Negotiated capture format.
    pub fn format(&self) -> CaptureFormat {
        self.format
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }

    /// Spawn the acquisition thread.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Err(Error::AlreadyStarted);
        }
        if self.released {
            return Err(Error::device(&self.description, "device already released"));
        }

        // Fresh flag per run, so a thread detached by a timed-out stop never
        // resumes alongside its replacement.
        self.running = Arc::new(AtomicBool::new(true));
        let loop_state = AcquisitionLoop {
            device: self.device.clone(),
            latest: self.latest.clone(),
            running: self.running.clone(),
            counters: self.counters.clone(),
            reconnect_after: self.reconnect_after,
            description: self.description.clone(),
        };

        let join = std::thread::Builder::new()
            .name("fallwatch-capture".to_string())
            .spawn(move || loop_state.run())
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                Error::device(&self.description, format!("spawn capture thread: {}", e))
            })?;

        self.worker = Some(join);
        log::info!("FrameSource: acquisition started on {}", self.description);
        Ok(())
    }

    /// Copy of the most recent frame, or `None` if nothing was captured yet or the
    /// source was released.
    pub fn read(&self) -> Option<Frame> {
        lock(&self.latest).clone()
    }

    /// Signal the acquisition thread and wait up to [`STOP_TIMEOUT`] for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let Some(worker) = self.worker.take() else {
            return;
        };
        let deadline = Instant::now() + STOP_TIMEOUT;
        while !worker.is_finished() {
            if Instant::now() >= deadline {
                log::warn!(
                    "FrameSource: acquisition thread on {} did not exit within {:?}; detaching",
                    self.description,
                    STOP_TIMEOUT
                );
                return;
            }
            std::thread::sleep(STOP_POLL);
        }
        if worker.join().is_err() {
            log::error!("FrameSource: acquisition thread panicked");
        }
        log::info!("FrameSource: acquisition stopped on {}", self.description);
    }

    /// Stop acquisition and release the device. Safe to call more than once.
    pub fn release(&mut self) {
        self.stop();
        // Taking the device waits out a read still running on a detached thread.
        if let Some(mut device) = lock(&self.device).take() {
            device.release();
            log::info!("FrameSource: released {}", self.description);
        }
        lock(&self.latest).take();
        self.released = true;
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.counters.frames_captured.load(Ordering::Relaxed),
            read_failures: self.counters.read_failures.load(Ordering::Relaxed),
            reconnects: self.counters.reconnects.load(Ordering::Relaxed),
            source: self.description.clone(),
        }
    }

    /// True while running and the latest frame is younger than the health grace.
    pub fn is_healthy(&self) -> bool {
        if !self.is_running() {
            return false;
        }
        let Some(captured_at) = lock(&self.latest).as_ref().map(|f| f.captured_at) else {
            return true;
        };
        SystemTime::now()
            .duration_since(captured_at)
            .map(|age| age <= self.health_grace())
            .unwrap_or(true)
    }

    fn health_grace(&self) -> Duration {
        let base_ms = if self.format.fps == 0 {
            2_000
        } else {
            (1000 / self.format.fps).saturating_mul(6)
        };
        Duration::from_millis(base_ms.max(2_000) as u64)
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.release();
    }
}

struct AcquisitionLoop {
    device: DeviceSlot,
    latest: Arc<Mutex<Option<Frame>>>,
    running: Arc<AtomicBool>,
    counters: Arc<Counters>,
    reconnect_after: u32,
    description: String,
}

impl AcquisitionLoop {
    fn run(self) {
        let mut consecutive_failures = 0u32;
        let mut last_failure_log: Option<Instant> = None;

        while self.running.load(Ordering::SeqCst) {
            let result = {
                let mut device = lock(&self.device);
                match device.as_mut() {
                    Some(device) => device.read_frame(),
                    None => break,
                }
            };

            match result {
                Ok(frame) => {
                    consecutive_failures = 0;
                    // Checked under the slot lock: once stop() clears the flag, a read
                    // that was in flight is dropped instead of outliving release().
                    let mut slot = lock(&self.latest);
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    *slot = Some(frame);
                    drop(slot);
                    self.counters.frames_captured.fetch_add(1, Ordering::Relaxed);
                }
                Err(err) => {
                    consecutive_failures += 1;
                    self.counters.read_failures.fetch_add(1, Ordering::Relaxed);
                    if last_failure_log.map_or(true, |t| t.elapsed() >= Duration::from_secs(5)) {
                        log::debug!("FrameSource: read failed on {}: {:#}", self.description, err);
                        last_failure_log = Some(Instant::now());
                    }

                    if self.reconnect_after > 0 && consecutive_failures >= self.reconnect_after {
                        consecutive_failures = 0;
                        self.reconnect();
                    } else {
                        std::thread::sleep(READ_FAILURE_BACKOFF);
                    }
                }
            }
        }
    }

    fn reconnect(&self) {
        log::warn!("FrameSource: reopening {}", self.description);
        let mut device = lock(&self.device);
        let Some(device) = device.as_mut() else {
            return;
        };
        self.counters.reconnects.fetch_add(1, Ordering::Relaxed);
        if let Err(err) = device.reopen() {
            log::warn!("FrameSource: reopen of {} failed: {:#}", self.description, err);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Every write to a slot is a single assignment, so a poisoned guard still holds
    // a complete value.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
