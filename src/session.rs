//! Capture producer and processing consumer joined by the frame channel.

use log::{debug, error, info, warn};
use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Instant,
};

use crate::actions::{ActionSink, DesktopSink};
use crate::config::Profile;
use crate::frames::{FRAME_CAPACITY, FrameReceiver, FrameSender, Put, frame_channel};
use crate::pipeline::FrameProcessor;
use crate::source::{EmbeddedLandmarks, Fetch, FrameSource, LandmarkProvider, ReplaySource, SessionError};

pub struct Session {
    label: String,
    stop: Arc<AtomicBool>,
    producer: Option<JoinHandle<()>>,
    consumer: Option<JoinHandle<()>>,
}

impl Session {
    pub fn start<S, P, K>(
        label: impl Into<String>,
        source: S,
        provider: P,
        processor: FrameProcessor,
        sink: K,
    ) -> Result<Self, SessionError>
    where
        S: FrameSource + Send + 'static,
        S::Frame: Send + 'static,
        P: LandmarkProvider<Frame = S::Frame> + Send + 'static,
        K: ActionSink + Send + 'static,
    {
        let label = label.into();
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = frame_channel(FRAME_CAPACITY);

        let stop_flag = stop.clone();
        let consumer = thread::Builder::new()
            .name("handctl-process".into())
            .spawn(move || consume(rx, provider, processor, sink, stop_flag))
            .map_err(|e| SessionError::Spawn("processing", e))?;

        let stop_flag = stop.clone();
        let producer = thread::Builder::new()
            .name("handctl-capture".into())
            .spawn(move || produce(source, tx, stop_flag))
            .map_err(|e| SessionError::Spawn("capture", e))?;

        info!("session: tracking from {label}");
        Ok(Self {
            label,
            stop,
            producer: Some(producer),
            consumer: Some(consumer),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Still running: the consumer exits once the source is exhausted.
    pub fn is_tracking(&self) -> bool {
        self.consumer.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the producer, wait for both threads. Buffered frames are
    /// discarded by the consumer on its way out.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Release);
        for (name, handle) in [("capture", self.producer.take()), ("processing", self.consumer.take())] {
            if let Some(h) = handle {
                if h.join().is_err() {
                    error!("session: {name} thread panicked");
                }
            }
        }
        info!("session: stopped ({})", self.label);
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.producer.is_some() || self.consumer.is_some() {
            self.stop();
        }
    }
}

fn produce<S: FrameSource>(mut source: S, tx: FrameSender<S::Frame>, stop: Arc<AtomicBool>) {
    let mut dropped = 0u64;
    while !stop.load(Ordering::Acquire) {
        match source.read() {
            Ok(Fetch::Frame(frame)) => match tx.put(frame) {
                Put::Queued => {}
                Put::Dropped => dropped += 1,
                Put::Closed => break,
            },
            Ok(Fetch::Pending) => {}
            Ok(Fetch::Ended) => {
                info!("capture: source exhausted");
                break;
            }
            Err(e) => {
                error!("capture: read failed: {e}");
                break;
            }
        }
    }
    // dropping `tx` wakes the consumer; dropping `source` releases the device
    info!("capture: stopped, {dropped} frame(s) dropped under backpressure");
}

fn consume<P, K>(
    rx: FrameReceiver<P::Frame>,
    mut provider: P,
    mut processor: FrameProcessor,
    mut sink: K,
    stop: Arc<AtomicBool>,
) where
    P: LandmarkProvider,
    K: ActionSink,
{
    while let Some(frame) = rx.get() {
        if stop.load(Ordering::Acquire) {
            break;
        }
        let hands = match provider.detect(&frame) {
            Ok(hands) => hands,
            Err(e) => {
                warn!("landmarks: detection failed: {e}");
                continue;
            }
        };
        for cmd in processor.process(&hands, Instant::now(), &mut sink) {
            debug!("issued {cmd:?}");
        }
    }
    let discarded = rx.drain();
    if discarded > 0 {
        debug!("processing: discarded {discarded} buffered frame(s)");
    }
    processor.reset();
}

/// The start/stop surface the daemon exposes to front-ends.
#[derive(Default)]
pub struct SessionControl {
    active: Option<Session>,
}

impl SessionControl {
    /// Open `source` and start tracking. Fails fast if the source cannot be
    /// opened; the previous session, if any, must have ended.
    pub fn start_session(&mut self, source: &Path, profile: &Profile) -> Result<(), SessionError> {
        if self.is_tracking() {
            return Err(SessionError::AlreadyRunning);
        }
        self.stop_session();

        let replay = ReplaySource::open(source, profile.tracking.fps)?;
        let sink = DesktopSink::open_or_noop(profile.screen());
        let session = Session::start(
            source.display().to_string(),
            replay,
            EmbeddedLandmarks,
            FrameProcessor::new(profile),
            sink,
        )?;
        self.active = Some(session);
        Ok(())
    }

    /// Returns whether a session was torn down.
    pub fn stop_session(&mut self) -> bool {
        match self.active.take() {
            Some(mut s) => {
                s.stop();
                true
            }
            None => false,
        }
    }

    pub fn is_tracking(&self) -> bool {
        self.active.as_ref().is_some_and(Session::is_tracking)
    }

    pub fn source(&self) -> Option<&str> {
        self.active.as_ref().map(Session::label)
    }
}
