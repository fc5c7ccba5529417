//! Frame sources and landmark providers.
//!
//! The landmark model runs out of process and writes one JSON object per
//! frame to a file or FIFO; `ReplaySource` reads that stream at camera pace
//! and `EmbeddedLandmarks` hands the decoded hands to the pipeline.

use anyhow::Result;
use log::{debug, warn};
use serde::Deserialize;
use std::{
    fs::{self, File},
    io::{self, BufRead, BufReader},
    os::unix::fs::FileTypeExt,
    path::Path,
    sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender},
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;

use crate::landmarks::HandObservation;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("frame source unavailable: {0}")]
    SourceUnavailable(String),
    #[error("a tracking session is already running")]
    AlreadyRunning,
    #[error("failed to spawn {0} thread: {1}")]
    Spawn(&'static str, std::io::Error),
}

/// Outcome of one `FrameSource::read`.
#[derive(Debug, PartialEq)]
pub enum Fetch<T> {
    Frame(T),
    /// Nothing arrived within the source's wait; ask again.
    Pending,
    Ended,
}

/// Yields frames on demand. `read` must return `Pending` within a bounded
/// wait so the caller can notice a stop request.
pub trait FrameSource {
    type Frame;
    fn read(&mut self) -> Result<Fetch<Self::Frame>>;
}

/// Turns one frame into zero or more hands.
pub trait LandmarkProvider {
    type Frame;
    fn detect(&mut self, frame: &Self::Frame) -> Result<Vec<HandObservation>>;
}

/// One line of a landmark stream.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RecordedFrame {
    #[serde(skip)]
    pub seq: u64,
    #[serde(default)]
    pub hands: Vec<HandObservation>,
}

/// Longest a `read` waits for the next line before reporting `Pending`.
const IDLE_WAIT: Duration = Duration::from_millis(50);
/// Lines read ahead of the pacing loop.
const READ_AHEAD: usize = 16;

/// Paced JSON-lines landmark stream.
///
/// Lines come from a detached reader thread, so a FIFO whose writer is
/// absent or idle never blocks the caller. The reader exits at end of
/// stream or on its next line after the source is dropped.
pub struct ReplaySource {
    lines: Receiver<io::Result<String>>,
    interval: Duration,
    next_due: Option<Instant>,
    seq: u64,
}

impl ReplaySource {
    /// Regular files are opened here so a bad path fails fast. A FIFO is
    /// opened by the reader thread: opening one blocks until a writer shows up.
    pub fn open(path: &Path, fps: u32) -> Result<Self, SessionError> {
        let unavailable = |e: io::Error| SessionError::SourceUnavailable(format!("{}: {e}", path.display()));
        let meta = fs::metadata(path).map_err(unavailable)?;

        if meta.file_type().is_fifo() {
            let path = path.to_path_buf();
            debug!("replay: {} is a FIFO, waiting for a writer in the background", path.display());
            return Self::spawn(fps, move |tx| match File::open(&path) {
                Ok(file) => pump(BufReader::new(file), tx),
                Err(e) => {
                    let _ = tx.send(Err(e));
                }
            });
        }

        let file = File::open(path).map_err(unavailable)?;
        Self::new(BufReader::new(file), fps)
    }

    pub fn new<R: BufRead + Send + 'static>(reader: R, fps: u32) -> Result<Self, SessionError> {
        Self::spawn(fps, move |tx| pump(reader, tx))
    }

    fn spawn<F>(fps: u32, body: F) -> Result<Self, SessionError>
    where
        F: FnOnce(SyncSender<io::Result<String>>) + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(READ_AHEAD);
        thread::Builder::new()
            .name("handctl-reader".into())
            .spawn(move || body(tx))
            .map_err(|e| SessionError::Spawn("reader", e))?;
        Ok(Self {
            lines: rx,
            interval: Duration::from_secs(1) / fps.max(1),
            next_due: None,
            seq: 0,
        })
    }

    fn pace(&mut self) {
        let now = Instant::now();
        let due = self.next_due.unwrap_or(now);
        if due > now {
            thread::sleep(due - now);
            self.next_due = Some(due + self.interval);
        } else {
            // running behind: don't try to catch up
            self.next_due = Some(now + self.interval);
        }
    }
}

fn pump<R: BufRead>(mut reader: R, tx: SyncSender<io::Result<String>>) {
    loop {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => return,
            Ok(_) => {
                if tx.send(Ok(line)).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(Err(e));
                return;
            }
        }
    }
}

impl FrameSource for ReplaySource {
    type Frame = RecordedFrame;

    fn read(&mut self) -> Result<Fetch<RecordedFrame>> {
        loop {
            let line = match self.lines.recv_timeout(IDLE_WAIT) {
                Ok(line) => line?,
                Err(RecvTimeoutError::Timeout) => return Ok(Fetch::Pending),
                Err(RecvTimeoutError::Disconnected) => return Ok(Fetch::Ended),
            };
            let text = line.trim();
            if text.is_empty() {
                continue;
            }
            self.seq += 1;
            match serde_json::from_str::<RecordedFrame>(text) {
                Ok(mut frame) => {
                    frame.seq = self.seq;
                    self.pace();
                    return Ok(Fetch::Frame(frame));
                }
                Err(e) => warn!("replay: skipping line {}: {e}", self.seq),
            }
        }
    }
}

/// Provider for streams that already carry landmarks.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedLandmarks;

impl LandmarkProvider for EmbeddedLandmarks {
    type Frame = RecordedFrame;

    fn detect(&mut self, frame: &RecordedFrame) -> Result<Vec<HandObservation>> {
        debug!("frame {}: {} hand(s)", frame.seq, frame.hands.len());
        Ok(frame.hands.clone())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmarks::{Handedness, LANDMARK_COUNT};
    use std::fs::OpenOptions;
    use std::io::{Cursor, Write};

    fn hand_line(handedness: &str) -> String {
        let pts = vec!["[0.5,0.5,0.0]"; LANDMARK_COUNT].join(",");
        format!(r#"{{"hands":[{{"handedness":"{handedness}","confidence":0.8,"landmarks":[{pts}]}}]}}"#)
    }

    /// Next frame, or `None` at end of stream.
    fn next(src: &mut ReplaySource) -> Option<RecordedFrame> {
        loop {
            match src.read().unwrap() {
                Fetch::Frame(f) => return Some(f),
                Fetch::Pending => continue,
                Fetch::Ended => return None,
            }
        }
    }

    #[test]
    fn test_replay_reads_frames_in_order_and_skips_junk() {
        let data = format!("{}\n\nnot json\n{{\"hands\":[]}}\n{}\n", hand_line("Left"), hand_line("Right"));
        let mut src = ReplaySource::new(Cursor::new(data), 1000).unwrap();
        let mut provider = EmbeddedLandmarks;

        let f1 = next(&mut src).unwrap();
        let hands = provider.detect(&f1).unwrap();
        assert_eq!(hands[0].handedness, Handedness::Left);
        assert_eq!(hands[0].confidence, 0.8);

        let f2 = next(&mut src).unwrap();
        assert!(f2.hands.is_empty());
        assert!(f2.seq > f1.seq);

        let f3 = next(&mut src).unwrap();
        assert_eq!(f3.hands[0].handedness, Handedness::Right);

        assert!(next(&mut src).is_none());
    }

    #[test]
    fn test_missing_file_is_source_unavailable() {
        let err = ReplaySource::open(Path::new("/nonexistent/handctl/stream.jsonl"), 30)
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::SourceUnavailable(_)), "{err}");
    }

    #[test]
    fn test_replay_paces_to_fps() {
        let data = "{}\n{}\n{}\n";
        let mut src = ReplaySource::new(Cursor::new(data), 50).unwrap();
        let start = Instant::now();
        while next(&mut src).is_some() {}
        // first frame is immediate, the next two wait 20ms each
        assert!(start.elapsed() >= Duration::from_millis(35), "{:?}", start.elapsed());
    }

    #[test]
    fn test_fifo_without_writer_opens_immediately_and_stays_pending() {
        let path = testing::fifo("no-writer");
        let start = Instant::now();
        let mut src = ReplaySource::open(&path, 30).unwrap();
        assert_eq!(src.read().unwrap(), Fetch::Pending);
        assert!(start.elapsed() < Duration::from_secs(1), "{:?}", start.elapsed());

        // connect a writer so the reader thread can finish
        let mut w = OpenOptions::new().write(true).open(&path).unwrap();
        writeln!(w, "{}", hand_line("Left")).unwrap();
        drop(w);
        let frame = next(&mut src).unwrap();
        assert_eq!(frame.hands.len(), 1);
        assert!(next(&mut src).is_none());
    }
}
