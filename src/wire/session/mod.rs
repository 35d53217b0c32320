use std::fmt;
use std::io::{self, BufRead, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::queue::{Payload, SignalQueue};
use crate::wire::codec::{self, FIELD_DELIMITER, FRAME_TERMINATOR, MAX_FRAME_SIZE_BYTES};
use crate::wire::signal::SignalState;

#[derive(Debug, PartialEq, Eq)]
pub enum FrameRead {
    /// Raw bytes up to and including the first terminator, or 32 bytes if none came.
    Frame(Vec<u8>),
    /// Peer closed the stream on a frame boundary.
    Closed,
}

/// Reads at most one frame's worth of bytes. Validation is left to the caller.
pub fn read_frame<R: BufRead>(reader: &mut R) -> io::Result<FrameRead> {
    let mut buffer = Vec::with_capacity(MAX_FRAME_SIZE_BYTES);
    let read = reader
        .by_ref()
        .take(MAX_FRAME_SIZE_BYTES as u64)
        .read_until(FRAME_TERMINATOR, &mut buffer)?;

    if read == 0 {
        return Ok(FrameRead::Closed);
    }
    Ok(FrameRead::Frame(buffer))
}

#[derive(Debug, Default)]
pub struct ReaderReport {
    pub delivered: usize,
    pub send_error: Option<io::Error>,
}

/// Snapshot drain: sends queued payloads until the queue is observed empty. Never waits for
/// new pushes.
pub fn run_reader<W: Write>(
    queue: &SignalQueue,
    quit: &AtomicBool,
    writer: &mut W,
) -> ReaderReport {
    let mut report = ReaderReport::default();

    while !quit.load(Ordering::SeqCst) && !queue.is_empty() {
        // Another reader may have taken the last entry since the emptiness check.
        let Some(payload) = queue.try_pop() else {
            break;
        };
        if let Err(error) = writer
            .write_all(payload.as_bytes())
            .and_then(|()| writer.flush())
        {
            report.send_error = Some(error);
            break;
        }
        report.delivered += 1;
    }

    report
}

#[derive(Debug)]
pub enum WriterEnd {
    PeerClosed,
    InvalidFrame { size: usize },
    ReadFailed(io::Error),
    Quit,
}

impl fmt::Display for WriterEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed the connection"),
            Self::InvalidFrame { size } => write!(f, "invalid frame of {size} bytes"),
            Self::ReadFailed(error) => write!(f, "read failed: {error}"),
            Self::Quit => write!(f, "server is shutting down"),
        }
    }
}

#[derive(Debug)]
pub struct WriterReport {
    pub accepted: usize,
    pub dropped: usize,
    pub last_state: Option<SignalState>,
    pub end: WriterEnd,
}

/// State carried by a writer frame: the third field of a full `<role>|<error>|<state>` frame,
/// or the leading byte of a bare payload.
fn frame_state(frame: &[u8]) -> Option<SignalState> {
    if frame.contains(&FIELD_DELIMITER) {
        return codec::decode(frame).ok().map(|message| message.state);
    }
    frame
        .first()
        .copied()
        .filter(|byte| *byte != FRAME_TERMINATOR)
        .map(SignalState::from_wire)
}

/// Enqueues every frame the writer sends. A full queue drops the frame silently; a malformed
/// frame ends the session because the stream can no longer be framed.
pub fn run_writer<R: BufRead>(
    queue: &SignalQueue,
    quit: &AtomicBool,
    reader: &mut R,
) -> WriterReport {
    let mut accepted = 0;
    let mut dropped = 0;
    let mut last_state = None;

    let end = loop {
        if quit.load(Ordering::SeqCst) {
            break WriterEnd::Quit;
        }

        match read_frame(reader) {
            Ok(FrameRead::Frame(frame)) => match Payload::new(&frame) {
                Ok(payload) if codec::is_valid_frame(&frame) => {
                    if queue.try_push(payload) {
                        accepted += 1;
                        last_state = frame_state(&frame);
                    } else {
                        dropped += 1;
                    }
                }
                _ => break WriterEnd::InvalidFrame { size: frame.len() },
            },
            Ok(FrameRead::Closed) => break WriterEnd::PeerClosed,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => break WriterEnd::ReadFailed(error),
        }
    };

    WriterReport {
        accepted,
        dropped,
        last_state,
        end,
    }
}
