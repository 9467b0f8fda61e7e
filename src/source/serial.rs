//! Serial line source
//!
//! Reads newline-terminated text from a serial port opened with the
//! `serialport` crate (8N1, no flow control, configured baud rate and read
//! timeout). A dedicated reader thread performs the blocking reads and
//! hands complete lines over a bounded channel, so
//! [`SerialLineSource::poll`] never blocks: it takes at most one line per
//! call.
//!
//! Each line is stripped of its `\r\n`, decoded as lossy UTF-8 and cut to
//! `max_packet_len` bytes (on a character boundary). Blank lines are
//! skipped. A read timeout on the port is an idle read, not an error.
//!
//! When the port cannot be opened, or the reader hits a read error (USB
//! adapter unplugged), the source reports itself unavailable and re-opens
//! the port on the next poll. A stream that ends cleanly stays closed:
//! every line it carried has already been delivered.

use crate::config::SerialConfig;
use crate::error::{BridgeError, Result, ResultExt};
use crate::source::PacketSource;
use crate::types::Packet;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Lines buffered between the reader thread and the poller
const LINE_BUFFER: usize = 256;

/// Cut a raw line down to a packet, or `None` if nothing is left
pub fn frame_line(raw: &[u8], max_len: usize) -> Option<String> {
    let mut end = raw.len();
    while end > 0 && matches!(raw[end - 1], b'\n' | b'\r') {
        end -= 1;
    }
    if end == 0 {
        return None;
    }

    let mut text = String::from_utf8_lossy(&raw[..end]).into_owned();
    if text.len() > max_len {
        let mut cut = max_len;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }

    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// What the reader thread hands to the source
#[derive(Debug)]
enum ReaderEvent {
    Line(String),
    /// Clean end of input
    Eof,
    /// Read error; the port may come back
    Failed(String),
}

/// A running reader thread
struct LineReader {
    events: Receiver<ReaderEvent>,
    stop: Arc<AtomicBool>,
}

impl LineReader {
    fn spawn<R>(reader: R, max_len: usize, label: String) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (tx, events) = bounded(LINE_BUFFER);
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        std::thread::Builder::new()
            .name("serial-reader".to_string())
            .spawn(move || read_lines(reader, max_len, &label, &tx, &thread_stop))
            .context("Failed to spawn serial reader thread")?;
        Ok(Self { events, stop })
    }
}

impl Drop for LineReader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

fn read_lines<R: Read>(
    reader: R,
    max_len: usize,
    label: &str,
    tx: &Sender<ReaderEvent>,
    stop: &AtomicBool,
) {
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::with_capacity(128);

    while !stop.load(Ordering::Relaxed) {
        // A timed-out read leaves its partial line in `raw`; keep it.
        match reader.read_until(b'\n', &mut raw) {
            Ok(0) => {
                tracing::debug!(device = label, "Serial input reached end of file");
                let _ = tx.send(ReaderEvent::Eof);
                return;
            }
            Ok(_) => {
                let line = frame_line(&raw, max_len);
                raw.clear();
                if let Some(line) = line {
                    if tx.send(ReaderEvent::Line(line)).is_err() {
                        // Source dropped.
                        return;
                    }
                }
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut
                ) => {}
            Err(e) => {
                tracing::warn!(device = label, "Serial read failed: {}", e);
                let _ = tx.send(ReaderEvent::Failed(e.to_string()));
                return;
            }
        }
    }
}

/// Transport source reading one line per poll
pub struct SerialLineSource {
    /// Port to (re)open; `None` for a source built from a reader
    port: Option<SerialConfig>,
    max_packet_len: usize,
    reader: Option<LineReader>,
    /// The input ended cleanly; nothing more will arrive
    ended: bool,
}

impl SerialLineSource {
    /// Read from the configured serial port, opened lazily on the first poll
    pub fn open(config: &SerialConfig) -> Self {
        Self {
            port: Some(config.clone()),
            max_packet_len: config.max_packet_len.max(1),
            reader: None,
            ended: false,
        }
    }

    /// Read from an already-open byte stream
    ///
    /// Once the stream ends the source stays unavailable.
    pub fn from_reader<R>(reader: R, max_packet_len: usize) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let max_packet_len = max_packet_len.max(1);
        let reader = LineReader::spawn(reader, max_packet_len, "reader".to_string())?;
        Ok(Self {
            port: None,
            max_packet_len,
            reader: Some(reader),
            ended: false,
        })
    }

    /// The port path, if this source owns one
    pub fn device(&self) -> Option<&Path> {
        self.port.as_ref().map(|p| p.device.as_path())
    }

    fn reopen(&mut self) -> Result<()> {
        let Some(config) = self.port.as_ref() else {
            return Err(BridgeError::SourceUnavailable(
                "serial input closed".to_string(),
            ));
        };
        let device = config.device.to_string_lossy().into_owned();

        let port = serialport::new(device.as_str(), config.baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .timeout(config.read_timeout())
            .open()
            .map_err(|e| {
                BridgeError::SourceUnavailable(format!("cannot open {}: {}", device, e))
            })?;

        tracing::info!(device = %device, baud = config.baud_rate, "Serial port opened");
        self.reader = Some(LineReader::spawn(port, self.max_packet_len, device)?);
        Ok(())
    }
}

impl PacketSource for SerialLineSource {
    fn name(&self) -> &str {
        "serial"
    }

    fn poll(&mut self) -> Result<Vec<Packet>> {
        if self.ended {
            return Err(BridgeError::SourceUnavailable(
                "serial input ended".to_string(),
            ));
        }
        if self.reader.is_none() {
            self.reopen()?;
        }

        let Some(reader) = self.reader.as_ref() else {
            return Ok(Vec::new());
        };

        match reader.events.try_recv() {
            Ok(ReaderEvent::Line(line)) => Ok(vec![Packet::new(line)]),
            Err(TryRecvError::Empty) => Ok(Vec::new()),
            Ok(ReaderEvent::Eof) => {
                self.reader = None;
                self.ended = true;
                Err(BridgeError::SourceUnavailable(
                    "serial input ended".to_string(),
                ))
            }
            Ok(ReaderEvent::Failed(message)) => {
                self.reader = None;
                Err(BridgeError::SourceUnavailable(format!(
                    "serial port lost: {}",
                    message
                )))
            }
            Err(TryRecvError::Disconnected) => {
                self.reader = None;
                Err(BridgeError::SourceUnavailable(
                    "serial reader stopped".to_string(),
                ))
            }
        }
    }

    fn close(&mut self) {
        // Dropping the reader stops its thread after the current read.
        self.reader = None;
    }
}
