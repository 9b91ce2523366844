//! Rendezvous byte pipes between pipeline stages.
//!
//! Each `write` call hands one chunk to the reader and blocks until the reader
//! has taken it. Dropping the writer is end-of-stream for the reader; dropping
//! the reader makes further writes fail with [`io::ErrorKind::BrokenPipe`].
//!
//! A reader's deadline measures the liveness of its upstream stage, not of
//! the one pipe: writers tick a shared [`Progress`], and a reader watching it
//! keeps waiting while the upstream keeps writing anywhere or is busy.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::time::Duration;

/// Activity marker shared by the writers of an upstream stage.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    inner: Arc<ProgressState>,
}

#[derive(Debug, Default)]
struct ProgressState {
    ticks: AtomicU64,
    busy: AtomicUsize,
}

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that the stage moved data.
    pub fn tick(&self) {
        self.inner.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ticks(&self) -> u64 {
        self.inner.ticks.load(Ordering::Relaxed)
    }

    /// Mark the stage as working without writing until the guard drops.
    pub fn busy(&self) -> Busy {
        self.inner.busy.fetch_add(1, Ordering::Relaxed);
        Busy {
            progress: self.clone(),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Relaxed) > 0
    }
}

/// Guard returned by [`Progress::busy`].
#[derive(Debug)]
pub struct Busy {
    progress: Progress,
}

impl Drop for Busy {
    fn drop(&mut self) {
        self.progress.inner.busy.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Create a connected writer/reader pair.
pub fn pipe() -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::sync_channel(0);
    (
        PipeWriter { tx, progress: None },
        PipeReader {
            rx,
            chunk: Vec::new(),
            pos: 0,
            timeout: None,
            upstream: None,
            seen: 0,
        },
    )
}

/// Sending end of a pipe.
#[derive(Debug)]
pub struct PipeWriter {
    tx: SyncSender<Vec<u8>>,
    progress: Option<Progress>,
}

impl PipeWriter {
    /// Tick `progress` after every chunk the reader takes.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl Write for PipeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.tx
            .send(buf.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"))?;
        if let Some(progress) = &self.progress {
            progress.tick();
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Receiving end of a pipe.
#[derive(Debug)]
pub struct PipeReader {
    rx: Receiver<Vec<u8>>,
    chunk: Vec<u8>,
    pos: usize,
    timeout: Option<Duration>,
    upstream: Option<Progress>,
    seen: u64,
}

impl PipeReader {
    /// Bound every wait for the next chunk. An expired wait fails the read
    /// with [`io::ErrorKind::TimedOut`].
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Re-arm an expired wait while `upstream` ticks or is busy.
    pub fn watching(mut self, upstream: Progress) -> Self {
        self.seen = upstream.ticks();
        self.upstream = Some(upstream);
        self
    }

    fn upstream_alive(&mut self) -> bool {
        match &self.upstream {
            Some(upstream) => {
                let ticks = upstream.ticks();
                let advanced = ticks != self.seen;
                self.seen = ticks;
                advanced || upstream.is_busy()
            }
            None => false,
        }
    }

    /// Wait for the next non-empty chunk. Returns false at end-of-stream.
    fn fill(&mut self) -> io::Result<bool> {
        while self.pos >= self.chunk.len() {
            let next = match self.timeout {
                Some(timeout) => match self.rx.recv_timeout(timeout) {
                    Ok(chunk) => chunk,
                    Err(RecvTimeoutError::Timeout) => {
                        if self.upstream_alive() {
                            continue;
                        }
                        return Err(io::Error::new(
                            io::ErrorKind::TimedOut,
                            format!("no data within {:?}", timeout),
                        ));
                    }
                    Err(RecvTimeoutError::Disconnected) => return Ok(false),
                },
                None => match self.rx.recv() {
                    Ok(chunk) => chunk,
                    Err(_) => return Ok(false),
                },
            };
            self.chunk = next;
            self.pos = 0;
        }
        Ok(true)
    }
}

impl Read for PipeReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || !self.fill()? {
            return Ok(0);
        }
        let available = &self.chunk[self.pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_transfer_and_eof() {
        let (mut writer, mut reader) = pipe();
        let handle = thread::spawn(move || {
            writer.write_all(b"hello ").unwrap();
            writer.write_all(b"").unwrap();
            writer.write_all(b"world").unwrap();
        });

        let mut out = String::new();
        reader.read_to_string(&mut out).unwrap();
        handle.join().unwrap();
        assert_eq!(out, "hello world");
    }

    #[test]
    fn test_small_reads_split_chunks() {
        let (mut writer, mut reader) = pipe();
        let handle = thread::spawn(move || writer.write_all(b"abcdef").unwrap());

        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        handle.join().unwrap();
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_write_after_reader_dropped() {
        let (mut writer, reader) = pipe();
        drop(reader);
        let err = writer.write_all(b"x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_timeout_expires() {
        let (_writer, reader) = pipe();
        let mut reader = reader.with_timeout(Some(Duration::from_millis(20)));
        let mut buf = [0u8; 1];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_timeout_does_not_fire_on_eof() {
        let (writer, reader) = pipe();
        drop(writer);
        let mut reader = reader.with_timeout(Some(Duration::from_secs(5)));
        let mut out = Vec::new();
        assert_eq!(reader.read_to_end(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_watched_reader_waits_for_busy_upstream() {
        let progress = Progress::new();
        let (mut writer, reader) = pipe();
        let mut reader = reader
            .with_timeout(Some(Duration::from_millis(20)))
            .watching(progress.clone());

        let busy = progress.busy();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            writer.write_all(b"done").unwrap();
            drop(busy);
        });

        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        handle.join().unwrap();
        assert_eq!(out, b"done");
    }

    #[test]
    fn test_watched_reader_waits_while_sibling_pipe_moves() {
        let progress = Progress::new();
        let (quiet_writer, quiet_reader) = pipe();
        let (side_writer, mut side_reader) = pipe();
        let mut quiet_writer = quiet_writer.with_progress(progress.clone());
        let mut side_writer = side_writer.with_progress(progress.clone());
        let mut quiet_reader = quiet_reader
            .with_timeout(Some(Duration::from_millis(50)))
            .watching(progress);

        let drain = thread::spawn(move || {
            let mut sink = Vec::new();
            side_reader.read_to_end(&mut sink).unwrap();
            sink.len()
        });
        let writer = thread::spawn(move || {
            for _ in 0..15 {
                side_writer.write_all(b"block").unwrap();
                thread::sleep(Duration::from_millis(10));
            }
            drop(side_writer);
            quiet_writer.write_all(b"descriptor").unwrap();
        });

        let mut out = Vec::new();
        quiet_reader.read_to_end(&mut out).unwrap();
        writer.join().unwrap();
        assert_eq!(drain.join().unwrap(), 75);
        assert_eq!(out, b"descriptor");
    }

    #[test]
    fn test_watched_reader_times_out_when_upstream_idle() {
        let progress = Progress::new();
        let (_writer, reader) = pipe();
        let mut reader = reader
            .with_timeout(Some(Duration::from_millis(20)))
            .watching(progress);
        let mut buf = [0u8; 1];
        let err = reader.read(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
