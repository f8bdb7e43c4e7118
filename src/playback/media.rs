use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

#[derive(Default)]
struct MediaState {
    data: Vec<u8>,
    closed: bool,
}

type Shared = Arc<(Mutex<MediaState>, Condvar)>;

fn lock(shared: &Shared) -> MutexGuard<'_, MediaState> {
    // A panicking writer leaves the bytes intact
    shared.0.lock().unwrap_or_else(|e| e.into_inner())
}

/// Writer half of one turn's growing media buffer
pub struct MediaStream {
    shared: Shared,
}

/// Reader half: blocks until more bytes are appended or the stream is closed
pub struct MediaReader {
    shared: Shared,
    pos: u64,
}

impl MediaStream {
    pub fn new() -> (Self, MediaReader) {
        let shared: Shared = Arc::default();
        let reader = MediaReader {
            shared: shared.clone(),
            pos: 0,
        };
        (Self { shared }, reader)
    }

    pub fn push(&self, bytes: &[u8]) {
        lock(&self.shared).data.extend_from_slice(bytes);
        self.shared.1.notify_all();
    }

    /// No more bytes will arrive; readers see end of file once caught up
    pub fn close(&self) {
        lock(&self.shared).closed = true;
        self.shared.1.notify_all();
    }
}

impl Drop for MediaStream {
    fn drop(&mut self) {
        self.close();
    }
}

impl Read for MediaReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let mut state = lock(&self.shared);
        while self.pos >= state.data.len() as u64 && !state.closed {
            state = self
                .shared
                .1
                .wait(state)
                .unwrap_or_else(|e| e.into_inner());
        }

        let start = self.pos.min(state.data.len() as u64) as usize;
        let available = &state.data[start..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for MediaReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
            SeekFrom::End(delta) => {
                let state = lock(&self.shared);
                if !state.closed {
                    return Err(io::Error::new(
                        io::ErrorKind::Unsupported,
                        "media length is not known until the stream ends",
                    ));
                }
                (state.data.len() as u64).checked_add_signed(delta)
            }
        };

        let target = target.ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "seek before start of media")
        })?;
        self.pos = target;
        Ok(target)
    }
}
