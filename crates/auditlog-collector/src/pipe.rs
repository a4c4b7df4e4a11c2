//! Chunked pipe framing.
//!
//! POSIX guarantees that a `write` of at most `PIPE_BUF` bytes to a pipe
//! is atomic. The protocol rides on that: a producer splits each record
//! into chunks no larger than [`PIPE_CHUNK_SIZE`] and emits every chunk
//! with exactly one write call, so chunks from different producers can
//! interleave on the pipe but never tear.
//!
//! ```text
//! chunk: ┌──────┬─────────┬─────────┬─────────┬──────────────┐
//!        │ \0\0 │ len:u16 │ pid:u32 │ is_last │ payload      │
//!        │ 2 B  │         │         │ 't'/'f' │ ≤ MAX_PAYLOAD│
//!        └──────┴─────────┴─────────┴─────────┴──────────────┘
//! ```
//!
//! The leading double NUL is the framing sentinel; `is_last` uses non-NUL
//! bytes to make a false sentinel less likely inside the header itself.
//! Anything on the pipe that does not parse as a chunk — stray stderr
//! from third-party code sharing the fd — is passed through verbatim up
//! to the next NUL byte.

use crate::reassembly::ReassemblyBuffers;
use bytes::Bytes;
use std::io;
use std::sync::Arc;
use tokio::net::unix::pipe;
use tracing::warn;

/// Atomic chunk ceiling: `PIPE_BUF`, clamped to 64 KiB on the off chance
/// a platform advertises more.
pub const PIPE_CHUNK_SIZE: usize = if libc::PIPE_BUF > 65536 {
    65536
} else {
    libc::PIPE_BUF
};

/// nuls(2) + len(2) + pid(4) + is_last(1).
pub const PIPE_HEADER_SIZE: usize = 9;

/// Payload bytes per chunk.
pub const PIPE_MAX_PAYLOAD: usize = PIPE_CHUNK_SIZE - PIPE_HEADER_SIZE;

/// The read buffer is twice the chunk size so a fragment left after
/// processing can be moved to the front with room for one more full read.
pub const READ_BUF_SIZE: usize = 2 * PIPE_CHUNK_SIZE;

/// Create the shared audit pipe: a cloneable write end for producers and
/// the single read end for the collector.
pub fn audit_channel() -> io::Result<(Arc<pipe::Sender>, pipe::Receiver)> {
    let (tx, rx) = pipe::pipe()?;
    Ok((Arc::new(tx), rx))
}

/// Split `payload` into protocol chunks for producer `pid`. All but the
/// last carry `is_last = 'f'`.
pub fn encode_chunks(pid: u32, payload: &[u8]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::with_capacity(payload.len() / PIPE_MAX_PAYLOAD + 1);
    let mut rest = payload;
    loop {
        let last = rest.len() <= PIPE_MAX_PAYLOAD;
        let take = if last { rest.len() } else { PIPE_MAX_PAYLOAD };
        let (body, tail) = rest.split_at(take);

        let mut chunk = Vec::with_capacity(PIPE_HEADER_SIZE + take);
        chunk.extend_from_slice(&[0, 0]);
        chunk.extend_from_slice(&(take as u16).to_ne_bytes());
        chunk.extend_from_slice(&pid.to_ne_bytes());
        chunk.push(if last { b't' } else { b'f' });
        chunk.extend_from_slice(body);
        chunks.push(chunk);

        if last {
            return chunks;
        }
        rest = tail;
    }
}

/// Write one chunk with a single `write` call, waiting for pipe capacity
/// first. Returns false when the chunk was refused or truncated — the
/// chunk is lost; a retry after a partial write could interleave with
/// other producers.
pub async fn write_chunk(sender: &pipe::Sender, chunk: &[u8]) -> io::Result<bool> {
    debug_assert!(chunk.len() <= PIPE_CHUNK_SIZE);
    loop {
        sender.writable().await?;
        match sender.try_write(chunk) {
            Ok(n) if n == chunk.len() => return Ok(true),
            Ok(n) => {
                warn!(wrote = n, len = chunk.len(), "truncated pipe write, chunk lost");
                return Ok(false);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
}

/// One reassembled unit coming off the pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A complete producer message (one encoded audit record).
    Record(Bytes),
    /// Non-protocol bytes, copied to the audit file verbatim.
    Passthrough(Bytes),
}

struct ChunkHeader {
    len: usize,
    pid: u32,
    is_last: bool,
}

impl ChunkHeader {
    /// Parse and validate; `None` means "not a protocol chunk here".
    fn parse(buf: &[u8]) -> Option<Self> {
        let len = u16::from_ne_bytes([buf[2], buf[3]]) as usize;
        let pid = u32::from_ne_bytes(buf[4..8].try_into().unwrap());
        let is_last = buf[8];
        if buf[0] == 0
            && buf[1] == 0
            && len > 0
            && len <= PIPE_MAX_PAYLOAD
            && pid != 0
            && (is_last == b't' || is_last == b'f')
        {
            Some(Self {
                len,
                pid,
                is_last: is_last == b't',
            })
        } else {
            None
        }
    }
}

/// Incremental chunk decoder: raw pipe reads in, [`Message`]s out.
///
/// Holds the residue of partially-read chunks between reads and the
/// per-producer reassembly buffers for multi-chunk messages.
pub struct PipeDecoder {
    buffer: Vec<u8>,
    used: usize,
    buffers: ReassemblyBuffers,
}

impl Default for PipeDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipeDecoder {
    pub fn new() -> Self {
        Self {
            buffer: vec![0u8; READ_BUF_SIZE],
            used: 0,
            buffers: ReassemblyBuffers::new(),
        }
    }

    /// The region a pipe read should fill. Never empty: processing always
    /// leaves less than one full chunk of residue.
    pub fn spare_capacity(&mut self) -> &mut [u8] {
        &mut self.buffer[self.used..]
    }

    /// Account for `n` bytes just read into [`Self::spare_capacity`] and
    /// decode as far as possible.
    pub fn commit(&mut self, n: usize, out: &mut Vec<Message>) {
        self.used += n;
        self.process(out);
    }

    fn process(&mut self, out: &mut Vec<Message>) {
        let mut cursor = 0;

        while self.used - cursor >= PIPE_HEADER_SIZE {
            match ChunkHeader::parse(&self.buffer[cursor..]) {
                Some(header) => {
                    let chunk_len = PIPE_HEADER_SIZE + header.len;
                    if self.used - cursor < chunk_len {
                        // whole chunk not here yet
                        break;
                    }
                    let payload =
                        &self.buffer[cursor + PIPE_HEADER_SIZE..cursor + chunk_len];
                    if header.is_last {
                        out.push(Message::Record(
                            self.buffers.complete(header.pid, payload),
                        ));
                    } else {
                        self.buffers.append_partial(header.pid, payload);
                    }
                    cursor += chunk_len;
                }
                None => {
                    // Not a chunk: pass bytes through up to the next NUL,
                    // which may start a real header.
                    let mut span = 1;
                    while cursor + span < self.used && self.buffer[cursor + span] != 0 {
                        span += 1;
                    }
                    out.push(Message::Passthrough(Bytes::copy_from_slice(
                        &self.buffer[cursor..cursor + span],
                    )));
                    cursor += span;
                }
            }
        }

        // Left-justify the residue.
        if cursor > 0 {
            self.buffer.copy_within(cursor..self.used, 0);
            self.used -= cursor;
        }
    }

    /// Shutdown flush: incomplete per-producer accumulations go out as
    /// records (losing the tail is worse than emitting a short record),
    /// and any undecoded residue goes out verbatim.
    pub fn flush(&mut self, out: &mut Vec<Message>) {
        for data in self.buffers.drain() {
            out.push(Message::Record(data));
        }
        if self.used > 0 {
            out.push(Message::Passthrough(Bytes::copy_from_slice(
                &self.buffer[..self.used],
            )));
            self.used = 0;
        }
    }
}
