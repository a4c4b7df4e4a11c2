//! Per-producer partial-message buffers.
//!
//! Non-final chunks accumulate here until the producer's final chunk
//! arrives. Slots live in 256 buckets selected by `pid % 256`, so the
//! search cost per chunk is bounded by the number of concurrent in-flight
//! producers that hash to the same bucket, not by the total producer
//! count.
//!
//! A slot is never removed from its bucket; completing a message zeroes
//! the `pid` and releases the accumulated storage, leaving the slot for
//! reuse. There is never more than one live slot per producer.

use bytes::{Bytes, BytesMut};

const BUCKET_COUNT: usize = 256;

struct Slot {
    pid: u32,
    data: BytesMut,
}

pub struct ReassemblyBuffers {
    buckets: Vec<Vec<Slot>>,
}

impl ReassemblyBuffers {
    pub fn new() -> Self {
        Self {
            buckets: (0..BUCKET_COUNT).map(|_| Vec::new()).collect(),
        }
    }

    /// Accumulate a non-final chunk for `pid`.
    pub fn append_partial(&mut self, pid: u32, payload: &[u8]) {
        let bucket = &mut self.buckets[pid as usize % BUCKET_COUNT];

        let mut existing = None;
        let mut free = None;
        for (i, slot) in bucket.iter().enumerate() {
            if slot.pid == pid {
                existing = Some(i);
                break;
            }
            if slot.pid == 0 && free.is_none() {
                free = Some(i);
            }
        }
        if let Some(i) = existing {
            bucket[i].data.extend_from_slice(payload);
            return;
        }
        match free {
            Some(i) => {
                bucket[i].pid = pid;
                bucket[i].data.extend_from_slice(payload);
            }
            None => bucket.push(Slot {
                pid,
                data: BytesMut::from(payload),
            }),
        }
    }

    /// Append the final chunk and hand back the whole message, releasing
    /// the slot.
    pub fn complete(&mut self, pid: u32, payload: &[u8]) -> Bytes {
        let bucket = &mut self.buckets[pid as usize % BUCKET_COUNT];
        for slot in bucket.iter_mut() {
            if slot.pid == pid {
                slot.data.extend_from_slice(payload);
                slot.pid = 0;
                return std::mem::take(&mut slot.data).freeze();
            }
        }
        // The whole message was one chunk.
        Bytes::copy_from_slice(payload)
    }

    /// Take every in-flight accumulation, complete or not. Shutdown path:
    /// a short record beats a silently dropped one.
    pub fn drain(&mut self) -> Vec<Bytes> {
        let mut out = Vec::new();
        for bucket in &mut self.buckets {
            for slot in bucket.iter_mut() {
                if slot.pid != 0 {
                    slot.pid = 0;
                    out.push(std::mem::take(&mut slot.data).freeze());
                }
            }
        }
        out
    }

    /// Number of producers with a message in flight.
    pub fn in_flight(&self) -> usize {
        self.buckets
            .iter()
            .map(|b| b.iter().filter(|s| s.pid != 0).count())
            .sum()
    }
}

impl Default for ReassemblyBuffers {
    fn default() -> Self {
        Self::new()
    }
}
