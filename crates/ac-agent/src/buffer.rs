use crate::events::{Event, EventBus};
use crate::logfile::SessionLog;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Retained chunks per tab; older entries are dropped once exceeded.
pub const MAX_CHUNKS: usize = 1000;
/// Pending bytes at or above this size flush immediately.
pub const MAX_CHUNK_SIZE: usize = 4096;
/// Small writes below `MAX_CHUNK_SIZE` coalesce for this long.
pub const FLUSH_DEBOUNCE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputChunk {
    pub seq: u64,
    pub data: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferStats {
    pub chunk_count: usize,
    pub total_size: usize,
    pub first_seq: i64,
    pub last_seq: i64,
}

struct Inner {
    chunks: VecDeque<OutputChunk>,
    next_seq: u64,
    pending: Vec<u8>,
    timer: Option<JoinHandle<()>>,
    log: Option<SessionLog>,
    total_size: usize,
}

/// Per-tab ring of sequence-numbered output chunks.
///
/// PTYs emit many tiny writes during cursor animations; coalescing them
/// behind a short debounce keeps event-bus traffic and per-subscriber
/// serialization cost down without adding noticeable latency.
pub struct OutputBuffer {
    agent_id: Uuid,
    tab_id: Uuid,
    bus: EventBus,
    max_chunks: usize,
    // Handed to the debounce timer task so it can call back into flush
    // without the bus retaining an owning reference.
    weak: Weak<OutputBuffer>,
    inner: Mutex<Inner>,
}

impl OutputBuffer {
    pub fn new(agent_id: Uuid, tab_id: Uuid, bus: EventBus) -> Arc<Self> {
        Self::with_max_chunks(agent_id, tab_id, bus, MAX_CHUNKS)
    }

    pub fn with_max_chunks(
        agent_id: Uuid,
        tab_id: Uuid,
        bus: EventBus,
        max_chunks: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            agent_id,
            tab_id,
            bus,
            max_chunks,
            weak: weak.clone(),
            inner: Mutex::new(Inner {
                chunks: VecDeque::new(),
                next_seq: 0,
                pending: Vec::new(),
                timer: None,
                log: None,
                total_size: 0,
            }),
        })
    }

    /// Accumulate PTY bytes. Large accumulations flush synchronously;
    /// otherwise a one-shot debounce timer is armed (never re-armed while
    /// pending, so a steady trickle still flushes).
    pub fn append(&self, data: &[u8]) {
        let mut inner = self.lock();
        inner.pending.extend_from_slice(data);
        if inner.pending.len() >= MAX_CHUNK_SIZE {
            self.flush_locked(&mut inner);
        } else if !inner.pending.is_empty() && inner.timer.is_none() {
            let weak = self.weak.clone();
            inner.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(FLUSH_DEBOUNCE).await;
                if let Some(buffer) = weak.upgrade() {
                    buffer.flush();
                }
            }));
        }
    }

    /// Turn pending bytes into the next numbered chunk and publish it.
    pub fn flush(&self) {
        let mut inner = self.lock();
        self.flush_locked(&mut inner);
    }

    fn flush_locked(&self, inner: &mut Inner) {
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        if inner.pending.is_empty() {
            return;
        }

        let data = String::from_utf8_lossy(&inner.pending).into_owned();
        inner.pending.clear();

        let chunk = OutputChunk {
            seq: inner.next_seq,
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        };
        inner.next_seq += 1;
        inner.total_size += chunk.data.len();

        if let Some(log) = inner.log.as_mut() {
            log.append(&chunk.data);
        }

        inner.chunks.push_back(chunk.clone());
        while inner.chunks.len() > self.max_chunks {
            if let Some(dropped) = inner.chunks.pop_front() {
                inner.total_size -= dropped.data.len();
            }
        }

        self.bus.publish(Event::Chunk {
            agent_id: self.agent_id,
            tab_id: self.tab_id,
            chunk,
        });
    }

    /// All retained chunks with `seq >= from_seq`, plus the highest assigned
    /// seq (`-1` before the first flush).
    pub fn snapshot(&self, from_seq: u64) -> (Vec<OutputChunk>, i64) {
        let inner = self.lock();
        let chunks = inner
            .chunks
            .iter()
            .filter(|c| c.seq >= from_seq)
            .cloned()
            .collect();
        (chunks, inner.next_seq as i64 - 1)
    }

    pub fn last_seq(&self) -> i64 {
        self.lock().next_seq as i64 - 1
    }

    pub fn stats(&self) -> BufferStats {
        let inner = self.lock();
        BufferStats {
            chunk_count: inner.chunks.len(),
            total_size: inner.total_size,
            first_seq: inner.chunks.front().map_or(-1, |c| c.seq as i64),
            last_seq: inner.next_seq as i64 - 1,
        }
    }

    /// Concatenated retained output (callers flush first when they need
    /// pending bytes included).
    pub fn contents(&self) -> String {
        let inner = self.lock();
        inner.chunks.iter().map(|c| c.data.as_str()).collect()
    }

    /// Install the restart-recovery chunk at seq 0. Only meaningful on a
    /// fresh buffer.
    pub fn seed(&self, data: String) {
        let mut inner = self.lock();
        debug_assert!(inner.chunks.is_empty() && inner.next_seq == 0);
        inner.total_size = data.len();
        inner.chunks.push_back(OutputChunk {
            seq: 0,
            data,
            timestamp: chrono::Utc::now().timestamp_millis(),
        });
        inner.next_seq = 1;
    }

    pub fn set_log(&self, log: Option<SessionLog>) {
        self.lock().log = log;
    }

    pub fn close_log(&self) {
        self.lock().log = None;
    }

    /// Flush pending bytes and cancel the debounce timer (tab close and
    /// shutdown paths).
    pub fn close(&self) {
        let mut inner = self.lock();
        self.flush_locked(&mut inner);
        if let Some(timer) = inner.timer.take() {
            timer.abort();
        }
        inner.log = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
