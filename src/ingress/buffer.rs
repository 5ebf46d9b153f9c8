use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// When the buffer should be sent without an explicit flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushPolicy {
    pub max_rows: usize,
    pub max_bytes: usize,
    pub auto_flush: bool,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            max_rows: 75_000,
            max_bytes: 100 * 1024 * 1024, // 100 MiB
            auto_flush: true,
        }
    }
}

impl FlushPolicy {
    /// Never flush implicitly.
    pub fn manual() -> Self {
        Self {
            auto_flush: false,
            ..Default::default()
        }
    }

    fn is_due(&self, rows: usize, bytes: usize) -> bool {
        self.auto_flush && (rows >= self.max_rows || bytes >= self.max_bytes)
    }
}

/// Encoded lines waiting to be sent, in append order.
///
/// Lines are newline-terminated and stored back to back. Content that was
/// already handed out as a request body is kept frozen, so a retry reuses it
/// without copying.
#[derive(Debug, Default)]
pub struct Buffer {
    sealed: Bytes,
    open: BytesMut,
    rows: usize,
    policy: FlushPolicy,
}

impl Buffer {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            sealed: Bytes::new(),
            open: BytesMut::new(),
            rows: 0,
            policy,
        }
    }

    /// Append one encoded line. Returns true when the policy wants a flush now;
    /// the line just appended is part of what must be flushed.
    pub fn append(&mut self, line: &str) -> bool {
        debug_assert!(line.ends_with('\n'));
        self.open.extend_from_slice(line.as_bytes());
        self.rows += 1;
        self.policy.is_due(self.rows, self.len())
    }

    /// Everything buffered, as one request body. The content stays buffered
    /// until [`clear`](Self::clear).
    pub fn body(&mut self) -> Bytes {
        if !self.open.is_empty() {
            let open = self.open.split().freeze();
            self.sealed = if self.sealed.is_empty() {
                open
            } else {
                let mut joined = BytesMut::with_capacity(self.sealed.len() + open.len());
                joined.extend_from_slice(&self.sealed);
                joined.extend_from_slice(&open);
                joined.freeze()
            };
        }
        self.sealed.clone()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.sealed.len() + self.open.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    pub fn policy(&self) -> &FlushPolicy {
        &self.policy
    }

    /// Drop all content. Only called once the content was delivered.
    pub fn clear(&mut self) {
        self.sealed = Bytes::new();
        self.open.clear();
        self.rows = 0;
    }
}
