use std::collections::VecDeque;

/// Serialized frames waiting for an open socket, oldest first.
#[derive(Debug, Clone, Default)]
pub struct OutboundQueue {
    frames: VecDeque<String>,
    total_enqueued: u64,
}

impl OutboundQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[must_use]
    pub fn total_enqueued(&self) -> u64 {
        self.total_enqueued
    }

    pub fn enqueue(&mut self, frame: String) {
        self.frames.push_back(frame);
        self.total_enqueued += 1;
    }

    #[must_use]
    pub fn front(&self) -> Option<&str> {
        self.frames.front().map(String::as_str)
    }

    /// Removes the oldest frame. Call only once the socket accepted it.
    pub fn pop_front(&mut self) -> Option<String> {
        self.frames.pop_front()
    }

    /// Puts back a frame the socket refused so it is retried first.
    pub fn requeue_front(&mut self, frame: String) {
        self.frames.push_front(frame);
    }

    #[must_use]
    pub fn pending(&self) -> Vec<&str> {
        self.frames.iter().map(String::as_str).collect()
    }
}
