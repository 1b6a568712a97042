// src/client/queue.rs
// Remote signaling that arrived before the peer connection could take it.

use std::collections::VecDeque;

use crate::types::{IceCandidate, SessionDescription};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingSignal {
    Offer(SessionDescription),
    IceCandidate(IceCandidate),
}

/// FIFO of pending signals. Entries leave only through [`drain`](Self::drain) or
/// [`clear`](Self::clear); nothing is reordered or dropped in between.
#[derive(Debug, Default)]
pub struct SignalQueue {
    items: VecDeque<PendingSignal>,
}

impl SignalQueue {
    pub fn new() -> Self { Self::default() }

    pub fn push(&mut self, signal: PendingSignal) {
        self.items.push_back(signal);
    }

    /// Takes everything in arrival order and leaves the queue empty.
    pub fn drain(&mut self) -> Vec<PendingSignal> {
        self.items.drain(..).collect()
    }

    pub fn clear(&mut self) { self.items.clear(); }

    pub fn len(&self) -> usize { self.items.len() }

    pub fn is_empty(&self) -> bool { self.items.is_empty() }
}
