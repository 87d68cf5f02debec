//! Bounded FIFO track queue.
//!
//! The head is the current track whenever the session is `Loading`,
//! `Playing` or `Paused`. Positions are 1-based from the head, so the
//! playing track is position 1. The bound counts the head too.
//!
//! A queue is owned by exactly one session loop and is never shared.

use crate::error::{PlaybackError, Result};
use crate::track::{Track, TrackId};
use std::collections::VecDeque;

#[derive(Debug)]
pub struct Queue {
    tracks: VecDeque<Track>,
    max_len: usize,
}

impl Queue {
    /// Queue holding at most `max_len` tracks (minimum 1).
    pub fn new(max_len: usize) -> Self {
        let max_len = max_len.max(1);
        Self {
            tracks: VecDeque::with_capacity(max_len.min(16)),
            max_len,
        }
    }

    /// Append `track`, returning its 1-based position.
    ///
    /// # Errors
    ///
    /// `QueueFull` when the queue is at capacity; the queue is unchanged.
    pub fn enqueue(&mut self, track: Track) -> Result<usize> {
        if self.is_full() {
            return Err(PlaybackError::QueueFull { max: self.max_len });
        }
        self.tracks.push_back(track);
        Ok(self.tracks.len())
    }

    pub fn drop_head(&mut self) -> Option<Track> {
        self.tracks.pop_front()
    }

    pub fn peek_head(&self) -> Option<&Track> {
        self.tracks.front()
    }

    /// Second entry, the prefetch candidate.
    pub fn peek_next(&self) -> Option<&Track> {
        self.tracks.get(1)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    pub fn is_head(&self, id: TrackId) -> bool {
        self.peek_head().map_or(false, |t| t.id == id)
    }

    /// Remove every track, head included, in queue order.
    pub fn clear(&mut self) -> Vec<Track> {
        self.tracks.drain(..).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.tracks.len() >= self.max_len
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }
}
