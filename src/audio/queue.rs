use rand::seq::SliceRandom;
use std::collections::VecDeque;
use tracing::debug;

use crate::{error::PlaybackError, sources::Track};

pub const DEFAULT_HISTORY_LENGTH: usize = 10;
pub const DEFAULT_TITLE_HISTORY_LENGTH: usize = 15;

/// Pending queue, bounded play history and the loop flag of one session.
///
/// The queue never talks to the transport. The controller asks it what to play
/// next ([`PlayQueue::advance`], [`PlayQueue::previous`]) and pops the head when
/// playback actually starts.
#[derive(Debug)]
pub struct PlayQueue {
    pending: VecDeque<Track>,
    history: VecDeque<Track>,
    recent_titles: VecDeque<String>,
    loop_enabled: bool,
    history_limit: usize,
    title_limit: usize,
}

impl Default for PlayQueue {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LENGTH, DEFAULT_TITLE_HISTORY_LENGTH)
    }
}

impl PlayQueue {
    pub fn new(history_limit: usize, title_limit: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            history: VecDeque::with_capacity(history_limit),
            recent_titles: VecDeque::with_capacity(title_limit),
            loop_enabled: false,
            history_limit: history_limit.max(1),
            title_limit: title_limit.max(1),
        }
    }

    pub fn append(&mut self, track: Track) {
        self.pending.push_back(track);
    }

    pub fn extend(&mut self, tracks: impl IntoIterator<Item = Track>) {
        self.pending.extend(tracks);
    }

    pub fn pop_front(&mut self) -> Option<Track> {
        self.pending.pop_front()
    }

    pub fn peek_front(&self) -> Option<&Track> {
        self.pending.front()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// The next `n` pending tracks, head first.
    pub fn upcoming(&self, n: usize) -> Vec<Track> {
        self.pending.iter().take(n).cloned().collect()
    }

    /// Records the track that just finished and decides what comes next.
    ///
    /// With loop enabled the last played track is put back at the head and
    /// returned whatever else is queued. Otherwise the current head is returned
    /// without being popped; `None` means the queue is exhausted.
    pub fn advance(&mut self, played: Option<&Track>) -> Option<Track> {
        if let Some(track) = played {
            self.record_history(track);
        }

        if self.loop_enabled {
            if let Some(last) = self.history.back().cloned() {
                debug!("🔁 Looping {}", last.display_title());
                self.pending.push_front(last.clone());
                return Some(last);
            }
        }

        self.pending.front().cloned()
    }

    /// Puts the track played before `current` back at the head.
    ///
    /// While something is playing, `current` is re-queued right after it so
    /// playback continues where it was. Returns `None`, leaving the queue
    /// untouched, when there is nothing earlier to go back to.
    pub fn previous(&mut self, current: Option<&Track>) -> Option<Track> {
        let Some(current) = current else {
            let last = self.history.back().cloned()?;
            self.pending.push_front(last.clone());
            return Some(last);
        };

        let before = match self.history.iter().rposition(|t| t.same_as(current)) {
            Some(0) => None,
            Some(index) => self.history.get(index - 1).cloned(),
            None => self.history.back().cloned(),
        }?;

        self.pending.push_front(current.clone());
        self.pending.push_front(before.clone());
        debug!("⏮️ Going back to {}", before.display_title());
        Some(before)
    }

    pub fn shuffle(&mut self) {
        self.pending.make_contiguous().shuffle(&mut rand::thread_rng());
    }

    /// Moves the entry at `from` to `to` (0-based). The queue is untouched on error.
    pub fn move_track(&mut self, from: usize, to: usize) -> Result<(), PlaybackError> {
        let len = self.pending.len();
        if from >= len {
            return Err(PlaybackError::index_out_of_range(from, len));
        }
        if to >= len {
            return Err(PlaybackError::index_out_of_range(to, len));
        }

        if let Some(track) = self.pending.remove(from) {
            self.pending.insert(to, track);
        }
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Result<Track, PlaybackError> {
        let len = self.pending.len();
        self.pending
            .remove(index)
            .ok_or(PlaybackError::index_out_of_range(index, len))
    }

    /// Empties the queue and the history. Titles and the loop flag are kept.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.history.clear();
    }

    pub fn record_title(&mut self, title: impl Into<String>) {
        if self.recent_titles.len() >= self.title_limit {
            self.recent_titles.pop_front();
        }
        self.recent_titles.push_back(title.into());
    }

    pub fn history(&self) -> Vec<Track> {
        self.history.iter().cloned().collect()
    }

    pub fn recent_titles(&self) -> Vec<String> {
        self.recent_titles.iter().cloned().collect()
    }

    pub fn loop_enabled(&self) -> bool {
        self.loop_enabled
    }

    pub fn set_loop(&mut self, enabled: bool) {
        self.loop_enabled = enabled;
    }

    pub fn toggle_loop(&mut self) -> bool {
        self.loop_enabled = !self.loop_enabled;
        self.loop_enabled
    }

    fn record_history(&mut self, track: &Track) {
        // A looped or replayed track is recorded once.
        if self.history.back().is_some_and(|last| last.same_as(track)) {
            return;
        }
        if self.history.len() >= self.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(track.clone());
    }
}
