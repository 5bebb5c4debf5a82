use thiserror::Error;

use crate::sources::ResolveError;

/// Errors surfaced to the user by session commands.
///
/// Each variant renders as the single reply the front end sends back, so the
/// messages are written for people, not for logs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PlaybackError {
    #[error("Unsupported site or age restricted content: {0}")]
    UnresolvableMedia(String),
    #[error("Could not fetch the track right now, please retry: {0}")]
    TransientFetch(String),
    #[error("Volume must be a number between 0 and 100, got {0}")]
    InvalidVolume(i64),
    #[error("Wrong position {index}, the queue has {len} entries")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("Bot not connected to any voice channel")]
    NoActiveSession,
    #[error("Please join a voice channel first")]
    NotInVoiceChannel,
    #[error("Already connected to a voice channel")]
    AlreadyConnected,
    #[error("Nothing is playing")]
    NothingPlaying,
    #[error("Loop is enabled, disable it before queueing more songs")]
    LoopLocked,
    #[error("Nothing to search for")]
    EmptyQuery,
    #[error("Voice transport error: {0}")]
    Transport(String),
}

impl From<ResolveError> for PlaybackError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Unresolvable(reason) => PlaybackError::UnresolvableMedia(reason),
            ResolveError::Transient(reason) => PlaybackError::TransientFetch(reason),
        }
    }
}

impl PlaybackError {
    pub fn index_out_of_range(index: usize, len: usize) -> Self {
        PlaybackError::IndexOutOfRange { index, len }
    }
}
