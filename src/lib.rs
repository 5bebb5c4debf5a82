//! Per-guild music playback for Discord: queue, history, preloading and
//! session control on top of serenity and songbird.

pub mod audio;
pub mod bot;
pub mod config;
pub mod error;
pub mod sources;
pub mod storage;
pub mod ui;

#[cfg(test)]
mod testing;
