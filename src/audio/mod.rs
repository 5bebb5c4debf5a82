//! # Audio Module
//!
//! Per-guild playback for Guild Jukebox.
//!
//! ## Architecture
//!
//! ### [`session`] - Session Controller
//! - One controller per connected guild, owning the playback state machine
//! - Routes track completions through a single driver task
//! - Publishes [`session::SessionEvent`]s for the front end
//!
//! ### [`queue`] - Queue and History
//! - FIFO of pending tracks plus a bounded history of played ones
//! - Loop and "previous" navigation on top of the history
//!
//! ### [`preload`] - Preloader
//! - Bounded worker pool resolving upcoming tracks ahead of time
//!
//! ### [`idle`] - Idle Supervisor
//! - Restartable timer that leaves the channel when nobody is listening
//!
//! ### [`transport`] - Audio Transport
//! - Seam between the controller and songbird
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use guild_jukebox::audio::session::{SessionController, SessionOptions};
//! # use std::sync::Arc;
//! # use guild_jukebox::audio::transport::AudioTransport;
//! # use guild_jukebox::sources::MediaResolver;
//!
//! # async fn example(
//! #     transport: Arc<dyn AudioTransport>,
//! #     resolver: Arc<dyn MediaResolver>,
//! # ) -> anyhow::Result<()> {
//! let (session, mut events) =
//!     SessionController::start(transport, resolver, SessionOptions::default());
//!
//! session.submit("https://www.youtube.com/watch?v=dQw4w9WgXcQ").await?;
//! session.pause().await?;
//! session.resume().await?;
//!
//! while let Some(event) = events.recv().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

pub mod idle;
pub mod preload;
pub mod queue;
pub mod session;
pub mod transport;

pub use session::{
    DisconnectReason, SessionController, SessionEvent, SessionOptions, SubmitOutcome,
};
pub use transport::{AudioTransport, SongbirdTransport};
