//! Discord presentation: embeds and reply text built from session state.

pub mod embeds;
