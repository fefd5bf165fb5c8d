//! Musical-era analysis of a Spotify library, narrated into a biography.

pub mod config;
pub mod eras;
pub mod error;
pub mod handlers;
pub mod narrate;
pub mod retry;
pub mod spotify;
