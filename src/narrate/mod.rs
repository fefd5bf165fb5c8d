//! Era narration: prompts, the narrator seam, and biography assembly.

mod chat;

pub use chat::ChatNarrator;

use async_trait::async_trait;
use futures::future::try_join_all;
use thiserror::Error;

use crate::eras::model::{AggregateFeatures, Era};

/// Errors that can occur when talking to a narration backend.
#[derive(Debug, Error)]
pub enum NarrationError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Turns eras into prose.
#[async_trait]
pub trait Narrator: Send + Sync {
    /// One paragraph describing `era`.
    async fn narrate(&self, era: &Era) -> Result<String, NarrationError>;

    /// A short, catchy name for `era`.
    async fn name_era(&self, era: &Era) -> Result<String, NarrationError>;
}

/// Narrates every era concurrently and joins the paragraphs in era order,
/// separated by a blank line.
pub async fn write_biography(narrator: &dyn Narrator, eras: &[Era]) -> Result<String, NarrationError> {
    let parts = try_join_all(eras.iter().map(|era| narrator.narrate(era))).await?;
    Ok(parts
        .iter()
        .map(|p| p.trim())
        .collect::<Vec<_>>()
        .join("\n\n"))
}

/// Replaces every era's name with one coined by the narrator.
pub async fn rename_eras(narrator: &dyn Narrator, eras: &mut [Era]) -> Result<(), NarrationError> {
    let names = try_join_all(eras.iter().map(|era| narrator.name_era(era))).await?;
    for (era, name) in eras.iter_mut().zip(names) {
        let name = clean_era_name(&name);
        if !name.is_empty() {
            era.era_name = name;
        }
    }
    Ok(())
}

/// Strips double quotes and surrounding whitespace from a generated name.
pub fn clean_era_name(raw: &str) -> String {
    raw.replace('"', "").trim().to_string()
}

fn vibe_line(features: &AggregateFeatures) -> String {
    match *features {
        AggregateFeatures::Audio {
            energy, valence, ..
        } => format!(
            "Energy level at {}% and Happiness/Positivity at {}%.",
            (energy * 100.0).round(),
            (valence * 100.0).round()
        ),
        AggregateFeatures::Popularity {
            popularity,
            release_year,
        } => format!(
            "Mainstream appeal at {}% with music released around {}.",
            popularity.round(),
            release_year.round()
        ),
    }
}

/// Prompt for one biography chapter.
pub fn biography_prompt(era: &Era) -> String {
    let artists = era.top_artists.iter().take(3).cloned().collect::<Vec<_>>().join(", ");
    let genres = era.top_genres.iter().take(3).cloned().collect::<Vec<_>>().join(", ");

    format!(
        "You are a witty, insightful music journalist crafting a chapter of a person's musical biography.\n\
         Write one evocative paragraph (around 80-100 words) describing this musical phase named \"{}\".\n\
         Focus on the feeling and narrative, not just listing data. Be personal and creative.\n\
         \n\
         Details of the Era:\n\
         - Timeframe: {}\n\
         - Key Artists: {}\n\
         - Dominant Genres: {}\n\
         - Vibe: {}",
        era.era_name,
        era.timeframe,
        artists,
        genres,
        vibe_line(&era.aggregate_features)
    )
}

/// Prompt asking for a 2-5 word era name.
pub fn era_name_prompt(era: &Era) -> String {
    format!(
        "You are a creative music journalist. Coin a catchy, evocative name for a person's musical era. \
         The name should be 2-5 words long, for example \"Melancholic Indie Winter\" or \"Upbeat Summer Pop\".\n\
         \n\
         - Top Genres: {}\n\
         - Top Artists: {}\n\
         - Vibe: {}\n\
         \n\
         Era Name:",
        era.top_genres.join(", "),
        era.top_artists.join(", "),
        vibe_line(&era.aggregate_features)
    )
}
