use std::env;
use std::str::FromStr;

use crate::eras::model::FeatureKind;
use crate::eras::segment::SegmentationPolicy;

/// Application configuration from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub spotify: SpotifySettings,
    pub analysis: AnalysisSettings,
    pub narrator: NarratorSettings,
}

/// Credentials and endpoints handed to the Spotify client at construction.
#[derive(Debug, Clone)]
pub struct SpotifySettings {
    pub client_id: String,
    pub client_secret: String,
    pub api_base: String,
    pub token_url: String,
}

/// How eras are cut and which feature shape feeds them.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    pub policy: SegmentationPolicy,
    /// Target era count for the fixed-window policy, also used by per-request overrides.
    pub era_count: usize,
    pub feature_kind: FeatureKind,
    pub retry_max_attempts: u32,
}

#[derive(Debug, Clone)]
pub struct NarratorSettings {
    pub base_url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let port = parsed_or("PORT", 8081);

        let client_id = env::var("SPOTIFY_CLIENT_ID")
            .map_err(|_| anyhow::anyhow!("SPOTIFY_CLIENT_ID is required"))?;

        let client_secret = env::var("SPOTIFY_CLIENT_SECRET")
            .map_err(|_| anyhow::anyhow!("SPOTIFY_CLIENT_SECRET is required"))?;

        let era_count = parsed_or("ERA_COUNT", 5usize).max(1);
        let policy = match env::var("ERA_POLICY") {
            Ok(raw) => SegmentationPolicy::parse(&raw, era_count)
                .ok_or_else(|| anyhow::anyhow!("unknown ERA_POLICY '{}'", raw))?,
            Err(_) => SegmentationPolicy::FixedWindow { era_count },
        };

        let feature_kind = match env::var("FEATURE_SOURCE").as_deref() {
            Ok("popularity") => FeatureKind::Popularity,
            Ok("audio") | Err(_) => FeatureKind::Audio,
            Ok(other) => anyhow::bail!("unknown FEATURE_SOURCE '{}'", other),
        };
        if !policy.supports(feature_kind) {
            anyhow::bail!("ERA_POLICY {:?} needs FEATURE_SOURCE=audio", policy);
        }

        Ok(Self {
            port,
            spotify: SpotifySettings {
                client_id,
                client_secret,
                api_base: env::var("SPOTIFY_API_BASE")
                    .unwrap_or_else(|_| "https://api.spotify.com/v1".into()),
                token_url: env::var("SPOTIFY_TOKEN_URL")
                    .unwrap_or_else(|_| "https://accounts.spotify.com/api/token".into()),
            },
            analysis: AnalysisSettings {
                policy,
                era_count,
                feature_kind,
                retry_max_attempts: parsed_or("RETRY_MAX_ATTEMPTS", 5u32).max(1),
            },
            narrator: NarratorSettings {
                base_url: env::var("NARRATOR_BASE_URL")
                    .unwrap_or_else(|_| "https://api.groq.com/openai/v1".into()),
                api_key: env::var("NARRATOR_API_KEY").ok(),
                model: env::var("NARRATOR_MODEL")
                    .unwrap_or_else(|_| "mixtral-8x7b-32768".into()),
            },
        })
    }
}

fn parsed_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
