use std::net::SocketAddr;
use std::sync::Arc;

use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use music_eras::config::Config;
use music_eras::handlers::{router, AppState};
use music_eras::narrate::ChatNarrator;
use music_eras::spotify::SpotifyClient;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    tracing::info!(
        policy = ?config.analysis.policy,
        features = ?config.analysis.feature_kind,
        narrator_model = %config.narrator.model,
        "configuration loaded"
    );

    let state = AppState {
        spotify: SpotifyClient::new(&config.spotify),
        narrator: Arc::new(ChatNarrator::new(&config.narrator)),
        analysis: config.analysis.clone(),
    };

    let app = router()
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on {}", addr);

    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .await?;

    Ok(())
}
