//! User credentials with refresh-on-expiry.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use crate::error::FetchError;

/// A user's access token and, when granted, the token that renews it.
#[derive(Clone, Debug, PartialEq)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

/// Exchanges a refresh token for new credentials. A `None` refresh token in
/// the result means the old one stays valid.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<Credentials, FetchError>;
}

/// Credentials shared by every call of one analysis run.
pub struct Session {
    refresher: Arc<dyn TokenRefresher>,
    credentials: RwLock<Credentials>,
    refresh_lock: Mutex<()>,
}

impl Session {
    pub fn new(credentials: Credentials, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            refresher,
            credentials: RwLock::new(credentials),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Current credentials, including any refreshed during this session.
    pub async fn credentials(&self) -> Credentials {
        self.credentials.read().await.clone()
    }

    /// Calls `fetcher` with the current access token. If it reports
    /// [`FetchError::AuthExpired`], refreshes once and calls it once more; a
    /// second rejection is final. Any other error passes straight through.
    pub async fn call<T, F, Fut>(&self, fetcher: F) -> Result<T, FetchError>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let token = self.credentials.read().await.access_token.clone();
        match fetcher(token.clone()).await {
            Err(FetchError::AuthExpired) => {
                let fresh = self.refresh_after(&token).await?;
                fetcher(fresh).await
            }
            other => other,
        }
    }

    /// Refreshes unless another caller already replaced `rejected`.
    async fn refresh_after(&self, rejected: &str) -> Result<String, FetchError> {
        let _guard = self.refresh_lock.lock().await;

        let refresh_token = {
            let current = self.credentials.read().await;
            if current.access_token != rejected {
                return Ok(current.access_token.clone());
            }
            current.refresh_token.clone()
        };

        let Some(refresh_token) = refresh_token else {
            warn!("access token rejected and no refresh token available");
            return Err(FetchError::AuthExpired);
        };

        // refreshers report a revoked grant as AuthExpired; anything else passes through
        let grant = self.refresher.refresh(&refresh_token).await.map_err(|e| {
            warn!(error = %e, "token refresh failed");
            e
        })?;

        let mut current = self.credentials.write().await;
        current.access_token = grant.access_token;
        if grant.refresh_token.is_some() {
            current.refresh_token = grant.refresh_token;
        }
        info!(rotated = current.refresh_token.as_deref() != Some(refresh_token.as_str()), "access token refreshed");
        Ok(current.access_token.clone())
    }
}
