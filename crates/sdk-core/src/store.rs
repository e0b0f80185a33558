//! App config store.
//!
//! Holds the merged configuration the rest of the crate reads, backed by
//! three tiers: the in-memory cache, the on-disk JSON cache, and the network.
//! Reads never block; `config` always returns a usable default-filled value.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::environment::EnvironmentProvider;
use crate::http::{AppConfigClient, AppConfigRequestBody, AppConfigResponsePayload, HttpError};
use crate::persistence::JsonRepository;

/// Name of the persisted app config value.
const APP_CONFIG_CACHE_NAME: &str = "app-config";

/// Errors surfaced by [`AppConfigStore::fetch_app_config`].
#[derive(Debug, Error)]
pub enum FetchAppConfigError {
    /// The network request failed.
    #[error("app config request failed: {0}")]
    Http(#[from] HttpError),
    /// The backend answered with an empty body.
    #[error("app config response was empty")]
    EmptyResponse,
}

/// Cloneable handle to the shared config store state.
#[derive(Clone)]
pub struct AppConfigStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    /// Client performing the app config request.
    client: Arc<dyn AppConfigClient>,
    /// Source of the request metadata snapshot.
    environment: Arc<dyn EnvironmentProvider>,
    /// On-disk cache, absent when the host runs without one.
    repository: Option<JsonRepository>,
    /// The merged configuration served to readers.
    config: RwLock<AppConfig>,
    /// Whether a backend config is cached in memory.
    backend_cached: AtomicBool,
}

impl fmt::Debug for AppConfigStore {
    /// Prints the cached config only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfigStore")
            .field("config", &self.config())
            .field(
                "backend_cached",
                &self.inner.backend_cached.load(Ordering::SeqCst),
            )
            .finish()
    }
}

impl AppConfigStore {
    /// Creates a store serving defaults until a fetch succeeds.
    pub fn new(
        client: Arc<dyn AppConfigClient>,
        environment: Arc<dyn EnvironmentProvider>,
        repository: Option<JsonRepository>,
    ) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                client,
                environment,
                repository,
                config: RwLock::new(AppConfig::default()),
                backend_cached: AtomicBool::new(false),
            }),
        }
    }

    /// The most recently merged configuration. Never blocks on a fetch.
    pub fn config(&self) -> AppConfig {
        self.inner.config.read().expect("config lock poisoned").clone()
    }

    /// Whether a backend-sourced config has been cached in memory.
    pub fn has_backend_config(&self) -> bool {
        self.inner.backend_cached.load(Ordering::SeqCst)
    }

    /// Makes the current config reflect the backend.
    ///
    /// When an in-memory or valid on-disk config exists, completes
    /// immediately and refreshes from the network in the background. Only a
    /// cold start waits for the network round-trip.
    pub async fn fetch_app_config(
        &self,
        app_identifier: &str,
    ) -> Result<(), FetchAppConfigError> {
        if self.inner.backend_cached.load(Ordering::SeqCst) {
            self.spawn_background_refresh(app_identifier);
            return Ok(());
        }
        if let Some(persisted) = self.load_persisted() {
            debug!("serving persisted app config, refreshing in background");
            *self.inner.config.write().expect("config lock poisoned") = persisted;
            self.inner.backend_cached.store(true, Ordering::SeqCst);
            self.spawn_background_refresh(app_identifier);
            return Ok(());
        }
        self.refresh_from_network(app_identifier).await
    }

    /// Loads the persisted config, deleting it when corrupt.
    fn load_persisted(&self) -> Option<AppConfig> {
        let repository = self.inner.repository.as_ref()?;
        if !repository.value_exists(APP_CONFIG_CACHE_NAME) {
            return None;
        }
        match repository.read::<AppConfig>(APP_CONFIG_CACHE_NAME) {
            Ok(config) => Some(config),
            Err(error) => {
                warn!("discarding corrupt persisted app config: {error}");
                if let Err(error) = repository.remove_value(APP_CONFIG_CACHE_NAME) {
                    warn!("failed to delete corrupt app config: {error}");
                }
                None
            }
        }
    }

    /// Fetches, merges, caches, and persists a fresh backend config.
    async fn refresh_from_network(
        &self,
        app_identifier: &str,
    ) -> Result<(), FetchAppConfigError> {
        let request =
            AppConfigRequestBody::new(app_identifier, &self.inner.environment.snapshot());
        let payload = self.inner.client.fetch_app_config(&request).await?;
        let payload = payload.ok_or(FetchAppConfigError::EmptyResponse)?;
        self.install_backend_config(&payload);
        Ok(())
    }

    /// Merges a backend payload over defaults and makes it current.
    ///
    /// Remote fields override defaults field by field; absent remote fields
    /// fall back to defaults, never to the previously cached values.
    pub(crate) fn install_backend_config(&self, payload: &AppConfigResponsePayload) {
        let merged = AppConfig::merged(payload, &AppConfig::default());
        info!("installed backend app config");
        *self.inner.config.write().expect("config lock poisoned") = merged.clone();
        self.inner.backend_cached.store(true, Ordering::SeqCst);
        if let Some(repository) = &self.inner.repository {
            if let Err(error) = repository.write(&merged, APP_CONFIG_CACHE_NAME) {
                warn!("failed to persist app config: {error}");
            }
        }
    }

    /// Best-effort refresh on a spawned task. Failures are logged only.
    fn spawn_background_refresh(&self, app_identifier: &str) {
        let store = self.clone();
        let app_identifier = app_identifier.to_owned();
        tokio::spawn(async move {
            if let Err(error) = store.refresh_from_network(&app_identifier).await {
                debug!("background app config refresh failed: {error}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::environment::StaticEnvironmentProvider;

    /// Client returning a canned response and counting calls.
    struct FakeClient {
        calls: AtomicU32,
        response: Result<Option<AppConfigResponsePayload>, ()>,
    }

    impl FakeClient {
        fn with_payload(payload: AppConfigResponsePayload) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                response: Ok(Some(payload)),
            })
        }

        fn empty() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                response: Ok(None),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                response: Err(()),
            })
        }
    }

    #[async_trait]
    impl AppConfigClient for FakeClient {
        async fn fetch_app_config(
            &self,
            _request: &AppConfigRequestBody,
        ) -> Result<Option<AppConfigResponsePayload>, HttpError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Ok(payload) => Ok(payload.clone()),
                Err(()) => Err(HttpError::Retryable(503)),
            }
        }
    }

    fn payload_with_retry_count(count: u32) -> AppConfigResponsePayload {
        serde_json::from_value(json!({
            "platform": { "coreInitializationRetryCountMax": count }
        }))
        .unwrap()
    }

    fn environment() -> Arc<StaticEnvironmentProvider> {
        Arc::new(StaticEnvironmentProvider::default())
    }

    /// A cold start fetches from the network and serves the merged result.
    #[tokio::test]
    async fn cold_start_fetches_and_merges() {
        let client = FakeClient::with_payload(payload_with_retry_count(7));
        let store = AppConfigStore::new(client.clone(), environment(), None);
        assert_eq!(store.config().core_initialization_retry_count_max, 3);

        store.fetch_app_config("app-id").await.unwrap();
        assert_eq!(store.config().core_initialization_retry_count_max, 7);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    /// A second fetch completes immediately from memory and refreshes in the
    /// background.
    #[tokio::test]
    async fn warm_fetch_serves_memory_and_refreshes() {
        let client = FakeClient::with_payload(payload_with_retry_count(7));
        let store = AppConfigStore::new(client.clone(), environment(), None);
        store.fetch_app_config("app-id").await.unwrap();
        store.fetch_app_config("app-id").await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
    }

    /// A persisted config is served without waiting on the network.
    #[tokio::test]
    async fn persisted_config_serves_warm_start() {
        let dir = tempfile::tempdir().unwrap();
        let repository = JsonRepository::new(dir.path()).unwrap();

        let client = FakeClient::with_payload(payload_with_retry_count(7));
        let store =
            AppConfigStore::new(client, environment(), Some(repository.clone()));
        store.fetch_app_config("app-id").await.unwrap();

        // A fresh store over the same directory starts warm even when the
        // network is down.
        let offline = FakeClient::failing();
        let store =
            AppConfigStore::new(offline, environment(), Some(repository));
        store.fetch_app_config("app-id").await.unwrap();
        assert_eq!(store.config().core_initialization_retry_count_max, 7);
    }

    /// A corrupt persisted config is deleted and the fetch falls through to
    /// the network.
    #[tokio::test]
    async fn corrupt_persisted_config_falls_through_to_network() {
        let dir = tempfile::tempdir().unwrap();
        let repository = JsonRepository::new(dir.path()).unwrap();
        std::fs::write(
            dir.path().join("sdk-core").join("app-config.json"),
            b"not json",
        )
        .unwrap();

        let client = FakeClient::with_payload(payload_with_retry_count(7));
        let store =
            AppConfigStore::new(client.clone(), environment(), Some(repository.clone()));
        store.fetch_app_config("app-id").await.unwrap();
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert!(repository.value_exists("app-config"));
    }

    /// An empty response body is a distinct fetch error.
    #[tokio::test]
    async fn empty_response_is_an_error() {
        let store = AppConfigStore::new(FakeClient::empty(), environment(), None);
        match store.fetch_app_config("app-id").await {
            Err(FetchAppConfigError::EmptyResponse) => {}
            other => panic!("expected empty-response error, got {other:?}"),
        }
        assert!(!store.has_backend_config());
    }

    /// A failed fetch leaves the previous config untouched.
    #[tokio::test]
    async fn failed_fetch_keeps_previous_config() {
        let store = AppConfigStore::new(FakeClient::failing(), environment(), None);
        let before = store.config();
        assert!(store.fetch_app_config("app-id").await.is_err());
        assert_eq!(
            store.config().core_initialization_retry_count_max,
            before.core_initialization_retry_count_max
        );
    }
}
