//! Per-module initialization with retry.

use std::sync::Arc;

use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::backoff::retry_delay;
use crate::config::ModuleConfiguration;
use crate::error::InitializationError;
use crate::module::{Module, ModuleInitializationResult};
use crate::store::AppConfigStore;

/// Drives one module's initialize hook to a terminal outcome.
///
/// Failed attempts are retried with exponential backoff. Retry limits and
/// delays are read from the current app config at each attempt, so a fresher
/// backend config arriving mid-retry takes effect immediately. Exactly one
/// result is produced per call; failures are captured into the result, never
/// returned as errors.
#[derive(Debug, Clone)]
pub struct ModuleInitializer {
    store: AppConfigStore,
}

impl ModuleInitializer {
    /// Creates an initializer reading retry parameters from `store`.
    pub fn new(store: AppConfigStore) -> Self {
        Self { store }
    }

    /// Initializes `module`, retrying failures until success or exhaustion.
    pub async fn initialize(
        &self,
        module: Arc<dyn Module>,
        configuration: ModuleConfiguration,
    ) -> ModuleInitializationResult {
        let start = OffsetDateTime::now_utc();
        let mut attempt: u32 = 1;
        loop {
            debug!(
                module = module.module_id(),
                attempt, "initializing module"
            );
            match module.initialize(configuration.clone()).await {
                Ok(()) => {
                    info!(module = module.module_id(), "module initialized");
                    return ModuleInitializationResult::new(start, None, module.as_ref());
                }
                Err(error) => {
                    let config = self.store.config();
                    if attempt > config.module_initialization_retry_count_max {
                        warn!(
                            module = module.module_id(),
                            "module initialization failed after {attempt} attempts: {error}"
                        );
                        return ModuleInitializationResult::new(
                            start,
                            Some(InitializationError::module(error)),
                            module.as_ref(),
                        );
                    }
                    let delay = retry_delay(
                        attempt,
                        config.module_initialization_delay_base,
                        config.module_initialization_delay_max,
                    );
                    warn!(
                        module = module.module_id(),
                        "module initialization attempt {attempt} failed, \
                         retrying in {delay:?}: {error}"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::environment::StaticEnvironmentProvider;
    use crate::error::ModuleError;
    use crate::http::{AppConfigClient, AppConfigRequestBody, AppConfigResponsePayload, HttpError};

    /// Module failing until a configured number of calls is reached.
    struct FlakyModule {
        calls: AtomicU32,
        succeed_on_call: Option<u32>,
    }

    impl FlakyModule {
        fn failing_forever() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                succeed_on_call: None,
            })
        }

        fn succeeding_on(call: u32) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU32::new(0),
                succeed_on_call: Some(call),
            })
        }
    }

    #[async_trait]
    impl Module for FlakyModule {
        fn module_id(&self) -> &str {
            "flaky"
        }

        fn module_version(&self) -> &str {
            "0.1.0"
        }

        async fn initialize(
            &self,
            _configuration: ModuleConfiguration,
        ) -> Result<(), ModuleError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            match self.succeed_on_call {
                Some(target) if call >= target => Ok(()),
                _ => Err("init failed".into()),
            }
        }
    }

    /// Client that never answers successfully, for stores used only as a
    /// config source.
    struct OfflineClient;

    #[async_trait]
    impl AppConfigClient for OfflineClient {
        async fn fetch_app_config(
            &self,
            _request: &AppConfigRequestBody,
        ) -> Result<Option<AppConfigResponsePayload>, HttpError> {
            Err(HttpError::Retryable(503))
        }
    }

    fn store() -> AppConfigStore {
        AppConfigStore::new(
            Arc::new(OfflineClient),
            Arc::new(StaticEnvironmentProvider::default()),
            None,
        )
    }

    fn store_with_module_retry_max(count: u32) -> AppConfigStore {
        let store = store();
        let payload: AppConfigResponsePayload = serde_json::from_value(json!({
            "platform": { "moduleInitializationRetryCountMax": count }
        }))
        .unwrap();
        store.install_backend_config(&payload);
        store
    }

    fn configuration() -> ModuleConfiguration {
        ModuleConfiguration {
            app_identifier: "app-id".into(),
        }
    }

    /// A permanently failing module is invoked once plus the retry limit,
    /// then reports one failure.
    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_report_one_failure() {
        let module = FlakyModule::failing_forever();
        let initializer = ModuleInitializer::new(store());
        let result = initializer
            .initialize(module.clone(), configuration())
            .await;
        assert_eq!(module.calls.load(Ordering::SeqCst), 4);
        assert!(result.error.is_some());
        assert_eq!(result.module_id, "flaky");
    }

    /// Retry delays follow the backoff sequence from the current config.
    #[tokio::test(start_paused = true)]
    async fn retries_wait_the_backoff_sequence() {
        let module = FlakyModule::failing_forever();
        let initializer = ModuleInitializer::new(store());
        let begin = tokio::time::Instant::now();
        initializer.initialize(module, configuration()).await;
        // Three retries at 1s, 2s, 4s with the default base and cap.
        assert_eq!(begin.elapsed(), Duration::from_secs(7));
    }

    /// Success mid-retry stops the loop and reports success.
    #[tokio::test(start_paused = true)]
    async fn success_after_retries_reports_success() {
        let module = FlakyModule::succeeding_on(3);
        let initializer = ModuleInitializer::new(store());
        let result = initializer
            .initialize(module.clone(), configuration())
            .await;
        assert_eq!(module.calls.load(Ordering::SeqCst), 3);
        assert!(result.error.is_none());
        assert_eq!(result.module_version, "0.1.0");
    }

    /// A zero retry limit from the backend config means a single attempt.
    #[tokio::test(start_paused = true)]
    async fn zero_retry_limit_attempts_once() {
        let module = FlakyModule::failing_forever();
        let initializer = ModuleInitializer::new(store_with_module_retry_max(0));
        let result = initializer
            .initialize(module.clone(), configuration())
            .await;
        assert_eq!(module.calls.load(Ordering::SeqCst), 1);
        assert!(result.error.is_some());
    }
}
