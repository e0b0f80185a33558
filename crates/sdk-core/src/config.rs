//! Configuration values for the SDK initialization subsystem.
//!
//! `SdkConfiguration` is the caller-facing value passed to every
//! initialization call. `AppConfig` is the internal, backend-defined config:
//! it always carries usable values (hardcoded defaults until a backend fetch
//! succeeds) and is merged field-by-field from the wire payload, so fields
//! omitted by the backend fall back to the defaults rather than to previous
//! cached values.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::http::AppConfigResponsePayload;
use crate::module::Module;

/// Default base delay for SDK initialization retries.
pub const DEFAULT_CORE_DELAY_BASE: Duration = Duration::from_secs(1);
/// Default cap on SDK initialization retry delays.
pub const DEFAULT_CORE_DELAY_MAX: Duration = Duration::from_secs(30);
/// Default number of SDK initialization retries.
pub const DEFAULT_CORE_RETRY_COUNT_MAX: u32 = 3;
/// Default base delay for module initialization retries.
pub const DEFAULT_MODULE_DELAY_BASE: Duration = Duration::from_secs(1);
/// Default cap on module initialization retry delays.
pub const DEFAULT_MODULE_DELAY_MAX: Duration = Duration::from_secs(30);
/// Default number of module initialization retries.
pub const DEFAULT_MODULE_RETRY_COUNT_MAX: u32 = 3;
/// Default consent-update batching delay (zero disables batching).
pub const DEFAULT_CONSENT_UPDATE_BATCH_DELAY: Duration = Duration::ZERO;

/// Configuration passed by the caller on every initialization call.
#[derive(Clone)]
pub struct SdkConfiguration {
    /// The backend-assigned application identifier.
    pub app_identifier: String,
    /// Client-side modules to initialize immediately, in input order.
    pub modules: Vec<Arc<dyn Module>>,
    /// Identifiers of modules that must not be initialized in this call.
    pub skipped_module_ids: HashSet<String>,
}

impl SdkConfiguration {
    /// Creates a configuration with no client-side modules and an empty skip list.
    pub fn new(app_identifier: impl Into<String>) -> Self {
        Self {
            app_identifier: app_identifier.into(),
            modules: Vec::new(),
            skipped_module_ids: HashSet::new(),
        }
    }
}

impl fmt::Debug for SdkConfiguration {
    /// Prints module identifiers instead of the trait objects themselves.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkConfiguration")
            .field("app_identifier", &self.app_identifier)
            .field(
                "modules",
                &self
                    .modules
                    .iter()
                    .map(|module| module.module_id().to_owned())
                    .collect::<Vec<_>>(),
            )
            .field("skipped_module_ids", &self.skipped_module_ids)
            .finish()
    }
}

/// Parameters handed to a module's initialize hook.
#[derive(Debug, Clone)]
pub struct ModuleConfiguration {
    /// The backend-assigned application identifier accepted by the orchestrator.
    pub app_identifier: String,
}

/// Backend-defined module descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// Class identifier used to instantiate the module through the native factory.
    pub class_name: Option<String>,
    /// Class identifier for modules instantiated by a non-native host wrapper.
    pub non_native_class_name: Option<String>,
    /// The stable module identifier.
    pub identifier: String,
    /// Module version hint reported by the backend.
    pub version: Option<String>,
    /// Opaque credentials payload passed to the module constructor.
    pub credentials: Option<serde_json::Value>,
}

/// Internal representation of the app config defined on the backend.
///
/// Serialized as-is to the persistence cache so a previous session's backend
/// config can be restored before the network is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base delay used when scheduling a retry of the SDK initialization.
    #[serde(with = "duration_ms")]
    pub core_initialization_delay_base: Duration,
    /// Maximum delay for a scheduled retry of the SDK initialization.
    #[serde(with = "duration_ms")]
    pub core_initialization_delay_max: Duration,
    /// Maximum number of times the SDK initialization is retried.
    pub core_initialization_retry_count_max: u32,
    /// Base delay used when scheduling a retry of a module initialization.
    #[serde(with = "duration_ms")]
    pub module_initialization_delay_base: Duration,
    /// Maximum delay for a scheduled retry of a module initialization.
    #[serde(with = "duration_ms")]
    pub module_initialization_delay_max: Duration,
    /// Maximum number of times a module initialization is retried.
    pub module_initialization_retry_count_max: u32,
    /// Delay used to coalesce consent-change notifications before fan-out.
    #[serde(with = "duration_ms")]
    pub consent_update_batch_delay: Duration,
    /// Backend log-level override, applied by the host assembly.
    pub log_level: Option<String>,
    /// Whether the app is marked as child-directed on the backend.
    pub is_child_directed: Option<bool>,
    /// Ordered module descriptors declared on the backend.
    pub modules: Vec<ModuleInfo>,
}

impl Default for AppConfig {
    /// Hardcoded fallback values used until a backend config is available.
    fn default() -> Self {
        Self {
            core_initialization_delay_base: DEFAULT_CORE_DELAY_BASE,
            core_initialization_delay_max: DEFAULT_CORE_DELAY_MAX,
            core_initialization_retry_count_max: DEFAULT_CORE_RETRY_COUNT_MAX,
            module_initialization_delay_base: DEFAULT_MODULE_DELAY_BASE,
            module_initialization_delay_max: DEFAULT_MODULE_DELAY_MAX,
            module_initialization_retry_count_max: DEFAULT_MODULE_RETRY_COUNT_MAX,
            consent_update_batch_delay: DEFAULT_CONSENT_UPDATE_BATCH_DELAY,
            log_level: None,
            is_child_directed: None,
            modules: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Builds an app config from a wire payload, filling omitted fields from
    /// `fallback`.
    pub fn merged(payload: &AppConfigResponsePayload, fallback: &AppConfig) -> Self {
        let platform = payload.platform.clone().unwrap_or_default();
        Self {
            core_initialization_delay_base: platform
                .core_initialization_delay_base_ms
                .map(Duration::from_millis)
                .unwrap_or(fallback.core_initialization_delay_base),
            core_initialization_delay_max: platform
                .core_initialization_delay_max_ms
                .map(Duration::from_millis)
                .unwrap_or(fallback.core_initialization_delay_max),
            core_initialization_retry_count_max: platform
                .core_initialization_retry_count_max
                .unwrap_or(fallback.core_initialization_retry_count_max),
            module_initialization_delay_base: platform
                .module_initialization_delay_base_ms
                .map(Duration::from_millis)
                .unwrap_or(fallback.module_initialization_delay_base),
            module_initialization_delay_max: platform
                .module_initialization_delay_max_ms
                .map(Duration::from_millis)
                .unwrap_or(fallback.module_initialization_delay_max),
            module_initialization_retry_count_max: platform
                .module_initialization_retry_count_max
                .unwrap_or(fallback.module_initialization_retry_count_max),
            consent_update_batch_delay: platform
                .consent_update_batch_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(fallback.consent_update_batch_delay),
            log_level: platform.log_level.or_else(|| fallback.log_level.clone()),
            is_child_directed: platform
                .is_child_directed
                .or(fallback.is_child_directed),
            modules: platform
                .modules
                .map(|modules| {
                    modules
                        .into_iter()
                        .map(|module| {
                            let config = module.config.unwrap_or_default();
                            ModuleInfo {
                                class_name: module.class_name,
                                non_native_class_name: module.non_native_class_name,
                                identifier: module.id,
                                version: config.version,
                                credentials: config.params,
                            }
                        })
                        .collect()
                })
                .unwrap_or_else(|| fallback.modules.clone()),
        }
    }

    /// Parses the backend log-level override into a `tracing` level.
    ///
    /// Unrecognized values are ignored with a warning so a backend typo can
    /// never silence or flood the logs.
    pub fn log_level_override(&self) -> Option<tracing::Level> {
        let value = self.log_level.as_deref()?;
        match value.to_ascii_lowercase().as_str() {
            "verbose" | "trace" => Some(tracing::Level::TRACE),
            "debug" => Some(tracing::Level::DEBUG),
            "info" => Some(tracing::Level::INFO),
            "warning" | "warn" => Some(tracing::Level::WARN),
            "error" => Some(tracing::Level::ERROR),
            other => {
                warn!("ignoring unrecognized backend log level override {other:?}");
                None
            }
        }
    }
}

/// Serde helpers encoding `Duration` fields as integer milliseconds.
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serializes a duration as whole milliseconds.
    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    /// Deserializes whole milliseconds into a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
