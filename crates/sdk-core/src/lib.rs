//! Public entry points for the SDK core crate.
//!
//! The module re-exports the building blocks required to assemble the SDK,
//! plug in modules, and observe initialization and consent outcomes without
//! digging into the internal module layout.

pub mod backoff;
pub mod bootstrap;
pub mod config;
pub mod consent;
pub mod environment;
pub mod error;
pub mod http;
pub mod initializer;
pub mod module;
pub mod persistence;
pub mod sdk;
pub mod store;

pub use backoff::{retry_delay, RetryTimer};
pub use bootstrap::{AssemblyError, Sdk, SdkAssembly};
pub use config::{AppConfig, ModuleConfiguration, ModuleInfo, SdkConfiguration};
pub use consent::{
    ConsentAdapter, ConsentAdapterDelegate, ConsentDialogType, ConsentManager,
    ConsentStatusSource,
};
pub use environment::{
    AppSession, EnvironmentChangePublisher, EnvironmentObserver, EnvironmentProperty,
    EnvironmentProvider, EnvironmentSnapshot, NetworkStatusNotifier, SessionInfoProvider,
    UserAgentProvider, UserAgentResolver,
};
pub use error::{InitializationError, ModuleError};
pub use http::{AppConfigClient, HttpAppConfigClient, HttpError};
pub use initializer::ModuleInitializer;
pub use module::{
    ConsentObserver, Module, ModuleFactory, ModuleInitializationResult, ModuleObserver,
    NativeModuleFactory, UniversalModuleFactory,
};
pub use persistence::{JsonRepository, PersistenceError};
pub use sdk::SdkOrchestrator;
pub use store::{AppConfigStore, FetchAppConfigError};

#[cfg(test)]
mod tests {
    use super::*;

    /// Ensures callers can build a configuration through the crate root.
    #[test]
    fn configuration_types_are_reexported() {
        let mut configuration = SdkConfiguration::new("app-id");
        configuration.skipped_module_ids.insert("skipped".into());
        assert_eq!(configuration.app_identifier, "app-id");
        assert!(configuration.modules.is_empty());
    }

    /// The default app config carries the documented fallback tunables.
    #[test]
    fn default_config_is_usable() {
        let config = AppConfig::default();
        assert_eq!(config.core_initialization_retry_count_max, 3);
        assert_eq!(config.module_initialization_retry_count_max, 3);
        assert!(config.modules.is_empty());
    }
}
