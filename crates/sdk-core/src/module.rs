//! Module contract, initialization results, and module factories.
//!
//! A module is a pluggable unit with a stable identifier and version that the
//! orchestrator initializes. Capabilities (consent adapter, consent observer,
//! environment observer) are discovered structurally through the `as_*` cast
//! hooks rather than by explicit registration: a module advertises a
//! capability by overriding the corresponding hook to return itself.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::{debug, error};

use crate::config::{ModuleConfiguration, ModuleInfo};
use crate::consent::ConsentAdapter;
use crate::environment::EnvironmentObserver;
use crate::error::{InitializationError, ModuleError};

/// Observer notified of consent-module readiness and consent changes.
///
/// Modules implementing this capability are registered with the consent
/// manager after they initialize successfully; host observers can register
/// directly.
pub trait ConsentObserver: Send + Sync {
    /// Called once per adapter installation with the adapter's consents.
    fn on_consent_module_ready(&self, initial_consents: HashMap<String, String>);

    /// Called when consent values changed, with the modified keys and a full
    /// snapshot of the current consents.
    fn on_consent_change(
        &self,
        modified_keys: Vec<String>,
        full_consents: HashMap<String, String>,
    );
}

/// A unit the orchestrator initializes, constructed by the caller or by a
/// module factory from a backend descriptor.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// The stable module identifier.
    fn module_id(&self) -> &str;

    /// The module version string.
    fn module_version(&self) -> &str;

    /// Initializes the module. Reports success or failure exactly once.
    async fn initialize(&self, configuration: ModuleConfiguration) -> Result<(), ModuleError>;

    /// Returns the module as a consent adapter if it has that capability.
    fn as_consent_adapter(self: Arc<Self>) -> Option<Arc<dyn ConsentAdapter>> {
        None
    }

    /// Returns the module as a consent observer if it has that capability.
    fn as_consent_observer(self: Arc<Self>) -> Option<Arc<dyn ConsentObserver>> {
        None
    }

    /// Returns the module as an environment observer if it has that capability.
    fn as_environment_observer(self: Arc<Self>) -> Option<Arc<dyn EnvironmentObserver>> {
        None
    }
}

/// Observer receiving one callback per module per initialization call.
pub trait ModuleObserver: Send + Sync {
    /// Called when a module initialization reaches a terminal outcome.
    fn on_module_initialization_completed(&self, result: ModuleInitializationResult);
}

/// Immutable record of a module initialization outcome.
#[derive(Debug, Clone)]
pub struct ModuleInitializationResult {
    /// Instant the initialization sequence started.
    pub start: OffsetDateTime,
    /// Instant the terminal outcome was reached.
    pub end: OffsetDateTime,
    /// The failure, if the outcome was not a success.
    pub error: Option<InitializationError>,
    /// Module identifier, snapshotted from the module at completion.
    pub module_id: String,
    /// Module version, snapshotted from the module at completion.
    pub module_version: String,
}

impl ModuleInitializationResult {
    /// Builds a result for `module`, snapshotting its identity fields now.
    pub fn new(
        start: OffsetDateTime,
        error: Option<InitializationError>,
        module: &dyn Module,
    ) -> Self {
        Self {
            start,
            end: OffsetDateTime::now_utc(),
            error,
            module_id: module.module_id().to_owned(),
            module_version: module.module_version().to_owned(),
        }
    }

    /// Duration from initiation to the terminal outcome.
    pub fn duration(&self) -> time::Duration {
        self.end - self.start
    }
}

/// Instantiates a module from a class identifier and credentials payload.
///
/// Replaces reflection-based lookup: deployments register constructors keyed
/// by class identifier (native), or install a wrapper-provided factory
/// (non-native hosts).
#[async_trait]
pub trait ModuleFactory: Send + Sync {
    /// Returns the instantiated module, or `None` when the class identifier
    /// is unknown or the credentials are unusable.
    async fn make_module(
        &self,
        class_name: &str,
        credentials: Option<&serde_json::Value>,
    ) -> Option<Arc<dyn Module>>;
}

/// Constructor signature registered with the native factory.
pub type ModuleConstructor =
    Box<dyn Fn(Option<&serde_json::Value>) -> Option<Arc<dyn Module>> + Send + Sync>;

/// Factory instantiating native modules from a registered constructor table.
#[derive(Default)]
pub struct NativeModuleFactory {
    /// Constructors keyed by class identifier.
    constructors: RwLock<HashMap<String, ModuleConstructor>>,
}

impl fmt::Debug for NativeModuleFactory {
    /// Prints the registered class identifiers only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let classes: Vec<String> = self
            .constructors
            .read()
            .expect("constructor lock poisoned")
            .keys()
            .cloned()
            .collect();
        f.debug_struct("NativeModuleFactory")
            .field("classes", &classes)
            .finish()
    }
}

impl NativeModuleFactory {
    /// Creates a factory with no registered constructors.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor for the given class identifier, replacing any
    /// previous registration.
    pub fn register(&self, class_name: impl Into<String>, constructor: ModuleConstructor) {
        self.constructors
            .write()
            .expect("constructor lock poisoned")
            .insert(class_name.into(), constructor);
    }
}

#[async_trait]
impl ModuleFactory for NativeModuleFactory {
    async fn make_module(
        &self,
        class_name: &str,
        credentials: Option<&serde_json::Value>,
    ) -> Option<Arc<dyn Module>> {
        let constructors = self.constructors.read().expect("constructor lock poisoned");
        constructors.get(class_name)?(credentials)
    }
}

/// Instantiates backend-declared modules, native or non-native.
///
/// The non-native factory is set by a cross-platform wrapper at some
/// arbitrary point before initialization; backend descriptors carrying only a
/// non-native class name are dropped with an error when no such factory is
/// installed.
pub struct UniversalModuleFactory {
    /// Factory for native modules.
    native: Arc<dyn ModuleFactory>,
    /// Optional wrapper-provided factory for non-native modules.
    non_native: RwLock<Option<Arc<dyn ModuleFactory>>>,
}

impl fmt::Debug for UniversalModuleFactory {
    /// Prints whether a non-native factory is installed.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let has_non_native = self
            .non_native
            .read()
            .expect("factory lock poisoned")
            .is_some();
        f.debug_struct("UniversalModuleFactory")
            .field("non_native", &has_non_native)
            .finish()
    }
}

impl UniversalModuleFactory {
    /// Creates a factory with the given native factory and no non-native one.
    pub fn new(native: Arc<dyn ModuleFactory>) -> Self {
        Self {
            native,
            non_native: RwLock::new(None),
        }
    }

    /// Installs or clears the non-native module factory.
    pub fn set_non_native_factory(&self, factory: Option<Arc<dyn ModuleFactory>>) {
        *self.non_native.write().expect("factory lock poisoned") = factory;
    }

    /// Instantiates the module described by `info`, or returns `None` when
    /// the descriptor cannot be satisfied.
    pub async fn make_module(&self, info: &ModuleInfo) -> Option<Arc<dyn Module>> {
        if let Some(class_name) = &info.class_name {
            let module = self
                .native
                .make_module(class_name, info.credentials.as_ref())
                .await;
            if module.is_none() {
                error!("failed to instantiate module {}", info.identifier);
            }
            return module;
        }
        if let Some(non_native_class_name) = &info.non_native_class_name {
            let factory = self
                .non_native
                .read()
                .expect("factory lock poisoned")
                .clone();
            return match factory {
                Some(factory) => {
                    debug!(
                        "instantiating non-native module {} via wrapper factory",
                        info.identifier
                    );
                    factory
                        .make_module(non_native_class_name, info.credentials.as_ref())
                        .await
                }
                None => {
                    error!(
                        "received non-native module {} but no non-native factory is set",
                        info.identifier
                    );
                    None
                }
            };
        }
        error!("invalid module info {} with no class name", info.identifier);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PlainModule {
        id: String,
    }

    #[async_trait]
    impl Module for PlainModule {
        fn module_id(&self) -> &str {
            &self.id
        }

        fn module_version(&self) -> &str {
            "1.0.0"
        }

        async fn initialize(
            &self,
            _configuration: ModuleConfiguration,
        ) -> Result<(), ModuleError> {
            Ok(())
        }
    }

    fn info(
        class_name: Option<&str>,
        non_native_class_name: Option<&str>,
        identifier: &str,
    ) -> ModuleInfo {
        ModuleInfo {
            class_name: class_name.map(str::to_owned),
            non_native_class_name: non_native_class_name.map(str::to_owned),
            identifier: identifier.to_owned(),
            version: None,
            credentials: None,
        }
    }

    fn registered_native_factory() -> Arc<NativeModuleFactory> {
        let factory = Arc::new(NativeModuleFactory::new());
        factory.register(
            "PlainModule",
            Box::new(|_credentials| {
                Some(Arc::new(PlainModule {
                    id: "plain".into(),
                }) as Arc<dyn Module>)
            }),
        );
        factory
    }

    /// A registered class identifier resolves through the native factory.
    #[tokio::test]
    async fn universal_factory_builds_native_modules() {
        let factory = UniversalModuleFactory::new(registered_native_factory());
        let module = factory
            .make_module(&info(Some("PlainModule"), None, "plain"))
            .await
            .expect("module should instantiate");
        assert_eq!(module.module_id(), "plain");
    }

    /// An unknown class identifier produces no module.
    #[tokio::test]
    async fn universal_factory_rejects_unknown_class() {
        let factory = UniversalModuleFactory::new(registered_native_factory());
        assert!(factory
            .make_module(&info(Some("UnknownModule"), None, "unknown"))
            .await
            .is_none());
    }

    /// Non-native descriptors require the wrapper factory to be installed.
    #[tokio::test]
    async fn universal_factory_requires_non_native_factory() {
        let factory = UniversalModuleFactory::new(registered_native_factory());
        let descriptor = info(None, Some("WrapperModule"), "wrapper");
        assert!(factory.make_module(&descriptor).await.is_none());

        factory.set_non_native_factory(Some(registered_native_factory()));
        // The wrapper factory resolves by its own class table.
        assert!(factory.make_module(&descriptor).await.is_none());
        let descriptor = info(None, Some("PlainModule"), "plain");
        assert!(factory.make_module(&descriptor).await.is_some());
    }

    /// Descriptors with no class name at all are invalid.
    #[tokio::test]
    async fn universal_factory_rejects_empty_descriptor() {
        let factory = UniversalModuleFactory::new(registered_native_factory());
        assert!(factory.make_module(&info(None, None, "empty")).await.is_none());
    }

    /// Result identity fields are snapshotted from the module.
    #[test]
    fn result_snapshots_module_identity() {
        let module = PlainModule { id: "plain".into() };
        let start = OffsetDateTime::now_utc();
        let result = ModuleInitializationResult::new(start, None, &module);
        assert_eq!(result.module_id, "plain");
        assert_eq!(result.module_version, "1.0.0");
        assert!(result.error.is_none());
        assert!(result.duration() >= time::Duration::ZERO);
    }
}
