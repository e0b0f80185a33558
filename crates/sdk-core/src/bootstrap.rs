//! Assembly helpers for hosts embedding the SDK.
//!
//! This module turns a small set of host-provided inputs into a fully wired
//! [`Sdk`] facade. Every collaborator can be substituted for testing; the
//! assembly only fills in the production defaults.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::config::SdkConfiguration;
use crate::consent::ConsentManager;
use crate::environment::{
    AppSession, EnvironmentChangePublisher, EnvironmentProvider, NetworkStatusNotifier,
    NoopNetworkStatusNotifier, SessionInfoProvider, StaticEnvironmentProvider, UserAgentProvider,
    UserAgentResolver,
};
use crate::http::{HttpAppConfigClient, SDK_VERSION};
use crate::module::{ModuleFactory, ModuleObserver, NativeModuleFactory, UniversalModuleFactory};
use crate::persistence::JsonRepository;
use crate::sdk::SdkOrchestrator;
use crate::store::AppConfigStore;

/// Error surfaced when assembly prerequisites are not met.
#[derive(Debug, thiserror::Error)]
pub enum AssemblyError {
    /// Failed to construct the HTTP client.
    #[error("http client error: {0}")]
    Http(#[from] crate::http::HttpError),
    /// Failed to create the on-disk cache directory.
    #[error("persistence error: {0}")]
    Persistence(#[from] crate::persistence::PersistenceError),
}

/// Convenience result alias used by the assembly module.
pub type Result<T> = std::result::Result<T, AssemblyError>;

/// Resolver used when the host does not provide one.
struct NullUserAgentResolver;

#[async_trait]
impl UserAgentResolver for NullUserAgentResolver {
    async fn resolve(&self) -> Option<String> {
        debug!("no user agent resolver configured");
        None
    }
}

/// Material required to construct an [`Sdk`].
pub struct SdkAssembly {
    /// App config endpoint URL.
    pub endpoint: String,
    /// Directory for the on-disk config cache; `None` disables persistence.
    pub cache_dir: Option<PathBuf>,
    /// Source of app/device metadata for config requests.
    pub environment: Arc<dyn EnvironmentProvider>,
    /// One-time user agent computation.
    pub user_agent_resolver: Arc<dyn UserAgentResolver>,
    /// Host reachability notifier.
    pub network_notifier: Arc<dyn NetworkStatusNotifier>,
    /// Constructor registry for backend-declared native modules.
    pub native_module_factory: Arc<NativeModuleFactory>,
}

impl fmt::Debug for SdkAssembly {
    /// Prints the value-typed inputs only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdkAssembly")
            .field("endpoint", &self.endpoint)
            .field("cache_dir", &self.cache_dir)
            .field("native_module_factory", &self.native_module_factory)
            .finish()
    }
}

impl SdkAssembly {
    /// Creates an assembly with production defaults for the given endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            cache_dir: None,
            environment: Arc::new(StaticEnvironmentProvider::default()),
            user_agent_resolver: Arc::new(NullUserAgentResolver),
            network_notifier: Arc::new(NoopNetworkStatusNotifier::default()),
            native_module_factory: Arc::new(NativeModuleFactory::new()),
        }
    }

    /// Wires the collaborators and returns a ready [`Sdk`].
    pub fn build(self) -> Result<Sdk> {
        let client = Arc::new(HttpAppConfigClient::new(self.endpoint)?);
        let repository = match self.cache_dir {
            Some(dir) => Some(JsonRepository::new(dir)?),
            None => None,
        };
        let store = AppConfigStore::new(client, self.environment, repository);
        let consent = ConsentManager::new();
        let environment_publisher = Arc::new(EnvironmentChangePublisher::new());
        let session = Arc::new(SessionInfoProvider::new());
        let user_agent = Arc::new(UserAgentProvider::new(self.user_agent_resolver));
        let native_factory: Arc<dyn ModuleFactory> = self.native_module_factory;
        let module_factory = Arc::new(UniversalModuleFactory::new(native_factory));
        let orchestrator = SdkOrchestrator::new(
            store,
            consent.clone(),
            Arc::clone(&environment_publisher),
            Arc::clone(&session),
            user_agent,
            self.network_notifier,
            Arc::clone(&module_factory),
        );
        Ok(Sdk {
            orchestrator,
            consent,
            environment_publisher,
            session,
            module_factory,
        })
    }
}

/// Host-facing facade over the wired subsystems.
#[derive(Debug, Clone)]
pub struct Sdk {
    orchestrator: SdkOrchestrator,
    consent: ConsentManager,
    environment_publisher: Arc<EnvironmentChangePublisher>,
    session: Arc<SessionInfoProvider>,
    module_factory: Arc<UniversalModuleFactory>,
}

impl Sdk {
    /// The crate version reported to the backend.
    pub fn version() -> &'static str {
        SDK_VERSION
    }

    /// Initializes the SDK; module outcomes arrive through `observer`.
    pub fn initialize(
        &self,
        configuration: SdkConfiguration,
        observer: Option<Arc<dyn ModuleObserver>>,
    ) {
        self.orchestrator.initialize_sdk(configuration, observer);
    }

    /// The consent manager shared with initialized modules.
    pub fn consent(&self) -> &ConsentManager {
        &self.consent
    }

    /// The publisher hosts feed environment property changes into.
    pub fn environment_publisher(&self) -> &Arc<EnvironmentChangePublisher> {
        &self.environment_publisher
    }

    /// The current app session, if one was started.
    pub fn session(&self) -> Option<AppSession> {
        self.session.session()
    }

    /// Identifiers of all successfully initialized modules.
    pub fn initialized_module_ids(&self) -> Vec<String> {
        self.orchestrator.initialized_module_ids()
    }

    /// Installs or clears the factory for non-native backend modules.
    pub fn set_non_native_module_factory(&self, factory: Option<Arc<dyn ModuleFactory>>) {
        self.module_factory.set_non_native_factory(factory);
    }

    /// Cancels retries and aborts in-flight module initializations.
    pub fn teardown(&self) {
        self.orchestrator.teardown();
    }
}
