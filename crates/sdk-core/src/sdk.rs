//! SDK initialization orchestrator.
//!
//! Drives the full initialization sequence: one-time session start and user
//! agent prefetch, client-side module admission, the app config fetch with
//! SDK-level retry, backend-side module instantiation, and fan-out of every
//! terminal module outcome to the registered observer.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backoff::{retry_delay, RetryTimer};
use crate::config::{ModuleConfiguration, SdkConfiguration};
use crate::consent::ConsentManager;
use crate::environment::{
    EnvironmentChangePublisher, EnvironmentProperty, NetworkStatusNotifier, SessionInfoProvider,
    UserAgentProvider,
};
use crate::error::InitializationError;
use crate::initializer::ModuleInitializer;
use crate::module::{Module, ModuleInitializationResult, ModuleObserver, UniversalModuleFactory};
use crate::store::{AppConfigStore, FetchAppConfigError};

/// Orchestrator lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// No successful fetch yet; a retry may be scheduled.
    NotInitialized,
    /// A fetch is in flight.
    Initializing,
    /// A backend config was fetched and is authoritative.
    Initialized,
}

/// What an initialization call should do, decided under the state lock.
enum CallAction {
    /// A fetch is already in flight; only the observer was updated.
    Ignore,
    /// Start a fresh fetch.
    Fetch,
    /// Reuse the cached config and re-run backend module admission only.
    BackendOnly,
}

/// Entry point for SDK initialization.
///
/// All collaborators are constructor-injected; hosts normally build one
/// through the assembly in `bootstrap`. The orchestrator owns the
/// initialized-module set, the in-flight registry, and the consent-adapter
/// selection; callers only interact through [`initialize_sdk`] and the
/// observer callbacks.
///
/// [`initialize_sdk`]: SdkOrchestrator::initialize_sdk
#[derive(Clone)]
pub struct SdkOrchestrator {
    shared: Arc<Shared>,
}

impl fmt::Debug for SdkOrchestrator {
    /// Prints the phase and module bookkeeping counts.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock().expect("orchestrator lock poisoned");
        f.debug_struct("SdkOrchestrator")
            .field("phase", &state.phase)
            .field("initialized", &state.initialized.keys().collect::<Vec<_>>())
            .field("in_flight", &state.in_flight.keys().collect::<Vec<_>>())
            .finish()
    }
}

struct Shared {
    /// Handle to this shared state, captured by spawned tasks and timers.
    self_ref: Weak<Shared>,
    /// Config store driving fetch and retry parameters.
    store: AppConfigStore,
    /// Consent proxy receiving the adapter and consent-capable observers.
    consent: ConsentManager,
    /// Publisher receiving environment-capable modules as observers.
    environment: Arc<EnvironmentChangePublisher>,
    /// Session holder, started on the first initialization call.
    session: Arc<SessionInfoProvider>,
    /// User agent cache, prefetched on the first initialization call.
    user_agent: Arc<UserAgentProvider>,
    /// Reachability notifier, started idempotently on every call.
    network_notifier: Arc<dyn NetworkStatusNotifier>,
    /// Factory instantiating backend-declared modules.
    module_factory: Arc<UniversalModuleFactory>,
    /// Serialized orchestrator state.
    state: Mutex<State>,
}

struct State {
    phase: Phase,
    /// Number of fetch retries consumed in the current call chain.
    fetch_retry_count: u32,
    /// The accepted application identifier, set once.
    app_identifier: Option<String>,
    /// Last-write-wins module observer.
    observer: Option<Weak<dyn ModuleObserver>>,
    /// Successfully initialized modules, retained permanently by identifier.
    initialized: HashMap<String, Arc<dyn Module>>,
    /// Tasks for modules currently mid-initialization, keyed by identifier.
    in_flight: HashMap<String, JoinHandle<()>>,
    /// Whether a consent adapter is active on the consent manager.
    adapter_installed: bool,
    /// Identifier of the consent-adapter candidate currently initializing.
    pending_adapter_id: Option<String>,
    /// SDK-level retry timer, armed while a fetch retry is scheduled.
    retry_timer: Option<RetryTimer>,
}

impl State {
    /// True when no consent adapter is active or mid-initialization.
    fn consent_adapter_missing(&self) -> bool {
        !self.adapter_installed && self.pending_adapter_id.is_none()
    }
}

impl SdkOrchestrator {
    /// Creates an orchestrator from its collaborators.
    pub fn new(
        store: AppConfigStore,
        consent: ConsentManager,
        environment: Arc<EnvironmentChangePublisher>,
        session: Arc<SessionInfoProvider>,
        user_agent: Arc<UserAgentProvider>,
        network_notifier: Arc<dyn NetworkStatusNotifier>,
        module_factory: Arc<UniversalModuleFactory>,
    ) -> Self {
        Self {
            shared: Arc::new_cyclic(|weak: &Weak<Shared>| Shared {
                self_ref: weak.clone(),
                store,
                consent,
                environment,
                session,
                user_agent,
                network_notifier,
                module_factory,
                state: Mutex::new(State {
                    phase: Phase::NotInitialized,
                    fetch_retry_count: 0,
                    app_identifier: None,
                    observer: None,
                    initialized: HashMap::new(),
                    in_flight: HashMap::new(),
                    adapter_installed: false,
                    pending_adapter_id: None,
                    retry_timer: None,
                }),
            }),
        }
    }

    /// Initializes the SDK and all admitted modules.
    ///
    /// Returns nothing; every module outcome is delivered through `observer`.
    /// Calling again while a fetch is in flight only replaces the observer.
    /// Calling again after a successful fetch re-runs backend module
    /// admission against the cached config, which allows previously failed
    /// modules to be retried without a fresh network round-trip.
    pub fn initialize_sdk(
        &self,
        configuration: SdkConfiguration,
        observer: Option<Arc<dyn ModuleObserver>>,
    ) {
        let shared = &self.shared;
        let (action, app_identifier) = {
            let mut state = shared.state.lock().expect("orchestrator lock poisoned");
            match &state.app_identifier {
                Some(accepted) if *accepted != configuration.app_identifier => {
                    warn!(
                        "ignoring app identifier {:?}, keeping previously accepted {:?}",
                        configuration.app_identifier, accepted
                    );
                }
                Some(_) => {}
                None => state.app_identifier = Some(configuration.app_identifier.clone()),
            }
            if let Some(observer) = &observer {
                if state.observer.as_ref().and_then(Weak::upgrade).is_some() {
                    warn!("replacing an active module observer");
                }
                state.observer = Some(Arc::downgrade(observer));
            }
            let action = match state.phase {
                Phase::Initializing => CallAction::Ignore,
                Phase::Initialized => CallAction::BackendOnly,
                Phase::NotInitialized => {
                    // A fresh external call supersedes any scheduled retry.
                    if let Some(timer) = state.retry_timer.take() {
                        timer.cancel();
                    }
                    state.phase = Phase::Initializing;
                    CallAction::Fetch
                }
            };
            let app_identifier = state.app_identifier.clone().unwrap_or_default();
            (action, app_identifier)
        };

        if matches!(action, CallAction::Ignore) {
            info!("initialization already in progress, ignoring call");
            return;
        }

        if shared.session.start_if_needed() {
            shared.environment.publish(EnvironmentProperty::Session);
            let prefetch = Arc::clone(shared);
            tokio::spawn(async move {
                if prefetch.user_agent.user_agent().await.is_some() {
                    prefetch.environment.publish(EnvironmentProperty::UserAgent);
                }
            });
        }
        shared.network_notifier.start();

        let module_configuration = ModuleConfiguration {
            app_identifier: app_identifier.clone(),
        };
        shared.admit_batch(
            configuration.modules.clone(),
            &configuration.skipped_module_ids,
            &module_configuration,
        );

        match action {
            CallAction::Fetch => shared.spawn_fetch(configuration),
            CallAction::BackendOnly => shared.spawn_backend_batch(configuration),
            CallAction::Ignore => unreachable!("handled above"),
        }
    }

    /// Identifiers of all successfully initialized modules.
    pub fn initialized_module_ids(&self) -> Vec<String> {
        let state = self.shared.state.lock().expect("orchestrator lock poisoned");
        state.initialized.keys().cloned().collect()
    }

    /// Cancels the scheduled fetch retry and aborts in-flight module
    /// initializations.
    ///
    /// Already-initialized modules are retained; a later initialization call
    /// starts a fresh call chain.
    pub fn teardown(&self) {
        let mut state = self.shared.state.lock().expect("orchestrator lock poisoned");
        if let Some(timer) = state.retry_timer.take() {
            timer.cancel();
        }
        for (_, handle) in state.in_flight.drain() {
            handle.abort();
        }
        state.phase = Phase::NotInitialized;
        state.fetch_retry_count = 0;
        state.pending_adapter_id = None;
        info!("sdk orchestrator torn down");
    }
}

impl Shared {
    /// Upgrades the self reference for use in spawned tasks and timers.
    fn arc(&self) -> Arc<Shared> {
        self.self_ref
            .upgrade()
            .expect("orchestrator state dropped while in use")
    }

    /// The accepted application identifier, empty before the first call.
    fn accepted_identifier(&self) -> String {
        self.state
            .lock()
            .expect("orchestrator lock poisoned")
            .app_identifier
            .clone()
            .unwrap_or_default()
    }

    /// Runs the fetch on a spawned task and routes its outcome back into the
    /// state machine.
    fn spawn_fetch(&self, configuration: SdkConfiguration) {
        let shared = self.arc();
        tokio::spawn(async move {
            let app_identifier = shared.accepted_identifier();
            match shared.store.fetch_app_config(&app_identifier).await {
                Ok(()) => shared.finish_fetch_success(configuration),
                Err(error) => shared.finish_fetch_failure(configuration, error),
            }
        });
    }

    /// Transitions to `Initialized`, applies config-driven tunables, and
    /// starts the backend module batch.
    fn finish_fetch_success(&self, configuration: SdkConfiguration) {
        {
            let mut state = self.state.lock().expect("orchestrator lock poisoned");
            state.phase = Phase::Initialized;
            state.fetch_retry_count = 0;
        }
        let config = self.store.config();
        self.consent.set_batch_delay(config.consent_update_batch_delay);
        if let Some(level) = config.log_level_override() {
            info!("backend requested log level {level}");
        }
        info!("sdk initialized");
        self.spawn_backend_batch(configuration);
    }

    /// Transitions back to `NotInitialized` and schedules a retry while the
    /// budget lasts.
    fn finish_fetch_failure(
        &self,
        configuration: SdkConfiguration,
        error: FetchAppConfigError,
    ) {
        let config = self.store.config();
        let mut state = self.state.lock().expect("orchestrator lock poisoned");
        state.phase = Phase::NotInitialized;
        if state.fetch_retry_count < config.core_initialization_retry_count_max {
            state.fetch_retry_count += 1;
            let delay = retry_delay(
                state.fetch_retry_count,
                config.core_initialization_delay_base,
                config.core_initialization_delay_max,
            );
            warn!("app config fetch failed, retrying in {delay:?}: {error}");
            let shared = self.arc();
            state.retry_timer = Some(RetryTimer::schedule(delay, move || {
                shared.retry_fetch(configuration);
            }));
        } else {
            state.fetch_retry_count = 0;
            error!("sdk initialization failed after exhausting retries: {error}");
        }
    }

    /// Re-enters the fetch path from the retry timer.
    fn retry_fetch(&self, configuration: SdkConfiguration) {
        {
            let mut state = self.state.lock().expect("orchestrator lock poisoned");
            if state.phase != Phase::NotInitialized {
                return;
            }
            state.phase = Phase::Initializing;
            state.retry_timer = None;
        }
        self.spawn_fetch(configuration);
    }

    /// Instantiates the backend-declared modules and admits them.
    fn spawn_backend_batch(&self, configuration: SdkConfiguration) {
        let shared = self.arc();
        tokio::spawn(async move {
            let config = shared.store.config();
            let module_configuration = ModuleConfiguration {
                app_identifier: shared.accepted_identifier(),
            };
            let mut modules: Vec<Arc<dyn Module>> = Vec::new();
            for info in &config.modules {
                if configuration.skipped_module_ids.contains(&info.identifier) {
                    debug!(module = %info.identifier, "backend module skipped by configuration");
                    continue;
                }
                if let Some(module) = shared.module_factory.make_module(info).await {
                    modules.push(module);
                }
            }
            shared.admit_batch(
                modules,
                &configuration.skipped_module_ids,
                &module_configuration,
            );
        });
    }

    /// Applies the admission rules to a batch of modules in input order,
    /// spawning an initializer task for each admitted module.
    ///
    /// Dedup state is re-read per module, so a duplicate identifier later in
    /// the same batch is caught by the in-flight check. Every batch that ends
    /// with no consent adapter active or pending logs the missing-adapter
    /// advisory, so the warning is reached even when the config fetch never
    /// succeeds and the client-side list is the only batch.
    fn admit_batch(
        &self,
        modules: Vec<Arc<dyn Module>>,
        skipped: &HashSet<String>,
        module_configuration: &ModuleConfiguration,
    ) {
        for module in modules {
            let id = module.module_id().to_owned();
            if skipped.contains(&id) {
                debug!(module = %id, "module skipped by configuration");
                continue;
            }
            let mut state = self.state.lock().expect("orchestrator lock poisoned");
            if state.initialized.contains_key(&id) {
                debug!(module = %id, "module already initialized, reporting success");
                let result = ModuleInitializationResult::new(
                    OffsetDateTime::now_utc(),
                    None,
                    module.as_ref(),
                );
                let observer = state.observer.clone();
                drop(state);
                dispatch_result(observer, result);
                continue;
            }
            if state.in_flight.contains_key(&id) {
                debug!(module = %id, "module initialization in flight, dropping duplicate");
                continue;
            }
            if module.clone().as_consent_adapter().is_some() {
                let dropped_extra = state.adapter_installed
                    || matches!(&state.pending_adapter_id, Some(pending) if *pending != id);
                if dropped_extra {
                    warn!(module = %id, "dropping extra consent adapter module");
                    let result = ModuleInitializationResult::new(
                        OffsetDateTime::now_utc(),
                        Some(InitializationError::MultipleConsentAdapters),
                        module.as_ref(),
                    );
                    let observer = state.observer.clone();
                    drop(state);
                    dispatch_result(observer, result);
                    continue;
                }
                state.pending_adapter_id = Some(id.clone());
            }
            let shared = self.arc();
            let task_module = Arc::clone(&module);
            let task_configuration = module_configuration.clone();
            let handle = tokio::spawn(async move {
                let result = ModuleInitializer::new(shared.store.clone())
                    .initialize(Arc::clone(&task_module), task_configuration)
                    .await;
                shared.complete_module_initialization(task_module, result);
            });
            // Holding the lock across the spawn keeps the completion handler
            // from running before the in-flight entry exists.
            state.in_flight.insert(id, handle);
        }
        let state = self.state.lock().expect("orchestrator lock poisoned");
        if state.consent_adapter_missing() {
            warn!("no consent adapter module was provided, consent signals will be empty");
        }
    }

    /// Records a terminal module outcome and notifies the observer.
    fn complete_module_initialization(
        &self,
        module: Arc<dyn Module>,
        result: ModuleInitializationResult,
    ) {
        let id = result.module_id.clone();
        let succeeded = result.error.is_none();
        let (observer, install_adapter) = {
            let mut state = self.state.lock().expect("orchestrator lock poisoned");
            state.in_flight.remove(&id);
            let mut install_adapter = false;
            if succeeded {
                state.initialized.insert(id.clone(), Arc::clone(&module));
                if state.pending_adapter_id.as_deref() == Some(id.as_str()) {
                    state.pending_adapter_id = None;
                    state.adapter_installed = true;
                    install_adapter = true;
                }
            } else if state.pending_adapter_id.as_deref() == Some(id.as_str()) {
                // A later candidate may still become the active adapter.
                state.pending_adapter_id = None;
            }
            (state.observer.clone(), install_adapter)
        };
        if succeeded {
            if let Some(consent_observer) = module.clone().as_consent_observer() {
                self.consent.add_observer(&consent_observer);
            }
            if let Some(environment_observer) = module.clone().as_environment_observer() {
                self.environment.add_observer(&environment_observer);
            }
            if install_adapter {
                if let Some(adapter) = module.clone().as_consent_adapter() {
                    self.consent.set_adapter(Some(adapter));
                }
            }
        }
        dispatch_result(observer, result);
    }
}

/// Delivers a result to the observer on a spawned task, if it is still alive.
fn dispatch_result(
    observer: Option<Weak<dyn ModuleObserver>>,
    result: ModuleInitializationResult,
) {
    let Some(observer) = observer.and_then(|weak| weak.upgrade()) else {
        return;
    };
    tokio::spawn(async move {
        observer.on_module_initialization_completed(result);
    });
}
