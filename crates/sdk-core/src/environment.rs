//! Environment seams consumed by the initialization subsystem.
//!
//! Device and app property collection is out of scope for this crate; the
//! orchestrator only depends on the narrow contracts below. Production hosts
//! inject real providers, tests inject static ones.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use async_trait::async_trait;
use time::OffsetDateTime;
use tracing::{debug, info};
use uuid::Uuid;

/// Environment property kinds announced to [`EnvironmentObserver`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentProperty {
    /// The cached user agent was resolved or changed.
    UserAgent,
    /// The network connection type changed.
    NetworkConnectionType,
    /// A new app session was started.
    Session,
    /// The vendor identifier or its scope changed.
    VendorIdentifier,
}

/// Observer notified of environment property changes.
///
/// Implemented by modules (discovered structurally after successful
/// initialization) and by host-side observers.
pub trait EnvironmentObserver: Send + Sync {
    /// Called when the given property changed.
    fn on_environment_property_change(&self, property: EnvironmentProperty);
}

/// Snapshot of app/device/vendor/network metadata used to build the
/// app-config request.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentSnapshot {
    pub bundle_id: Option<String>,
    pub app_version: Option<String>,
    pub publisher_app_identifier: Option<String>,
    pub framework_name: Option<String>,
    pub framework_version: Option<String>,
    pub player_id: Option<String>,
    pub vendor_identifier: Option<String>,
    pub vendor_identifier_scope: Option<String>,
    pub locale: Option<String>,
    pub connection_type: Option<String>,
    pub os_name: String,
    pub os_version: String,
    pub screen_height: u32,
    pub screen_width: u32,
    pub screen_scale: f64,
    pub device_make: String,
    pub device_model: String,
}

/// Provides the current environment snapshot.
pub trait EnvironmentProvider: Send + Sync {
    /// Returns the metadata snapshot at this instant.
    fn snapshot(&self) -> EnvironmentSnapshot;
}

/// Environment provider returning a fixed snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironmentProvider {
    /// The snapshot handed out on every call.
    snapshot: EnvironmentSnapshot,
}

impl StaticEnvironmentProvider {
    /// Creates a provider that always returns `snapshot`.
    pub fn new(snapshot: EnvironmentSnapshot) -> Self {
        Self { snapshot }
    }
}

impl EnvironmentProvider for StaticEnvironmentProvider {
    fn snapshot(&self) -> EnvironmentSnapshot {
        self.snapshot.clone()
    }
}

/// An app session started by the first initialization call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppSession {
    /// Random session identifier.
    pub id: Uuid,
    /// Instant the session started.
    pub start: OffsetDateTime,
}

/// Holds the current app session, started at most once per process.
#[derive(Debug, Default)]
pub struct SessionInfoProvider {
    /// The current session, if one was started.
    session: RwLock<Option<AppSession>>,
}

impl SessionInfoProvider {
    /// Creates a provider with no session started yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the current session, if any.
    pub fn session(&self) -> Option<AppSession> {
        self.session.read().expect("session lock poisoned").clone()
    }

    /// Starts a session if none exists. Returns true when a new session was
    /// started by this call.
    pub fn start_if_needed(&self) -> bool {
        let mut guard = self.session.write().expect("session lock poisoned");
        if guard.is_some() {
            return false;
        }
        let session = AppSession {
            id: Uuid::new_v4(),
            start: OffsetDateTime::now_utc(),
        };
        info!("started app session {}", session.id);
        *guard = Some(session);
        true
    }
}

/// Resolves the expensive-to-compute user agent string.
#[async_trait]
pub trait UserAgentResolver: Send + Sync {
    /// Computes the user agent, returning `None` on failure.
    async fn resolve(&self) -> Option<String>;
}

/// Caches the user agent after the first successful resolution.
pub struct UserAgentProvider {
    /// Injected resolver performing the one-time expensive computation.
    resolver: Arc<dyn UserAgentResolver>,
    /// Cached result of the first successful resolution.
    cached: RwLock<Option<String>>,
}

impl fmt::Debug for UserAgentProvider {
    /// Prints only the cached value to avoid requiring `Debug` resolvers.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserAgentProvider")
            .field("cached", &self.cached)
            .finish()
    }
}

impl UserAgentProvider {
    /// Creates a provider around the given resolver.
    pub fn new(resolver: Arc<dyn UserAgentResolver>) -> Self {
        Self {
            resolver,
            cached: RwLock::new(None),
        }
    }

    /// Returns the user agent, resolving and caching it on first success.
    pub async fn user_agent(&self) -> Option<String> {
        if let Some(cached) = self
            .cached
            .read()
            .expect("user agent lock poisoned")
            .clone()
        {
            return Some(cached);
        }
        let resolved = self.resolver.resolve().await?;
        let mut guard = self.cached.write().expect("user agent lock poisoned");
        // Another caller may have resolved concurrently; first write wins.
        if guard.is_none() {
            *guard = Some(resolved.clone());
        }
        Some(guard.clone().unwrap_or(resolved))
    }
}

/// Starts the host's reachability notifier. Starting twice is a no-op.
pub trait NetworkStatusNotifier: Send + Sync {
    /// Starts the notifier if it is not already running.
    fn start(&self);
}

/// Default notifier that only tracks the started flag.
///
/// Hosts with real reachability monitoring inject their own implementation.
#[derive(Debug, Default)]
pub struct NoopNetworkStatusNotifier {
    /// Whether `start` was already called.
    started: AtomicBool,
}

impl NetworkStatusNotifier for NoopNetworkStatusNotifier {
    fn start(&self) {
        if !self.started.swap(true, Ordering::SeqCst) {
            debug!("network status notifier started");
        }
    }
}

/// Fans environment property changes out to weakly-held observers.
///
/// Observer liveness is checked on every publish; dead entries are purged
/// lazily. Each observer callback runs on its own spawned task so a slow
/// observer cannot delay the others.
#[derive(Default)]
pub struct EnvironmentChangePublisher {
    /// Non-owning observer handles in registration order.
    observers: Mutex<Vec<Weak<dyn EnvironmentObserver>>>,
}

impl fmt::Debug for EnvironmentChangePublisher {
    /// Prints the observer count without requiring `Debug` observers.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = self.observers.lock().expect("observer lock poisoned").len();
        f.debug_struct("EnvironmentChangePublisher")
            .field("observers", &count)
            .finish()
    }
}

impl EnvironmentChangePublisher {
    /// Creates a publisher with no observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an observer. Duplicate registrations are ignored.
    pub fn add_observer(&self, observer: &Arc<dyn EnvironmentObserver>) {
        let mut observers = self.observers.lock().expect("observer lock poisoned");
        let handle = Arc::downgrade(observer);
        if observers
            .iter()
            .any(|existing| Weak::ptr_eq(existing, &handle))
        {
            debug!("ignoring duplicate environment observer registration");
            return;
        }
        observers.push(handle);
    }

    /// Unregisters an observer by identity.
    pub fn remove_observer(&self, observer: &Arc<dyn EnvironmentObserver>) {
        let mut observers = self.observers.lock().expect("observer lock poisoned");
        let handle = Arc::downgrade(observer);
        observers.retain(|existing| !Weak::ptr_eq(existing, &handle));
    }

    /// Notifies all live observers of a property change, purging dead ones.
    pub fn publish(&self, property: EnvironmentProperty) {
        let live: Vec<Arc<dyn EnvironmentObserver>> = {
            let mut observers = self.observers.lock().expect("observer lock poisoned");
            observers.retain(|handle| handle.strong_count() > 0);
            observers
                .iter()
                .filter_map(Weak::upgrade)
                .collect()
        };
        for observer in live {
            tokio::spawn(async move {
                observer.on_environment_property_change(property);
            });
        }
    }
}
