//! Consent manager forwarding to the active adapter and fanning changes out
//! to observers.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tracing::{debug, info};

use crate::backoff::RetryTimer;
use crate::config::DEFAULT_CONSENT_UPDATE_BATCH_DELAY;
use crate::consent::adapter::{
    ConsentAdapter, ConsentAdapterDelegate, ConsentDialogType, ConsentStatusSource,
};
use crate::module::ConsentObserver;

/// Proxy between the host, the active consent adapter module, and consent
/// observers.
///
/// All consent operations are forwarded to the installed adapter, or complete
/// with `false`/empty when none is installed. Per-key change callbacks from
/// the adapter are forwarded to observers immediately when the batch delay is
/// zero, or coalesced into one notification per delay window otherwise.
#[derive(Clone)]
pub struct ConsentManager {
    shared: Arc<Shared>,
}

impl fmt::Debug for ConsentManager {
    /// Prints adapter presence and observer count only.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock().expect("consent lock poisoned");
        f.debug_struct("ConsentManager")
            .field("adapter_installed", &state.adapter.is_some())
            .field("observers", &state.observers.len())
            .finish()
    }
}

struct Shared {
    /// Handle to this shared state, handed to adapters as their delegate.
    self_ref: Weak<Shared>,
    /// Serialized batching and registry state.
    state: Mutex<State>,
}

struct State {
    /// The active adapter, if a consent module initialized successfully.
    adapter: Option<Arc<dyn ConsentAdapter>>,
    /// Non-owning observer handles in registration order.
    observers: Vec<Weak<dyn ConsentObserver>>,
    /// Delay window for coalescing change notifications.
    batch_delay: Duration,
    /// Keys changed since the last flush, in first-seen order.
    pending_keys: Vec<String>,
    /// Debounce timer, armed while a flush is pending.
    batch_timer: Option<RetryTimer>,
}

impl State {
    /// Purges dead observers and upgrades the live ones.
    fn live_observers(&mut self) -> Vec<Arc<dyn ConsentObserver>> {
        self.observers.retain(|handle| handle.strong_count() > 0);
        self.observers.iter().filter_map(Weak::upgrade).collect()
    }
}

impl Default for ConsentManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsentManager {
    /// Creates a manager with no adapter, no observers, and the default
    /// batch delay.
    pub fn new() -> Self {
        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| Shared {
            self_ref: weak.clone(),
            state: Mutex::new(State {
                adapter: None,
                observers: Vec::new(),
                batch_delay: DEFAULT_CONSENT_UPDATE_BATCH_DELAY,
                pending_keys: Vec::new(),
                batch_timer: None,
            }),
        });
        Self { shared }
    }

    /// Updates the coalescing window for change notifications.
    pub fn set_batch_delay(&self, delay: Duration) {
        self.shared.state.lock().expect("consent lock poisoned").batch_delay = delay;
    }

    /// Whether the active adapter wants consent collected. `false` without
    /// an adapter.
    pub fn should_collect_consent(&self) -> bool {
        self.active_adapter()
            .map(|adapter| adapter.should_collect_consent())
            .unwrap_or(false)
    }

    /// Snapshot of the current consents. Empty without an adapter.
    pub fn consents(&self) -> HashMap<String, String> {
        self.active_adapter()
            .map(|adapter| adapter.consents())
            .unwrap_or_default()
    }

    /// Forwards a consent grant to the active adapter.
    pub async fn grant_consent(&self, source: ConsentStatusSource) -> bool {
        match self.active_adapter() {
            Some(adapter) => adapter.grant_consent(source).await,
            None => {
                debug!("grant_consent ignored, no consent adapter installed");
                false
            }
        }
    }

    /// Forwards a consent denial to the active adapter.
    pub async fn deny_consent(&self, source: ConsentStatusSource) -> bool {
        match self.active_adapter() {
            Some(adapter) => adapter.deny_consent(source).await,
            None => {
                debug!("deny_consent ignored, no consent adapter installed");
                false
            }
        }
    }

    /// Forwards a consent reset to the active adapter.
    pub async fn reset_consent(&self) -> bool {
        match self.active_adapter() {
            Some(adapter) => adapter.reset_consent().await,
            None => {
                debug!("reset_consent ignored, no consent adapter installed");
                false
            }
        }
    }

    /// Forwards a dialog request to the active adapter.
    pub async fn show_consent_dialog(&self, dialog: ConsentDialogType) -> bool {
        match self.active_adapter() {
            Some(adapter) => adapter.show_consent_dialog(dialog).await,
            None => {
                debug!("show_consent_dialog ignored, no consent adapter installed");
                false
            }
        }
    }

    /// Returns the active adapter, if one is installed.
    pub fn active_adapter(&self) -> Option<Arc<dyn ConsentAdapter>> {
        self.shared
            .state
            .lock()
            .expect("consent lock poisoned")
            .adapter
            .clone()
    }

    /// Installs a new adapter, detaching the previous one.
    ///
    /// Pending changes from the previous adapter are discarded. Every
    /// registered observer receives one module-ready notification with the
    /// new adapter's consents.
    pub fn set_adapter(&self, adapter: Option<Arc<dyn ConsentAdapter>>) {
        let ready = {
            let mut state = self.shared.state.lock().expect("consent lock poisoned");
            if let Some(previous) = state.adapter.take() {
                previous.set_delegate(None);
            }
            if let Some(timer) = state.batch_timer.take() {
                timer.cancel();
            }
            state.pending_keys.clear();
            match adapter {
                Some(adapter) => {
                    let delegate: Weak<dyn ConsentAdapterDelegate> = self.shared.self_ref.clone();
                    adapter.set_delegate(Some(delegate));
                    let snapshot = adapter.consents();
                    state.adapter = Some(adapter);
                    info!("consent adapter installed");
                    Some((state.live_observers(), snapshot))
                }
                None => None,
            }
        };
        if let Some((observers, snapshot)) = ready {
            for observer in observers {
                let snapshot = snapshot.clone();
                tokio::spawn(async move {
                    observer.on_consent_module_ready(snapshot);
                });
            }
        }
    }

    /// Registers an observer. Duplicate registrations are ignored.
    ///
    /// Observers added while an adapter is already active receive the
    /// module-ready notification immediately.
    pub fn add_observer(&self, observer: &Arc<dyn ConsentObserver>) {
        let replay = {
            let mut state = self.shared.state.lock().expect("consent lock poisoned");
            let handle = Arc::downgrade(observer);
            if state
                .observers
                .iter()
                .any(|existing| Weak::ptr_eq(existing, &handle))
            {
                debug!("ignoring duplicate consent observer registration");
                return;
            }
            state.observers.push(handle);
            state.adapter.as_ref().map(|adapter| adapter.consents())
        };
        if let Some(snapshot) = replay {
            let observer = Arc::clone(observer);
            tokio::spawn(async move {
                observer.on_consent_module_ready(snapshot);
            });
        }
    }

    /// Unregisters an observer by identity.
    pub fn remove_observer(&self, observer: &Arc<dyn ConsentObserver>) {
        let mut state = self.shared.state.lock().expect("consent lock poisoned");
        let handle = Arc::downgrade(observer);
        state
            .observers
            .retain(|existing| !Weak::ptr_eq(existing, &handle));
    }
}

impl Shared {
    /// Delivers the accumulated key set plus a fresh consents snapshot, then
    /// clears the pending state.
    fn flush_pending(&self) {
        let batch = {
            let mut state = self.state.lock().expect("consent lock poisoned");
            state.batch_timer = None;
            if state.pending_keys.is_empty() {
                return;
            }
            let keys = std::mem::take(&mut state.pending_keys);
            let snapshot = state
                .adapter
                .as_ref()
                .map(|adapter| adapter.consents())
                .unwrap_or_default();
            (state.live_observers(), keys, snapshot)
        };
        dispatch_change(batch.0, batch.1, batch.2);
    }
}

impl ConsentAdapterDelegate for Shared {
    fn on_consent_change(&self, key: String) {
        let mut state = self.state.lock().expect("consent lock poisoned");
        if state.adapter.is_none() {
            return;
        }
        if state.batch_delay.is_zero() {
            let snapshot = state
                .adapter
                .as_ref()
                .map(|adapter| adapter.consents())
                .unwrap_or_default();
            let observers = state.live_observers();
            drop(state);
            dispatch_change(observers, vec![key], snapshot);
            return;
        }
        if !state.pending_keys.contains(&key) {
            state.pending_keys.push(key);
        }
        if state.batch_timer.is_none() {
            let shared = self.self_ref.clone();
            state.batch_timer = Some(RetryTimer::schedule(state.batch_delay, move || {
                if let Some(shared) = shared.upgrade() {
                    shared.flush_pending();
                }
            }));
        }
    }
}

/// Notifies each observer of a change on its own spawned task.
fn dispatch_change(
    observers: Vec<Arc<dyn ConsentObserver>>,
    keys: Vec<String>,
    snapshot: HashMap<String, String>,
) {
    for observer in observers {
        let keys = keys.clone();
        let snapshot = snapshot.clone();
        tokio::spawn(async move {
            observer.on_consent_change(keys, snapshot);
        });
    }
}
