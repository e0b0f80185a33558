//! Consent adapter capability contract.

use std::collections::HashMap;
use std::sync::Weak;

use async_trait::async_trait;

/// Well-known consent key for the IAB TCF string.
pub const CONSENT_KEY_TCF: &str = "tcf";
/// Well-known consent key for the IAB US privacy string.
pub const CONSENT_KEY_USP: &str = "usp";
/// Well-known consent key for the CCPA opt-in flag.
pub const CONSENT_KEY_CCPA_OPT_IN: &str = "ccpa_opt_in";
/// Well-known consent key for the GDPR consent-given flag.
pub const CONSENT_KEY_GDPR_CONSENT_GIVEN: &str = "gdpr_consent_given";

/// Consent value indicating the user granted consent.
pub const CONSENT_VALUE_GRANTED: &str = "granted";
/// Consent value indicating the user denied consent.
pub const CONSENT_VALUE_DENIED: &str = "denied";
/// Consent value indicating the regulation does not apply to the user.
pub const CONSENT_VALUE_DOES_NOT_APPLY: &str = "does_not_apply";

/// Who initiated a consent status change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentStatusSource {
    /// The end user acted on a consent dialog.
    User,
    /// The app developer changed consent programmatically.
    Developer,
}

/// Which consent dialog variant to present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentDialogType {
    /// A brief summary dialog.
    Concise,
    /// A full preferences dialog.
    Detailed,
}

/// Callback surface a consent adapter reports individual key changes to.
pub trait ConsentAdapterDelegate: Send + Sync {
    /// Called whenever the value for one consent key changed.
    fn on_consent_change(&self, key: String);
}

/// Capability exposed by consent management platform modules.
///
/// All mutating operations complete with a success flag rather than an
/// error; the underlying platforms only report pass/fail.
#[async_trait]
pub trait ConsentAdapter: Send + Sync {
    /// Whether the platform currently wants consent collected from the user.
    fn should_collect_consent(&self) -> bool;

    /// Snapshot of the current consents keyed by consent key.
    fn consents(&self) -> HashMap<String, String>;

    /// Installs or clears the delegate receiving per-key change callbacks.
    fn set_delegate(&self, delegate: Option<Weak<dyn ConsentAdapterDelegate>>);

    /// Grants consent on behalf of `source`.
    async fn grant_consent(&self, source: ConsentStatusSource) -> bool;

    /// Denies consent on behalf of `source`.
    async fn deny_consent(&self, source: ConsentStatusSource) -> bool;

    /// Resets consent to its unset state.
    async fn reset_consent(&self) -> bool;

    /// Shows the given consent dialog variant.
    async fn show_consent_dialog(&self, dialog: ConsentDialogType) -> bool;
}
