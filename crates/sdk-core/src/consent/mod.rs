//! Consent management proxy.
//!
//! The host talks to one [`ConsentManager`]; the manager forwards everything
//! to whichever consent adapter module is currently installed and fans
//! adapter-side changes back out to observers, batching rapid changes when
//! configured to.

mod adapter;
mod manager;

pub use adapter::{
    ConsentAdapter, ConsentAdapterDelegate, ConsentDialogType, ConsentStatusSource,
    CONSENT_KEY_CCPA_OPT_IN, CONSENT_KEY_GDPR_CONSENT_GIVEN, CONSENT_KEY_TCF, CONSENT_KEY_USP,
    CONSENT_VALUE_DENIED, CONSENT_VALUE_DOES_NOT_APPLY, CONSENT_VALUE_GRANTED,
};
pub use manager::ConsentManager;
