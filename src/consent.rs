//! Opt-out resolution for the beacon.
//!
//! Sources are consulted in order and the first one that decides wins:
//!
//! 1. compiled-in feature flag (`beacons` cargo feature)
//! 2. the stored preference under [`OPT_OUT_KEY`]
//! 3. environment privacy signals (`GLOBAL_PRIVACY_CONTROL`, `DO_NOT_TRACK`)
//! 4. default: opted in
//!
//! The privacy signals are really aimed at third parties, but someone who
//! sets them would most likely opt out if asked, so they are honoured when no
//! explicit preference exists.

use std::fmt;

use tracing::debug;

use crate::error::AppError;
use crate::prefs::PreferenceStore;

/// Preference key holding `"true"` (opted out) or `"false"` (opted in).
pub const OPT_OUT_KEY: &str = "beacon:opt_out";

/// Whether the crate was built with beacons compiled in.
pub const FEATURE_ENABLED: bool = cfg!(feature = "beacons");

/// Explicit opt-out preference as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoredPreference {
    Unset,
    OptedOut,
    OptedIn,
}

impl StoredPreference {
    /// Only the literal `"true"` opts out; any other stored value opts in.
    pub fn from_stored(value: Option<&str>) -> Self {
        match value {
            None => Self::Unset,
            Some("true") => Self::OptedOut,
            Some(_) => Self::OptedIn,
        }
    }
}

/// Privacy signals provided by the execution environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrivacySignals {
    pub global_privacy_control: bool,
    pub do_not_track: bool,
}

impl PrivacySignals {
    /// Read `GLOBAL_PRIVACY_CONTROL` and `DO_NOT_TRACK` from the process env.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolve signals through an arbitrary lookup. Tests use this instead of
    /// mutating the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let gpc = lookup("GLOBAL_PRIVACY_CONTROL")
            .map(|v| {
                let v = v.trim();
                v == "1" || v.eq_ignore_ascii_case("true")
            })
            .unwrap_or(false);
        // Only the literal "1" counts, matching the header semantics.
        let dnt = lookup("DO_NOT_TRACK").map(|v| v.trim() == "1").unwrap_or(false);
        Self { global_privacy_control: gpc, do_not_track: dnt }
    }

    pub fn any(&self) -> bool {
        self.global_privacy_control || self.do_not_track
    }
}

/// Which source decided the consent outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentSource {
    FeatureDisabled,
    StoredPreference,
    GlobalPrivacyControl,
    DoNotTrack,
    Default,
}

impl fmt::Display for ConsentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::FeatureDisabled => "feature disabled",
            Self::StoredPreference => "stored preference",
            Self::GlobalPrivacyControl => "global privacy control",
            Self::DoNotTrack => "do not track",
            Self::Default => "default",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsentDecision {
    pub opted_out: bool,
    pub source: ConsentSource,
}

impl ConsentDecision {
    fn out(source: ConsentSource) -> Self {
        Self { opted_out: true, source }
    }

    fn opted_in(source: ConsentSource) -> Self {
        Self { opted_out: false, source }
    }
}

/// Read the stored preference. Errors surface as-is; see [`resolve`] for the
/// mapping to "absent".
pub fn read_preference(store: &dyn PreferenceStore) -> Result<StoredPreference, AppError> {
    let value = store.get(OPT_OUT_KEY)?;
    Ok(StoredPreference::from_stored(value.as_deref()))
}

pub fn write_preference(store: &dyn PreferenceStore, opted_out: bool) -> Result<(), AppError> {
    store.set(OPT_OUT_KEY, if opted_out { "true" } else { "false" })
}

/// Remove the stored preference so the environment signals apply again.
pub fn clear_preference(store: &dyn PreferenceStore) -> Result<bool, AppError> {
    store.remove(OPT_OUT_KEY)
}

/// Resolve whether beacons are suppressed.
pub fn resolve(
    feature_enabled: bool,
    store: &dyn PreferenceStore,
    signals: PrivacySignals,
) -> ConsentDecision {
    if !feature_enabled {
        return ConsentDecision::out(ConsentSource::FeatureDisabled);
    }

    let stored = read_preference(store).unwrap_or_else(|e| {
        debug!(error = %e, "preference store unavailable, treating opt-out as unset");
        StoredPreference::Unset
    });
    match stored {
        StoredPreference::OptedOut => return ConsentDecision::out(ConsentSource::StoredPreference),
        StoredPreference::OptedIn => {
            return ConsentDecision::opted_in(ConsentSource::StoredPreference);
        }
        StoredPreference::Unset => {}
    }

    if signals.global_privacy_control {
        return ConsentDecision::out(ConsentSource::GlobalPrivacyControl);
    }
    if signals.do_not_track {
        return ConsentDecision::out(ConsentSource::DoNotTrack);
    }
    ConsentDecision::opted_in(ConsentSource::Default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefs::MemoryStore;

    struct BrokenStore;

    impl PreferenceStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, AppError> {
            Err(AppError::Storage("disabled".into()))
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), AppError> {
            Err(AppError::Storage("disabled".into()))
        }
        fn remove(&self, _key: &str) -> Result<bool, AppError> {
            Err(AppError::Storage("disabled".into()))
        }
    }

    const BOTH: PrivacySignals = PrivacySignals { global_privacy_control: true, do_not_track: true };
    const NONE: PrivacySignals = PrivacySignals { global_privacy_control: false, do_not_track: false };

    #[test]
    fn stored_value_parsing() {
        assert_eq!(StoredPreference::from_stored(None), StoredPreference::Unset);
        assert_eq!(StoredPreference::from_stored(Some("true")), StoredPreference::OptedOut);
        assert_eq!(StoredPreference::from_stored(Some("false")), StoredPreference::OptedIn);
        assert_eq!(StoredPreference::from_stored(Some("TRUE")), StoredPreference::OptedIn);
        assert_eq!(StoredPreference::from_stored(Some("")), StoredPreference::OptedIn);
    }

    #[test]
    fn feature_disabled_wins_over_everything() {
        let store = MemoryStore::new();
        write_preference(&store, false).unwrap();
        let d = resolve(false, &store, NONE);
        assert!(d.opted_out);
        assert_eq!(d.source, ConsentSource::FeatureDisabled);
    }

    #[test]
    fn stored_false_ignores_privacy_signals() {
        let store = MemoryStore::new();
        write_preference(&store, false).unwrap();
        let d = resolve(true, &store, BOTH);
        assert!(!d.opted_out);
        assert_eq!(d.source, ConsentSource::StoredPreference);
    }

    #[test]
    fn stored_true_opts_out() {
        let store = MemoryStore::new();
        write_preference(&store, true).unwrap();
        let d = resolve(true, &store, NONE);
        assert!(d.opted_out);
        assert_eq!(d.source, ConsentSource::StoredPreference);
    }

    #[test]
    fn unset_preference_falls_back_to_signals() {
        let store = MemoryStore::new();
        let gpc = PrivacySignals { global_privacy_control: true, do_not_track: false };
        let dnt = PrivacySignals { global_privacy_control: false, do_not_track: true };
        assert_eq!(resolve(true, &store, gpc).source, ConsentSource::GlobalPrivacyControl);
        assert_eq!(resolve(true, &store, dnt).source, ConsentSource::DoNotTrack);
        assert!(resolve(true, &store, dnt).opted_out);
    }

    #[test]
    fn default_is_opted_in() {
        let d = resolve(true, &MemoryStore::new(), NONE);
        assert!(!d.opted_out);
        assert_eq!(d.source, ConsentSource::Default);
    }

    #[test]
    fn broken_store_reads_as_unset() {
        assert!(read_preference(&BrokenStore).is_err());
        assert_eq!(resolve(true, &BrokenStore, NONE).source, ConsentSource::Default);
        assert_eq!(resolve(true, &BrokenStore, BOTH).source, ConsentSource::GlobalPrivacyControl);
    }

    #[test]
    fn clear_restores_signal_fallback() {
        let store = MemoryStore::new();
        write_preference(&store, false).unwrap();
        assert!(clear_preference(&store).unwrap());
        assert!(resolve(true, &store, BOTH).opted_out);
    }

    #[test]
    fn signals_from_lookup() {
        let env = |pairs: &'static [(&'static str, &'static str)]| {
            move |name: &str| {
                pairs.iter().find(|(k, _)| *k == name).map(|(_, v)| v.to_string())
            }
        };
        assert_eq!(PrivacySignals::from_lookup(env(&[])), NONE);
        assert!(PrivacySignals::from_lookup(env(&[("DO_NOT_TRACK", "1")])).do_not_track);
        assert!(!PrivacySignals::from_lookup(env(&[("DO_NOT_TRACK", "0")])).do_not_track);
        assert!(!PrivacySignals::from_lookup(env(&[("DO_NOT_TRACK", "yes")])).any());
        assert!(
            PrivacySignals::from_lookup(env(&[("GLOBAL_PRIVACY_CONTROL", "True")]))
                .global_privacy_control
        );
        assert!(
            PrivacySignals::from_lookup(env(&[("GLOBAL_PRIVACY_CONTROL", "1")]))
                .global_privacy_control
        );
    }
}
