//! Dismissible announcement banner state.
//!
//! The banner is hidden once the user closes it. The closed state is the
//! announcement id stored under [`CLOSED_NEWS_KEY`], so publishing a new
//! announcement (new id) shows the banner again.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, warn};

use crate::config::NewsConfig;
use crate::prefs::PreferenceStore;

pub const CLOSED_NEWS_KEY: &str = "news:closed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub id: String,
    pub message: String,
    pub link: Option<String>,
}

impl From<&NewsConfig> for Announcement {
    fn from(cfg: &NewsConfig) -> Self {
        Self { id: cfg.id.clone(), message: cfg.message.clone(), link: cfg.link.clone() }
    }
}

pub struct NewsBanner {
    store: Arc<dyn PreferenceStore>,
    announcement: Announcement,
    enabled: bool,
    /// Closed during this session, whether or not the store write stuck.
    closed: AtomicBool,
}

impl NewsBanner {
    pub fn new(store: Arc<dyn PreferenceStore>, announcement: Announcement, enabled: bool) -> Self {
        Self { store, announcement, enabled, closed: AtomicBool::new(false) }
    }

    pub fn from_config(store: Arc<dyn PreferenceStore>, cfg: &NewsConfig) -> Self {
        Self::new(store, Announcement::from(cfg), cfg.enabled)
    }

    pub fn announcement(&self) -> &Announcement {
        &self.announcement
    }

    /// Closed this session, or closed earlier per the store. An unreadable
    /// store counts as "not dismissed".
    pub fn is_dismissed(&self) -> bool {
        if self.closed.load(Ordering::Relaxed) {
            return true;
        }
        match self.store.get(CLOSED_NEWS_KEY) {
            Ok(value) => value.as_deref() == Some(self.announcement.id.as_str()),
            Err(e) => {
                debug!(error = %e, "cannot read dismissed news state");
                false
            }
        }
    }

    pub fn visible(&self) -> bool {
        self.enabled && !self.is_dismissed()
    }

    /// Mark the current announcement closed. The banner stays hidden for
    /// the rest of the session; a failed write is logged and only means it
    /// shows again in a later one.
    pub fn dismiss(&self) {
        self.closed.store(true, Ordering::Relaxed);
        if let Err(e) = self.store.set(CLOSED_NEWS_KEY, &self.announcement.id) {
            warn!(error = %e, id = %self.announcement.id, "cannot persist dismissed news");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::prefs::MemoryStore;

    struct ReadOnlyStore;

    impl PreferenceStore for ReadOnlyStore {
        fn get(&self, _key: &str) -> Result<Option<String>, AppError> {
            Err(AppError::Storage("unavailable".into()))
        }
        fn set(&self, _key: &str, _value: &str) -> Result<(), AppError> {
            Err(AppError::Storage("unavailable".into()))
        }
        fn remove(&self, _key: &str) -> Result<bool, AppError> {
            Err(AppError::Storage("unavailable".into()))
        }
    }

    fn announcement(id: &str) -> Announcement {
        Announcement { id: id.into(), message: "hello".into(), link: None }
    }

    #[test]
    fn dismiss_hides_banner() {
        let store: Arc<dyn PreferenceStore> = Arc::new(MemoryStore::new());
        let banner = NewsBanner::new(Arc::clone(&store), announcement("new-compiler"), true);
        assert!(banner.visible());
        banner.dismiss();
        assert!(banner.is_dismissed());
        assert!(!banner.visible());
        assert_eq!(store.get(CLOSED_NEWS_KEY).unwrap().as_deref(), Some("new-compiler"));
    }

    #[test]
    fn new_announcement_reappears() {
        let store: Arc<dyn PreferenceStore> = Arc::new(MemoryStore::new());
        NewsBanner::new(Arc::clone(&store), announcement("old"), true).dismiss();
        let next = NewsBanner::new(store, announcement("new"), true);
        assert!(!next.is_dismissed());
        assert!(next.visible());
    }

    #[test]
    fn disabled_banner_is_never_visible() {
        let banner = NewsBanner::new(Arc::new(MemoryStore::new()), announcement("x"), false);
        assert!(!banner.visible());
    }

    #[test]
    fn unavailable_store_still_hides_banner_for_the_session() {
        let store: Arc<dyn PreferenceStore> = Arc::new(ReadOnlyStore);
        let banner = NewsBanner::new(Arc::clone(&store), announcement("x"), true);
        assert!(!banner.is_dismissed());
        assert!(banner.visible());
        banner.dismiss();
        assert!(banner.is_dismissed());
        assert!(!banner.visible());

        // Nothing was persisted, so a later session shows it again.
        let next = NewsBanner::new(store, announcement("x"), true);
        assert!(next.visible());
    }
}
