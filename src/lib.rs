//! Best-effort project view beacon.
//!
//! The core is [`submitter::BeaconSubmitter`]: consent-aware, at most one
//! beacon per project id per session, delivered fire-and-forget. The
//! remaining modules cover the preference store it reads, the start-edge
//! trigger that drives it, and two small pieces of host UI state that share
//! the same store (announcement dismissal, load-failure reports).

pub mod config;
pub mod consent;
pub mod error;
pub mod logger;
pub mod news;
pub mod prefs;
pub mod report;
pub mod submitter;
pub mod trigger;
