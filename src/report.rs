//! Project load-failure reports.
//!
//! Turns a load error into a copyable diagnostic text and picks a recovery
//! hint based on what the error message looks like.

use std::error::Error;
use std::fmt::Write as _;
use std::sync::OnceLock;

use regex::Regex;

/// Repair tool for archives whose zip signature survived but whose contents
/// did not.
pub const SB3FIX_URL: &str = "https://turbowarp.github.io/sb3fix/?platform=turbowarp";
pub const SB3FIX_ISSUES_URL: &str = "https://github.com/TurboWarp/sb3fix/issues";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Archive signature intact, payload corrupted.
    ZipCorruption,
    /// Archive readable, project JSON failed validation.
    Validation,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryHint {
    pub advice: &'static str,
    pub link_text: &'static str,
    pub link: &'static str,
}

impl FailureKind {
    pub fn hint(self) -> Option<RecoveryHint> {
        match self {
            Self::ZipCorruption => Some(RecoveryHint {
                advice: "This error often means that the file was corrupted, possibly due to a \
                         faulty storage device, power outage, or unplugging a USB drive without \
                         ejecting. Try using sb3fix to recover your project as it can fix this \
                         type of error.",
                link_text: "using sb3fix to recover your project",
                link: SB3FIX_URL,
            }),
            Self::Validation => Some(RecoveryHint {
                advice: "This error often means that a small part of the project has been \
                         corrupted, but that it is otherwise valid. This can be easy to fix, so \
                         please report it.",
                link_text: "report it",
                link: SB3FIX_ISSUES_URL,
            }),
            Self::Unknown => None,
        }
    }
}

/// Always shown after the kind-specific hint.
pub const RESTORE_ADVICE: &str = "You may be able to recover an older version of the project \
                                  from automatic restore points or other backups.";

fn zip_corruption_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"Corrupted zip|uncompressed data size mismatch").expect("valid regex")
    })
}

fn validation_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"validationError").expect("valid regex"))
}

/// Classify an error message. Zip corruption takes precedence.
pub fn classify(message: &str) -> FailureKind {
    if zip_corruption_re().is_match(message) {
        FailureKind::ZipCorruption
    } else if validation_re().is_match(message) {
        FailureKind::Validation
    } else {
        FailureKind::Unknown
    }
}

/// Where the failure happened, appended to every report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportContext {
    pub location: String,
    pub user_agent: String,
}

impl ReportContext {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

/// Render `error` and its source chain as a report users can paste into an
/// issue.
pub fn format_report(error: &dyn Error, ctx: &ReportContext) -> String {
    let mut out = error.to_string();
    let mut source = error.source();
    if source.is_some() {
        out.push_str("\n\nCaused by:");
    }
    while let Some(cause) = source {
        let _ = write!(out, "\n  {cause}");
        source = cause.source();
    }
    let _ = write!(
        out,
        "\n\n---\n\nURL: {}\nUser-Agent: {}",
        ctx.location, ctx.user_agent
    );
    out
}

/// Plain message error, for reports built from text (e.g. the CLI).
#[derive(Debug)]
pub struct LoadError(pub String);

impl std::fmt::Display for LoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Error for LoadError {}
