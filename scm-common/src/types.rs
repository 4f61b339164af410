//! Common types shared by the daemon and its clients.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Group assigned to repositories readable by every site user.
pub const ALL_USERS_GROUP: &str = "sfall";

/// Group assigned to repositories readable by unrestricted users.
pub const UNRESTRICTED_USERS_GROUP: &str = "sfunrest";

/// Backend flavour served by one daemon instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdapterKind {
    /// CVS accessed over SSH, with per-repository OS groups.
    CvsSsh,
    /// CVS served by `cvs pserver`; no OS group management.
    CvsPserver,
    /// Subversion repositories on local disk.
    Subversion,
    /// Pre-existing Clearcase views.
    Clearcase,
    /// CVS replicated through the WANdisco relay.
    WandiscoCvs,
    /// Subversion replicated through WANdisco.
    WandiscoSubversion,
}

impl AdapterKind {
    pub const ALL: [AdapterKind; 6] = [
        AdapterKind::CvsSsh,
        AdapterKind::CvsPserver,
        AdapterKind::Subversion,
        AdapterKind::Clearcase,
        AdapterKind::WandiscoCvs,
        AdapterKind::WandiscoSubversion,
    ];

    /// Key used to namespace per-adapter configuration.
    pub fn daemon_type(&self) -> &'static str {
        match self {
            AdapterKind::CvsSsh | AdapterKind::CvsPserver => "cvs",
            AdapterKind::Subversion => "subversion",
            AdapterKind::Clearcase => "clearcase",
            AdapterKind::WandiscoCvs => "wandisco_cvs",
            AdapterKind::WandiscoSubversion => "wandisco_subversion",
        }
    }

    /// Whether the adapter keeps OS group membership in sync with the caller.
    pub fn supports_group_sync(&self) -> bool {
        matches!(
            self,
            AdapterKind::CvsSsh | AdapterKind::WandiscoCvs | AdapterKind::Clearcase
        )
    }

    /// Whether the adapter can run on a Windows host.
    pub fn supports_windows(&self) -> bool {
        matches!(
            self,
            AdapterKind::Subversion | AdapterKind::WandiscoSubversion
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterKind::CvsSsh => "cvs_ssh",
            AdapterKind::CvsPserver => "cvs_pserver",
            AdapterKind::Subversion => "subversion",
            AdapterKind::Clearcase => "clearcase",
            AdapterKind::WandiscoCvs => "wandisco_cvs",
            AdapterKind::WandiscoSubversion => "wandisco_subversion",
        }
    }
}

impl fmt::Display for AdapterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AdapterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        AdapterKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown adapter kind '{}'", s))
    }
}

/// Visibility of a repository, expressed as the OS group owning its files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    None,
    All,
    Authenticated,
    Unrestricted,
    Member,
}

impl AccessLevel {
    /// Numeric code used by the application server.
    pub fn code(&self) -> u8 {
        match self {
            AccessLevel::None => 0,
            AccessLevel::All => 1,
            AccessLevel::Authenticated => 2,
            AccessLevel::Unrestricted => 3,
            AccessLevel::Member => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(AccessLevel::None),
            1 => Some(AccessLevel::All),
            2 => Some(AccessLevel::Authenticated),
            3 => Some(AccessLevel::Unrestricted),
            4 => Some(AccessLevel::Member),
            _ => None,
        }
    }

    /// OS group that should own a repository at this level.
    pub fn target_group<'a>(&self, repository_group: &'a str) -> &'a str {
        match self {
            AccessLevel::All | AccessLevel::Authenticated => ALL_USERS_GROUP,
            AccessLevel::Unrestricted => UNRESTRICTED_USERS_GROUP,
            AccessLevel::Member | AccessLevel::None => repository_group,
        }
    }

    /// Inverse of [`AccessLevel::target_group`] for a path's current group.
    pub fn from_group(group: &str) -> Self {
        match group {
            ALL_USERS_GROUP => AccessLevel::All,
            UNRESTRICTED_USERS_GROUP => AccessLevel::Unrestricted,
            _ => AccessLevel::None,
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AccessLevel::None => "none",
            AccessLevel::All => "all",
            AccessLevel::Authenticated => "authenticated",
            AccessLevel::Unrestricted => "unrestricted",
            AccessLevel::Member => "member",
        };
        write!(f, "{}", name)
    }
}

/// Phase of a background analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    Started,
    Checkout,
    Login,
    Attach,
    Analyze,
    Upload,
    Completed,
    Exception,
    Cancelled,
    /// No job is registered for the key.
    NotRunning,
}

impl AnalysisState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnalysisState::Completed | AnalysisState::Exception | AnalysisState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisState::Started => "started",
            AnalysisState::Checkout => "checkout",
            AnalysisState::Login => "login",
            AnalysisState::Attach => "attach",
            AnalysisState::Analyze => "analyze",
            AnalysisState::Upload => "upload",
            AnalysisState::Completed => "completed",
            AnalysisState::Exception => "exception",
            AnalysisState::Cancelled => "cancelled",
            AnalysisState::NotRunning => "not_running",
        }
    }
}

impl fmt::Display for AnalysisState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Final result of an analysis job, as reported to the notification sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisOutcome {
    Completed,
    Cancelled,
    Error,
}

impl AnalysisOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisOutcome::Completed => "completed",
            AnalysisOutcome::Cancelled => "cancelled",
            AnalysisOutcome::Error => "error",
        }
    }
}

impl fmt::Display for AnalysisOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of an idempotent group creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    Created,
    AlreadyPresent,
}

impl GroupStatus {
    pub fn was_created(&self) -> bool {
        matches!(self, GroupStatus::Created)
    }
}
