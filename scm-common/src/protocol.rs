//! Wire protocol between the application server and the daemon.
//!
//! Newline-delimited JSON over a Unix socket. Each request line is an
//! [`Envelope`]: the transaction key plus a [`Request`] tagged by `op`.
//! Analysis requests carry their own `key` (the job key), so the
//! transaction key travels as `transaction_key`.
//! Each reply line is a [`Response`]: `{"ok": ...}` or `{"error": {...}}`.

use crate::errors::{ErrorKind, IntegrationError};
use crate::types::{AccessLevel, AnalysisState};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A credential that never appears in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

/// Connection details for the analysis server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisServer {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Base64 transaction key.
    pub transaction_key: String,
    #[serde(flatten)]
    pub request: Request,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    InitializeExternalSystem {
        system_id: String,
    },
    DeleteExternalSystem {
        system_id: String,
    },
    VerifyExternalSystem {
        adapter_type: String,
    },
    CreateRepository {
        group: String,
        dir: String,
        system_id: String,
        #[serde(default)]
        base_url: String,
    },
    SetupRepository {
        system_id: String,
        group: String,
        dir: String,
    },
    SetRepositoryAccessLevel {
        dir: String,
        repository_id: String,
        level: AccessLevel,
    },
    GetAccessLevel {
        repository_id: String,
        dir: String,
    },
    VerifyPath {
        project_id: String,
        repository_id: String,
        repository_path: String,
        relative_path: String,
    },
    CheckoutRepository {
        repository_path: String,
        relative_path: String,
        dest_dir: String,
    },
    ArchiveRepository {
        repository_path: String,
    },
    GetArchiveRepositoryRootPath,
    AddUsersToAccessGroup {
        group: String,
        users: Vec<String>,
    },
    RemoveUsersFromAccessGroup {
        group: String,
        users: Vec<String>,
    },
    SetAccessList {
        group: String,
        users: Vec<String>,
    },
    ListGroupMembers {
        group: String,
    },
    BeginAnalysis {
        key: String,
        repository_path: String,
        #[serde(default)]
        relative_path: String,
        server: AnalysisServer,
    },
    CancelAnalysis {
        key: String,
    },
    GetAnalysisStatus {
        key: String,
    },
    CleanupAnalysisWorkspace {
        key: String,
    },
    IsAnalysisBackendAvailable {
        server: AnalysisServer,
    },
}

impl Request {
    /// Operation name, as it appears in the `op` tag.
    pub fn op_name(&self) -> &'static str {
        match self {
            Request::InitializeExternalSystem { .. } => "initialize_external_system",
            Request::DeleteExternalSystem { .. } => "delete_external_system",
            Request::VerifyExternalSystem { .. } => "verify_external_system",
            Request::CreateRepository { .. } => "create_repository",
            Request::SetupRepository { .. } => "setup_repository",
            Request::SetRepositoryAccessLevel { .. } => "set_repository_access_level",
            Request::GetAccessLevel { .. } => "get_access_level",
            Request::VerifyPath { .. } => "verify_path",
            Request::CheckoutRepository { .. } => "checkout_repository",
            Request::ArchiveRepository { .. } => "archive_repository",
            Request::GetArchiveRepositoryRootPath => "get_archive_repository_root_path",
            Request::AddUsersToAccessGroup { .. } => "add_users_to_access_group",
            Request::RemoveUsersFromAccessGroup { .. } => "remove_users_from_access_group",
            Request::SetAccessList { .. } => "set_access_list",
            Request::ListGroupMembers { .. } => "list_group_members",
            Request::BeginAnalysis { .. } => "begin_analysis",
            Request::CancelAnalysis { .. } => "cancel_analysis",
            Request::GetAnalysisStatus { .. } => "get_analysis_status",
            Request::CleanupAnalysisWorkspace { .. } => "cleanup_analysis_workspace",
            Request::IsAnalysisBackendAvailable { .. } => "is_analysis_backend_available",
        }
    }
}

/// Successful result of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Path { path: String },
    Valid { valid: bool },
    Archived { archived: bool },
    Available { available: bool },
    State { state: AnalysisState },
    Members { members: Vec<String> },
    Access { access_level: AccessLevel },
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    /// Catalog code, e.g. `SCM-E100`.
    pub code: String,
    pub message: String,
}

impl From<&IntegrationError> for ErrorBody {
    fn from(err: &IntegrationError) -> Self {
        Self {
            kind: err.kind(),
            code: err.code().code_string(),
            message: err.message().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    Ok(Payload),
    Error(ErrorBody),
}

impl From<Result<Payload, IntegrationError>> for Response {
    fn from(result: Result<Payload, IntegrationError>) -> Self {
        match result {
            Ok(payload) => Response::Ok(payload),
            Err(err) => Response::Error(ErrorBody::from(&err)),
        }
    }
}
