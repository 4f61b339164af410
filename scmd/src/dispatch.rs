//! Authenticated request dispatch.
//!
//! Every request carries a transaction key; it is checked before anything
//! else happens, and a failed check short-circuits the request.

use crate::adapters::{Adapter, GroupSync};
use crate::analysis::{AnalysisJobManager, AnalysisRequest};
use scm_common::auth::AuthGuard;
use scm_common::errors::{IntegrationError, Result};
use scm_common::protocol::{Envelope, Payload, Request, Response};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info_span, warn};

pub struct SecuredDispatcher {
    guard: AuthGuard,
    adapter: Arc<dyn Adapter>,
    jobs: AnalysisJobManager,
}

impl SecuredDispatcher {
    pub fn new(guard: AuthGuard, adapter: Arc<dyn Adapter>, jobs: AnalysisJobManager) -> Self {
        Self {
            guard,
            adapter,
            jobs,
        }
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.adapter
    }

    pub fn jobs(&self) -> &AnalysisJobManager {
        &self.jobs
    }

    /// Authenticate and execute one request.
    pub fn handle(&self, envelope: Envelope) -> Response {
        let op = envelope.request.op_name();
        let span = info_span!("request", op);
        let _enter = span.enter();

        let result = self
            .guard
            .verify(&envelope.transaction_key)
            .and_then(|()| self.execute(envelope.request));
        match &result {
            Ok(_) => debug!("Request succeeded"),
            Err(e) => warn!(kind = %e.kind(), code = %e.code(), error = %e, "Request failed"),
        }
        Response::from(result)
    }

    fn group_sync(&self) -> Result<&dyn GroupSync> {
        self.adapter.group_sync().ok_or_else(|| {
            IntegrationError::unsupported(format!(
                "{} does not manage access groups",
                self.adapter.kind()
            ))
        })
    }

    fn execute(&self, request: Request) -> Result<Payload> {
        let adapter = self.adapter.as_ref();
        match request {
            Request::InitializeExternalSystem { system_id } => {
                adapter.initialize_external_system(&system_id)?;
                Ok(Payload::Done)
            }
            Request::DeleteExternalSystem { system_id } => {
                adapter.delete_external_system(&system_id)?;
                Ok(Payload::Done)
            }
            Request::VerifyExternalSystem { adapter_type } => {
                adapter.verify_external_system(&adapter_type)?;
                Ok(Payload::Done)
            }
            Request::CreateRepository {
                group,
                dir,
                system_id,
                base_url,
            } => {
                let path = adapter.create_repository(&group, &dir, &system_id, &base_url)?;
                Ok(Payload::Path { path })
            }
            Request::SetupRepository {
                system_id,
                group,
                dir,
            } => {
                adapter.setup_repository(&system_id, &group, &dir)?;
                Ok(Payload::Done)
            }
            Request::SetRepositoryAccessLevel {
                dir,
                repository_id,
                level,
            } => {
                adapter.set_repository_access_level(&dir, &repository_id, level)?;
                Ok(Payload::Done)
            }
            Request::GetAccessLevel { repository_id, dir } => Ok(Payload::Access {
                access_level: adapter.access_level(&repository_id, &dir)?,
            }),
            Request::VerifyPath {
                project_id,
                repository_id,
                repository_path,
                relative_path,
            } => {
                adapter.verify_path(&project_id, &repository_id, &repository_path, &relative_path)?;
                Ok(Payload::Valid { valid: true })
            }
            Request::CheckoutRepository {
                repository_path,
                relative_path,
                dest_dir,
            } => {
                adapter.checkout_repository(&repository_path, &relative_path, Path::new(&dest_dir))?;
                Ok(Payload::Done)
            }
            Request::ArchiveRepository { repository_path } => Ok(Payload::Archived {
                archived: adapter.archive_repository(&repository_path),
            }),
            Request::GetArchiveRepositoryRootPath => Ok(Payload::Path {
                path: adapter.archive_root_path().display().to_string(),
            }),
            Request::AddUsersToAccessGroup { group, users } => Ok(Payload::Members {
                members: self.group_sync()?.add_users_to_access_group(&users, &group)?,
            }),
            Request::RemoveUsersFromAccessGroup { group, users } => {
                self.group_sync()?
                    .remove_users_from_access_group(&users, &group)?;
                Ok(Payload::Done)
            }
            Request::SetAccessList { group, users } => Ok(Payload::Members {
                members: self.group_sync()?.set_access_list(&users, &group)?,
            }),
            Request::ListGroupMembers { group } => Ok(Payload::Members {
                members: self.group_sync()?.list_group_members(&group)?,
            }),
            Request::BeginAnalysis {
                key,
                repository_path,
                relative_path,
                server,
            } => {
                self.jobs.begin(AnalysisRequest {
                    key,
                    repository_path,
                    relative_path,
                    server,
                })?;
                Ok(Payload::Done)
            }
            Request::CancelAnalysis { key } => {
                self.jobs.cancel(&key);
                Ok(Payload::Done)
            }
            Request::GetAnalysisStatus { key } => Ok(Payload::State {
                state: self.jobs.status(&key),
            }),
            Request::CleanupAnalysisWorkspace { key } => {
                self.jobs.cleanup_workspace(&key)?;
                Ok(Payload::Done)
            }
            Request::IsAnalysisBackendAvailable { server } => Ok(Payload::Available {
                available: self.jobs.is_backend_available(&server),
            }),
        }
    }
}
