//! Clearcase adapter. Views are provisioned outside the daemon, so most
//! lifecycle calls only confirm the view is there.

use super::base::{AdapterContext, RepositoryBase};
use super::{Adapter, GroupSync, NoopGroupSync};
use scm_common::errors::{IntegrationError, Result};
use scm_common::types::{AccessLevel, AdapterKind};
use std::path::Path;
use tracing::debug;

pub struct ClearcaseAdapter {
    base: RepositoryBase,
    group_sync: NoopGroupSync,
}

impl ClearcaseAdapter {
    pub fn new(context: AdapterContext) -> Self {
        Self {
            base: RepositoryBase::new(context),
            group_sync: NoopGroupSync,
        }
    }
}

impl Adapter for ClearcaseAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Clearcase
    }

    fn base(&self) -> &RepositoryBase {
        &self.base
    }

    fn initialize_external_system(&self, system_id: &str) -> Result<()> {
        self.base.check_platform(self.kind())?;
        self.base.bind_external_system(system_id)
    }

    fn delete_external_system(&self, _system_id: &str) -> Result<()> {
        self.base.unbind_external_system()
    }

    fn verify_external_system(&self, adapter_type: &str) -> Result<()> {
        if adapter_type == "Clearcase" {
            Ok(())
        } else {
            Err(IntegrationError::unsupported(format!(
                "Adapter type {} is not supported by {}",
                adapter_type,
                self.kind()
            )))
        }
    }

    fn create_repository(
        &self,
        _group: &str,
        dir: &str,
        _system_id: &str,
        _base_url: &str,
    ) -> Result<String> {
        let path = self.base.resolve_repository_dir(dir);
        if !self.base.executor().path_exists(&path) {
            return Err(IntegrationError::privileged(format!(
                "{} does not exist",
                path.display()
            )));
        }
        debug!(view = %path.display(), "Clearcase view present");
        Ok(self.base.report_path(&path))
    }

    fn setup_repository(&self, _system_id: &str, _group: &str, _dir: &str) -> Result<()> {
        Ok(())
    }

    fn set_repository_access_level(
        &self,
        _dir: &str,
        _repository_id: &str,
        _level: AccessLevel,
    ) -> Result<()> {
        Ok(())
    }

    fn verify_path(
        &self,
        _project_id: &str,
        _repository_id: &str,
        _repository_path: &str,
        _relative_path: &str,
    ) -> Result<()> {
        Ok(())
    }

    fn checkout_repository(
        &self,
        _repository_path: &str,
        _relative_path: &str,
        _dest_dir: &Path,
    ) -> Result<()> {
        Ok(())
    }

    fn group_sync(&self) -> Option<&dyn GroupSync> {
        Some(&self.group_sync)
    }
}
