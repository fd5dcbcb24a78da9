//! Permission backend used when group changes are disabled

use async_trait::async_trait;
use cellblock_api::Actor;
use cellblock_util::SubjectId;

use crate::{PermissionError, PermissionInterface, PermissionResult};

/// Fails every call with [`PermissionError::Unsupported`]
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPermissions;

#[async_trait]
impl PermissionInterface for NullPermissions {
    fn name(&self) -> &str {
        "none"
    }

    fn is_null(&self) -> bool {
        true
    }

    async fn fetch_primary_group(&self, _subject: SubjectId) -> PermissionResult<Option<String>> {
        Err(PermissionError::Unsupported)
    }

    async fn fetch_parent_groups(&self, _subject: SubjectId) -> PermissionResult<Vec<String>> {
        Err(PermissionError::Unsupported)
    }

    async fn set_prisoner_group(&self, _subject: SubjectId, _actor: &Actor) -> PermissionResult<()> {
        Err(PermissionError::Unsupported)
    }

    async fn set_parent_groups(
        &self,
        _subject: SubjectId,
        _groups: &[String],
        _actor: &Actor,
    ) -> PermissionResult<()> {
        Err(PermissionError::Unsupported)
    }
}
