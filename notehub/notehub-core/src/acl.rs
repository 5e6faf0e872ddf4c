//! Permission rows and the access guard. Rows are persisted one JSON file
//! per permission under `permissions/` and loaded at startup.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::model::{Permission, ResourceType, Role};

pub struct PermissionStore {
    dir: PathBuf,
    rows: HashMap<Uuid, Permission>,
}

impl PermissionStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let mut rows = HashMap::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let bytes = fs::read(entry.path())?;
            match serde_json::from_slice::<Permission>(&bytes) {
                Ok(perm) => {
                    rows.insert(perm.id, perm);
                }
                Err(err) => {
                    warn!(path = %entry.path().display(), %err, "skipping unreadable permission row");
                }
            }
        }
        Ok(Self { dir, rows })
    }

    fn row_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    fn persist(&self, perm: &Permission) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(perm)?;
        fs::write(self.row_path(perm.id), bytes)?;
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<&Permission> {
        self.rows.get(&id)
    }

    /// The caller's row for one exact resource, if any.
    pub fn find(
        &self,
        user_id: &str,
        resource_type: ResourceType,
        resource_id: Uuid,
    ) -> Option<&Permission> {
        self.rows.values().find(|p| {
            p.user_id == user_id
                && p.resource_type == resource_type
                && p.resource_id == resource_id
        })
    }

    pub fn list_resource(
        &self,
        resource_type: ResourceType,
        resource_id: Uuid,
    ) -> Vec<Permission> {
        let mut rows: Vec<Permission> = self
            .rows
            .values()
            .filter(|p| p.resource_type == resource_type && p.resource_id == resource_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        rows
    }

    /// Insert a brand-new row. The caller is responsible for the one-row-per
    /// (resource, user) invariant; use [`upsert`](Self::upsert) for grants.
    pub fn insert(&mut self, perm: Permission) -> Result<()> {
        self.persist(&perm)?;
        self.rows.insert(perm.id, perm);
        Ok(())
    }

    /// Create or update the grantee's row on a resource, returning the
    /// resulting row. Never used for `owner` rows.
    pub fn upsert(
        &mut self,
        resource_type: ResourceType,
        resource_id: Uuid,
        user_id: &str,
        role: Role,
    ) -> Result<Permission> {
        let existing = self
            .find(user_id, resource_type, resource_id)
            .map(|p| p.id);
        let perm = match existing {
            Some(id) => {
                let mut updated = self.rows[&id].clone();
                updated.role = role;
                self.persist(&updated)?;
                self.rows.insert(id, updated.clone());
                updated
            }
            None => {
                let perm = Permission {
                    id: Uuid::new_v4(),
                    resource_type,
                    resource_id,
                    user_id: user_id.to_string(),
                    role,
                };
                self.insert(perm.clone())?;
                perm
            }
        };
        Ok(perm)
    }

    pub fn remove(&mut self, id: Uuid) -> Result<()> {
        if !self.rows.contains_key(&id) {
            return Err(Error::NotFound("permission"));
        }
        let path = self.row_path(id);
        if path.exists() {
            fs::remove_file(path)?;
        }
        self.rows.remove(&id);
        Ok(())
    }

    /// Cascade: drop every row referencing a deleted resource.
    pub fn remove_resource(
        &mut self,
        resource_type: ResourceType,
        resource_id: Uuid,
    ) -> Result<()> {
        let ids: Vec<Uuid> = self
            .rows
            .values()
            .filter(|p| p.resource_type == resource_type && p.resource_id == resource_id)
            .map(|p| p.id)
            .collect();
        for id in ids {
            self.remove(id)?;
        }
        Ok(())
    }
}

/// Stateless access guard over the permission store.
///
/// Grants access iff the caller holds a row on the exact resource whose role
/// satisfies one of `required` (owner ⊇ edit ⊇ view). Absence or an
/// insufficient role is a policy outcome, distinct from the resource id not
/// existing; resource existence is checked by the services before the guard
/// runs.
pub fn can_access(
    perms: &PermissionStore,
    user_id: &str,
    resource_type: ResourceType,
    resource_id: Uuid,
    required: &[Role],
) -> bool {
    perms
        .find(user_id, resource_type, resource_id)
        .map(|p| required.iter().any(|r| p.role.satisfies(*r)))
        .unwrap_or(false)
}

/// Guard check that fails closed with `Forbidden`.
pub fn require(
    perms: &PermissionStore,
    user_id: &str,
    resource_type: ResourceType,
    resource_id: Uuid,
    required: &[Role],
) -> Result<()> {
    if can_access(perms, user_id, resource_type, resource_id, required) {
        Ok(())
    } else {
        Err(Error::Forbidden("insufficient role on resource"))
    }
}
