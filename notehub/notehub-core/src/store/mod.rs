//! Aggregate store and the services on top of it.
//!
//! Pages and databases are persisted one JSON file per record under the data
//! directory and loaded at startup. Every operation takes the acting user id
//! explicitly, checks the resource first (absence is `NotFound`), then the
//! access guard (`Forbidden`), and only then touches state. Mutations write
//! to disk before the in-memory maps are updated, so a failed write leaves
//! prior state intact.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::acl::{self, PermissionStore};
use crate::error::{Error, Result};
use crate::model::{
    sort_blocks, Block, Database, Entry, Field, FieldType, Page, PageVersion, Permission,
    ResourceType, Role, VersionSummary,
};
use crate::versions::VersionStore;

#[cfg(test)]
mod tests;

const ANY_ROLE: &[Role] = &[Role::Owner, Role::Edit, Role::View];
const WRITE_ROLES: &[Role] = &[Role::Owner, Role::Edit];
const OWNER_ONLY: &[Role] = &[Role::Owner];

pub struct Store {
    pages_dir: PathBuf,
    databases_dir: PathBuf,
    pages: HashMap<Uuid, Page>,
    databases: HashMap<Uuid, Database>,
    versions: VersionStore,
    permissions: PermissionStore,
}

impl Store {
    pub fn open(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        let pages_dir = data_dir.join("pages");
        let databases_dir = data_dir.join("databases");
        fs::create_dir_all(&pages_dir)?;
        fs::create_dir_all(&databases_dir)?;

        let pages = load_records::<Page>(&pages_dir)?
            .into_iter()
            .map(|p| (p.id, p))
            .collect::<HashMap<_, _>>();
        let databases = load_records::<Database>(&databases_dir)?
            .into_iter()
            .map(|d| (d.id, d))
            .collect::<HashMap<_, _>>();
        let versions = VersionStore::open(data_dir.join("versions"))?;
        let permissions = PermissionStore::open(data_dir.join("permissions"))?;
        info!(
            pages = pages.len(),
            databases = databases.len(),
            "store loaded"
        );
        Ok(Self {
            pages_dir,
            databases_dir,
            pages,
            databases,
            versions,
            permissions,
        })
    }

    fn page_path(&self, id: Uuid) -> PathBuf {
        self.pages_dir.join(format!("{id}.json"))
    }

    fn database_path(&self, id: Uuid) -> PathBuf {
        self.databases_dir.join(format!("{id}.json"))
    }

    fn persist_page(&self, page: &Page) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(page)?;
        fs::write(self.page_path(page.id), bytes)?;
        Ok(())
    }

    fn persist_database(&self, db: &Database) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(db)?;
        fs::write(self.database_path(db.id), bytes)?;
        Ok(())
    }

    fn resource_exists(&self, resource_type: ResourceType, resource_id: Uuid) -> bool {
        match resource_type {
            ResourceType::Page => self.pages.contains_key(&resource_id),
            ResourceType::Database => self.databases.contains_key(&resource_id),
        }
    }
}

// ---------------------------------------------------------------------------
// Document service: page lifecycle with snapshot-before-overwrite and revert.
// ---------------------------------------------------------------------------

impl Store {
    /// Create a page and its owner permission row in one logical transaction.
    pub fn create_page(
        &mut self,
        user_id: &str,
        title: Option<String>,
        mut blocks: Vec<Block>,
    ) -> Result<Page> {
        sort_blocks(&mut blocks);
        let now = Utc::now();
        let page = Page {
            id: Uuid::new_v4(),
            owner_id: user_id.to_string(),
            title: title.unwrap_or_else(|| "Untitled".to_string()),
            blocks,
            created_at: now,
            updated_at: now,
        };
        self.persist_page(&page)?;
        let owner_row = Permission {
            id: Uuid::new_v4(),
            resource_type: ResourceType::Page,
            resource_id: page.id,
            user_id: user_id.to_string(),
            role: Role::Owner,
        };
        if let Err(err) = self.permissions.insert(owner_row) {
            // roll the page file back so no resource exists without an owner
            if let Err(rm) = fs::remove_file(self.page_path(page.id)) {
                warn!(page = %page.id, %rm, "failed to remove page after owner row write failed");
            }
            return Err(err);
        }
        self.pages.insert(page.id, page.clone());
        Ok(page)
    }

    pub fn get_page(&self, user_id: &str, id: Uuid) -> Result<&Page> {
        let page = self.pages.get(&id).ok_or(Error::NotFound("page"))?;
        acl::require(&self.permissions, user_id, ResourceType::Page, id, ANY_ROLE)?;
        Ok(page)
    }

    /// Pages owned by the caller, most recently updated first.
    pub fn list_pages(&self, user_id: &str) -> Vec<Page> {
        let mut pages: Vec<Page> = self
            .pages
            .values()
            .filter(|p| p.owner_id == user_id)
            .cloned()
            .collect();
        pages.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        pages
    }

    /// Overwrite title and/or blocks. The pre-write state is snapshotted
    /// into the version store first; if the snapshot cannot be written the
    /// overwrite is not applied, and if the overwrite cannot be persisted
    /// the snapshot is discarded again.
    pub fn update_page(
        &mut self,
        user_id: &str,
        id: Uuid,
        title: Option<String>,
        blocks: Option<Vec<Block>>,
    ) -> Result<Page> {
        let page = self.pages.get(&id).ok_or(Error::NotFound("page"))?;
        acl::require(&self.permissions, user_id, ResourceType::Page, id, WRITE_ROLES)?;
        if title.is_none() && blocks.is_none() {
            return Err(Error::InvalidInput(
                "patch must carry at least one of title, blocks".into(),
            ));
        }

        let mut updated = page.clone();
        sort_blocks(&mut updated.blocks);
        let snapshot_id = self
            .versions
            .append(id, updated.title.clone(), updated.blocks.clone())?;

        if let Some(title) = title {
            updated.title = title;
        }
        if let Some(mut blocks) = blocks {
            sort_blocks(&mut blocks);
            updated.blocks = blocks;
        }
        updated.updated_at = Utc::now();
        if let Err(err) = self.persist_page(&updated) {
            self.versions.discard(id, snapshot_id);
            return Err(err);
        }
        self.pages.insert(id, updated.clone());
        Ok(updated)
    }

    /// Owner-only. Cascades the page's version history and permission rows.
    pub fn delete_page(&mut self, user_id: &str, id: Uuid) -> Result<()> {
        if !self.pages.contains_key(&id) {
            return Err(Error::NotFound("page"));
        }
        acl::require(&self.permissions, user_id, ResourceType::Page, id, OWNER_ONLY)?;
        fs::remove_file(self.page_path(id))?;
        self.pages.remove(&id);
        self.versions.remove_page(id)?;
        self.permissions.remove_resource(ResourceType::Page, id)?;
        Ok(())
    }

    pub fn list_versions(&self, user_id: &str, page_id: Uuid) -> Result<Vec<VersionSummary>> {
        if !self.pages.contains_key(&page_id) {
            return Err(Error::NotFound("page"));
        }
        acl::require(&self.permissions, user_id, ResourceType::Page, page_id, OWNER_ONLY)?;
        Ok(self.versions.list(page_id))
    }

    pub fn get_version(
        &self,
        user_id: &str,
        page_id: Uuid,
        version_id: Uuid,
    ) -> Result<&PageVersion> {
        if !self.pages.contains_key(&page_id) {
            return Err(Error::NotFound("page"));
        }
        acl::require(&self.permissions, user_id, ResourceType::Page, page_id, OWNER_ONLY)?;
        self.versions
            .get(page_id, version_id)
            .ok_or(Error::NotFound("version"))
    }

    /// Revert a page to a prior snapshot. The state being discarded is
    /// snapshotted first, so reverting only ever appends to history and is
    /// itself reversible. Owner-only.
    pub fn revert_page(&mut self, user_id: &str, page_id: Uuid, version_id: Uuid) -> Result<Page> {
        let page = self.pages.get(&page_id).ok_or(Error::NotFound("page"))?;
        acl::require(&self.permissions, user_id, ResourceType::Page, page_id, OWNER_ONLY)?;
        let target = self
            .versions
            .get(page_id, version_id)
            .ok_or(Error::NotFound("version"))?
            .clone();

        let mut updated = page.clone();
        sort_blocks(&mut updated.blocks);
        let snapshot_id = self
            .versions
            .append(page_id, updated.title.clone(), updated.blocks.clone())?;

        updated.title = target.title;
        updated.blocks = target.blocks;
        updated.updated_at = Utc::now();
        if let Err(err) = self.persist_page(&updated) {
            self.versions.discard(page_id, snapshot_id);
            return Err(err);
        }
        self.pages.insert(page_id, updated.clone());
        Ok(updated)
    }
}

// ---------------------------------------------------------------------------
// Record collection service: databases, schemas and entries.
// ---------------------------------------------------------------------------

impl Store {
    pub fn create_database(
        &mut self,
        user_id: &str,
        name: Option<String>,
        description: Option<String>,
        schema: Option<Vec<Field>>,
    ) -> Result<Database> {
        let name = match name {
            Some(n) if !n.trim().is_empty() => n,
            _ => return Err(Error::InvalidInput("name is required".into())),
        };
        let schema = schema.ok_or_else(|| Error::InvalidInput("schema must be a list".into()))?;
        validate_schema(&schema)?;
        let now = Utc::now();
        let db = Database {
            id: Uuid::new_v4(),
            owner_id: user_id.to_string(),
            name,
            description: description.unwrap_or_default(),
            schema,
            entries: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.persist_database(&db)?;
        let owner_row = Permission {
            id: Uuid::new_v4(),
            resource_type: ResourceType::Database,
            resource_id: db.id,
            user_id: user_id.to_string(),
            role: Role::Owner,
        };
        if let Err(err) = self.permissions.insert(owner_row) {
            if let Err(rm) = fs::remove_file(self.database_path(db.id)) {
                warn!(database = %db.id, %rm, "failed to remove database after owner row write failed");
            }
            return Err(err);
        }
        self.databases.insert(db.id, db.clone());
        Ok(db)
    }

    pub fn get_database(&self, user_id: &str, id: Uuid) -> Result<&Database> {
        let db = self.databases.get(&id).ok_or(Error::NotFound("database"))?;
        acl::require(&self.permissions, user_id, ResourceType::Database, id, ANY_ROLE)?;
        Ok(db)
    }

    pub fn list_databases(&self, user_id: &str) -> Vec<Database> {
        let mut dbs: Vec<Database> = self
            .databases
            .values()
            .filter(|d| d.owner_id == user_id)
            .cloned()
            .collect();
        dbs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        dbs
    }

    /// Patch name/description/schema. Owner-only.
    pub fn update_database(
        &mut self,
        user_id: &str,
        id: Uuid,
        name: Option<String>,
        description: Option<String>,
        schema: Option<Vec<Field>>,
    ) -> Result<Database> {
        let db = self.databases.get(&id).ok_or(Error::NotFound("database"))?;
        acl::require(&self.permissions, user_id, ResourceType::Database, id, OWNER_ONLY)?;
        let mut updated = db.clone();
        if let Some(name) = name {
            if name.trim().is_empty() {
                return Err(Error::InvalidInput("name must not be empty".into()));
            }
            updated.name = name;
        }
        if let Some(description) = description {
            updated.description = description;
        }
        if let Some(schema) = schema {
            validate_schema(&schema)?;
            updated.schema = schema;
        }
        updated.updated_at = Utc::now();
        self.persist_database(&updated)?;
        self.databases.insert(id, updated.clone());
        Ok(updated)
    }

    /// Owner-only. Entries die with the aggregate; permission rows cascade.
    pub fn delete_database(&mut self, user_id: &str, id: Uuid) -> Result<()> {
        if !self.databases.contains_key(&id) {
            return Err(Error::NotFound("database"));
        }
        acl::require(&self.permissions, user_id, ResourceType::Database, id, OWNER_ONLY)?;
        fs::remove_file(self.database_path(id))?;
        self.databases.remove(&id);
        self.permissions.remove_resource(ResourceType::Database, id)?;
        Ok(())
    }

    pub fn create_entry(
        &mut self,
        user_id: &str,
        database_id: Uuid,
        data: BTreeMap<String, Value>,
    ) -> Result<Entry> {
        let db = self
            .databases
            .get(&database_id)
            .ok_or(Error::NotFound("database"))?;
        acl::require(
            &self.permissions,
            user_id,
            ResourceType::Database,
            database_id,
            WRITE_ROLES,
        )?;
        validate_entry(&db.schema, &data)?;
        let now = Utc::now();
        let entry = Entry {
            id: Uuid::new_v4(),
            data,
            created_at: now,
            updated_at: now,
        };
        let mut updated = db.clone();
        updated.entries.push(entry.clone());
        updated.updated_at = now;
        self.persist_database(&updated)?;
        self.databases.insert(database_id, updated);
        Ok(entry)
    }

    /// Full replace of the entry's `data` map; callers resend the complete
    /// desired map, dropped keys are dropped.
    pub fn update_entry(
        &mut self,
        user_id: &str,
        database_id: Uuid,
        entry_id: Uuid,
        data: BTreeMap<String, Value>,
    ) -> Result<Entry> {
        let db = self
            .databases
            .get(&database_id)
            .ok_or(Error::NotFound("database"))?;
        acl::require(
            &self.permissions,
            user_id,
            ResourceType::Database,
            database_id,
            WRITE_ROLES,
        )?;
        validate_entry(&db.schema, &data)?;
        let mut updated = db.clone();
        let now = Utc::now();
        let entry = {
            let entry = updated
                .entries
                .iter_mut()
                .find(|e| e.id == entry_id)
                .ok_or(Error::NotFound("entry"))?;
            entry.data = data;
            entry.updated_at = now;
            entry.clone()
        };
        updated.updated_at = now;
        self.persist_database(&updated)?;
        self.databases.insert(database_id, updated);
        Ok(entry)
    }

    pub fn delete_entry(&mut self, user_id: &str, database_id: Uuid, entry_id: Uuid) -> Result<()> {
        let db = self
            .databases
            .get(&database_id)
            .ok_or(Error::NotFound("database"))?;
        acl::require(
            &self.permissions,
            user_id,
            ResourceType::Database,
            database_id,
            WRITE_ROLES,
        )?;
        if !db.entries.iter().any(|e| e.id == entry_id) {
            return Err(Error::NotFound("entry"));
        }
        let mut updated = db.clone();
        updated.entries.retain(|e| e.id != entry_id);
        updated.updated_at = Utc::now();
        self.persist_database(&updated)?;
        self.databases.insert(database_id, updated);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Permission management. Owner-gated; the owner row itself is untouchable.
// ---------------------------------------------------------------------------

impl Store {
    /// Upsert a collaborator's role. Owner-only; the `owner` role itself can
    /// never be granted (a resource has exactly one owner row, created with
    /// the resource), and the acting owner cannot demote their own row.
    pub fn grant_permission(
        &mut self,
        user_id: &str,
        resource_type: ResourceType,
        resource_id: Uuid,
        principal: &str,
        role: Role,
    ) -> Result<Permission> {
        if !self.resource_exists(resource_type, resource_id) {
            return Err(Error::NotFound(resource_type.as_str()));
        }
        acl::require(&self.permissions, user_id, resource_type, resource_id, OWNER_ONLY)?;
        if role == Role::Owner {
            return Err(Error::Conflict("resource already has an owner"));
        }
        if principal == user_id {
            return Err(Error::Conflict("cannot change your own owner role"));
        }
        self.permissions
            .upsert(resource_type, resource_id, principal, role)
    }

    /// Collaborator listing for one resource. Owner-only.
    pub fn list_permissions(
        &self,
        user_id: &str,
        resource_type: ResourceType,
        resource_id: Uuid,
    ) -> Result<Vec<Permission>> {
        if !self.resource_exists(resource_type, resource_id) {
            return Err(Error::NotFound(resource_type.as_str()));
        }
        acl::require(&self.permissions, user_id, resource_type, resource_id, OWNER_ONLY)?;
        Ok(self.permissions.list_resource(resource_type, resource_id))
    }

    /// Revoke a permission row. Owner-only; revoking the acting caller's own
    /// `owner` row is a conflict and leaves the permission set unchanged.
    pub fn revoke_permission(&mut self, user_id: &str, permission_id: Uuid) -> Result<()> {
        let row = self
            .permissions
            .get(permission_id)
            .ok_or(Error::NotFound("permission"))?
            .clone();
        acl::require(
            &self.permissions,
            user_id,
            row.resource_type,
            row.resource_id,
            OWNER_ONLY,
        )?;
        if row.user_id == user_id && row.role == Role::Owner {
            return Err(Error::Conflict("cannot revoke your own owner role"));
        }
        self.permissions.remove(permission_id)
    }
}

fn load_records<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut records = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let bytes = fs::read(entry.path())?;
        match serde_json::from_slice::<T>(&bytes) {
            Ok(record) => records.push(record),
            Err(err) => {
                warn!(path = %entry.path().display(), %err, "skipping unreadable record");
            }
        }
    }
    Ok(records)
}

fn validate_schema(schema: &[Field]) -> Result<()> {
    let mut seen = std::collections::HashSet::new();
    for field in schema {
        if field.key.trim().is_empty() {
            return Err(Error::InvalidInput("field key must not be empty".into()));
        }
        if !seen.insert(field.key.as_str()) {
            return Err(Error::InvalidInput(format!(
                "duplicate field key '{}'",
                field.key
            )));
        }
        if field.field_type == FieldType::Select
            && field.options.as_ref().map_or(true, |o| o.is_empty())
        {
            return Err(Error::InvalidInput(format!(
                "select field '{}' requires options",
                field.key
            )));
        }
    }
    Ok(())
}

/// Check an incoming entry `data` map against the collection's schema.
/// Values for keys that name a field must match the field's type; keys with
/// no matching field are tolerated.
fn validate_entry(schema: &[Field], data: &BTreeMap<String, Value>) -> Result<()> {
    for field in schema {
        let Some(value) = data.get(&field.key) else {
            continue;
        };
        match field.field_type {
            FieldType::Text => {
                if !value.is_string() {
                    return Err(Error::InvalidInput(format!(
                        "field '{}' expects a string",
                        field.key
                    )));
                }
            }
            FieldType::Number => {
                if !value.is_number() {
                    return Err(Error::InvalidInput(format!(
                        "field '{}' expects a number",
                        field.key
                    )));
                }
            }
            FieldType::Date => {
                let ok = value.as_str().is_some_and(|s| {
                    chrono::DateTime::parse_from_rfc3339(s).is_ok()
                        || chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
                });
                if !ok {
                    return Err(Error::InvalidInput(format!(
                        "field '{}' expects an RFC 3339 or YYYY-MM-DD date string",
                        field.key
                    )));
                }
            }
            FieldType::Select => {
                let options = field.options.as_deref().unwrap_or_default();
                let ok = value
                    .as_str()
                    .is_some_and(|s| options.iter().any(|o| o == s));
                if !ok {
                    return Err(Error::InvalidInput(format!(
                        "field '{}' expects one of its options",
                        field.key
                    )));
                }
            }
        }
    }
    Ok(())
}
