//! Data model for pages, page versions, record collections and permissions.
//! Serde shapes match the JSON wire format end to end; stored files and API
//! payloads use the same representation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// The two kinds of shareable resources permissions attach to.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Page,
    Database,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Page => "page",
            ResourceType::Database => "database",
        }
    }
}

/// Capability level on exactly one resource. Roles never cross resources:
/// a page grant says nothing about databases the page embeds.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Edit,
    View,
}

impl Role {
    /// owner satisfies any requirement, edit satisfies edit/view, view only view.
    pub fn satisfies(self, required: Role) -> bool {
        match (self, required) {
            (Role::Owner, _) => true,
            (Role::Edit, Role::Edit | Role::View) => true,
            (Role::View, Role::View) => true,
            _ => false,
        }
    }
}

/// One (resource, user) → role row. At most one row per user per resource;
/// exactly one `owner` row exists for every live resource.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Permission {
    pub id: Uuid,
    pub resource_type: ResourceType,
    pub resource_id: Uuid,
    pub user_id: String,
    pub role: Role,
}

/// Type-tagged block payload. Embeds reference their target by id only;
/// blocks never nest structurally.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum BlockPayload {
    Text { content: String },
    Heading { content: String },
    #[serde(rename_all = "camelCase")]
    DatabaseEmbed { database_id: Uuid },
    MediaEmbed { url: String },
}

/// One unit of page content with a display `order`. Order values are not
/// required to be unique; consumers sort by `order` before display or
/// snapshot.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Block {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(flatten)]
    pub payload: BlockPayload,
    pub order: i64,
}

/// Sort a block list by display order, stable for equal keys.
pub fn sort_blocks(blocks: &mut [Block]) {
    blocks.sort_by_key(|b| b.order);
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub id: Uuid,
    pub owner_id: String,
    pub title: String,
    pub blocks: Vec<Block>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Immutable value copy of a page's (title, blocks) taken just before an
/// overwrite. `page_id` is a lookup key, never an owning reference, and a
/// version never references another version.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVersion {
    pub id: Uuid,
    pub page_id: Uuid,
    pub title: String,
    pub blocks: Vec<Block>,
    pub created_at: DateTime<Utc>,
}

/// Listing shape for version history; full blocks are fetched per version
/// on demand so long histories stay cheap to list.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionSummary {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub title: String,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Date,
    Select,
}

/// One column of a record collection schema. `options` is meaningful only
/// for `select` fields, where it must be non-empty.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Field {
    pub key: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
}

/// One record. `data` maps field keys to scalar values; keys outside the
/// parent schema are tolerated.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub id: Uuid,
    pub data: BTreeMap<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Schema-defined record collection. Entries live inside the aggregate and
/// are deleted with it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    pub id: Uuid,
    pub owner_id: String,
    pub name: String,
    pub description: String,
    pub schema: Vec<Field>,
    pub entries: Vec<Entry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
