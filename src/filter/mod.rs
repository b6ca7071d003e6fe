//! Document metadata, retrieval filters and the security predicate.
//!
//! The security predicate is pure and is always applied before any operation
//! that truncates a candidate list to `top_k`; oversampling in the retrieval
//! paths is what makes that affordable without a second pass.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Normalized per-document metadata, populated once at ingestion time.
/// Aliased key-casings from source artifacts are resolved here, never probed
/// at query time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocMeta {
    #[serde(alias = "Id")]
    pub local_id: String,
    #[serde(default, alias = "File", alias = "path")]
    pub file: Option<String>,
    #[serde(default, alias = "Name")]
    pub name: Option<String>,
    #[serde(default)]
    pub data_type: Option<String>,
    #[serde(default)]
    pub file_type: Option<String>,
    #[serde(default, alias = "Kind")]
    pub kind: Option<String>,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default, alias = "Schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub db_key: Option<String>,
    #[serde(default)]
    pub cs_key: Option<String>,
    #[serde(default)]
    pub acl_tags: Vec<String>,
    #[serde(default)]
    pub classification_labels: Vec<String>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Already-resolved access constraints for one request. Resolution of
/// identity and group membership happens upstream; this crate only evaluates.
/// An absent field places no constraint on that axis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessDescriptor {
    /// Any-of: a document passes with at least one shared tag. Untagged
    /// documents are implicitly public on this axis.
    #[serde(default)]
    pub acl_tags_any: Option<Vec<String>>,
    /// All-of: the document's label set must be a superset.
    #[serde(default)]
    pub classification_labels_all: Option<Vec<String>>,
    /// All-of over the document's tag set; this is the strict mode that also
    /// drives the pre-filter (index bypass) path in the vector adapter.
    #[serde(default)]
    pub permission_tags_all: Option<Vec<String>>,
    #[serde(default)]
    pub owner_id: Option<String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub allowed_group_ids: Option<Vec<String>>,
}

impl AccessDescriptor {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn is_unrestricted(&self) -> bool {
        self.acl_tags_any.is_none()
            && self.classification_labels_all.is_none()
            && self.permission_tags_all.is_none()
            && self.owner_id.is_none()
            && self.tenant_id.is_none()
            && self.allowed_group_ids.is_none()
    }
}

/// Pure security predicate over one document's metadata.
pub fn passes(meta: &DocMeta, access: &AccessDescriptor) -> bool {
    if let Some(allow) = &access.acl_tags_any {
        if !meta.acl_tags.is_empty() && !meta.acl_tags.iter().any(|t| allow.contains(t)) {
            return false;
        }
    }

    if let Some(required) = &access.classification_labels_all {
        if !required
            .iter()
            .all(|label| meta.classification_labels.contains(label))
        {
            return false;
        }
    }

    if let Some(required) = &access.permission_tags_all {
        if !required.iter().all(|tag| meta.acl_tags.contains(tag)) {
            return false;
        }
    }

    if let (Some(owner), Some(doc_owner)) = (&access.owner_id, &meta.owner_id) {
        if owner != doc_owner {
            return false;
        }
    }

    if let (Some(tenant), Some(doc_tenant)) = (&access.tenant_id, &meta.tenant_id) {
        if tenant != doc_tenant {
            return false;
        }
    }

    if let (Some(groups), Some(doc_group)) = (&access.allowed_group_ids, &meta.group_id) {
        if !groups.contains(doc_group) {
            return false;
        }
    }

    true
}

/// Caller-supplied metadata constraints. Within one field, listed values are
/// OR-ed; across fields, AND. Scope-reserved keys smuggled through `extra`
/// are overwritten by the dispatcher before these filters ever run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalFilters {
    #[serde(default)]
    pub data_type: Vec<String>,
    #[serde(default)]
    pub file_type: Vec<String>,
    #[serde(default)]
    pub kind: Vec<String>,
    #[serde(default)]
    pub project: Vec<String>,
    #[serde(default)]
    pub schema: Vec<String>,
    #[serde(default)]
    pub branch: Vec<String>,
    #[serde(default)]
    pub name_prefix: Option<String>,
    #[serde(default)]
    pub db_key_in: Vec<String>,
    #[serde(default)]
    pub cs_key_in: Vec<String>,
    /// Freeform equality / OR-list constraints on `DocMeta::extra`.
    #[serde(default)]
    pub extra: BTreeMap<String, Vec<String>>,
}

fn field_matches(value: Option<&String>, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match value {
        Some(v) => allowed.contains(v),
        None => false,
    }
}

impl RetrievalFilters {
    pub fn is_empty(&self) -> bool {
        self.data_type.is_empty()
            && self.file_type.is_empty()
            && self.kind.is_empty()
            && self.project.is_empty()
            && self.schema.is_empty()
            && self.branch.is_empty()
            && self.name_prefix.is_none()
            && self.db_key_in.is_empty()
            && self.cs_key_in.is_empty()
            && self.extra.is_empty()
    }

    pub fn matches(&self, meta: &DocMeta) -> bool {
        if !field_matches(meta.data_type.as_ref(), &self.data_type) {
            return false;
        }
        if !field_matches(meta.file_type.as_ref(), &self.file_type) {
            return false;
        }
        if !field_matches(meta.kind.as_ref(), &self.kind) {
            return false;
        }
        if !field_matches(meta.project.as_ref(), &self.project) {
            return false;
        }
        if !field_matches(meta.schema.as_ref(), &self.schema) {
            return false;
        }
        if !field_matches(meta.branch.as_ref(), &self.branch) {
            return false;
        }
        if !field_matches(meta.db_key.as_ref(), &self.db_key_in) {
            return false;
        }
        if !field_matches(meta.cs_key.as_ref(), &self.cs_key_in) {
            return false;
        }
        if let Some(prefix) = &self.name_prefix {
            let matched = meta
                .name
                .as_ref()
                .map(|n| n.starts_with(prefix.as_str()))
                .unwrap_or(false);
            if !matched {
                return false;
            }
        }
        for (key, allowed) in &self.extra {
            if allowed.is_empty() {
                continue;
            }
            match meta.extra.get(key) {
                Some(value) if allowed.contains(value) => {}
                _ => return false,
            }
        }
        true
    }
}
