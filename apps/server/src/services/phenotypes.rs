//! Phenotype create, update, visibility and export.

use std::collections::BTreeSet;
use std::sync::Arc;

use phenolib_core::access::{
    can_edit, can_read, effective_access, in_brand_scope, AccessLevel, Subject,
};
use phenolib_core::concept::ConceptRef;
use phenolib_core::documents::template_concepts;
use phenolib_core::publication::{current_status, ApprovalStatus, PublicationRecord};
use serde_json::Value;
use validator::Validate;

use crate::db::Store;
use crate::models::phenotype::CONCEPT_KEY;
use crate::models::{
    ExportedCode, NewPhenotypeVersion, Phenotype, PhenotypeDetail, PhenotypeInput,
    UpdatePhenotypeRequest, VersionInfo,
};
use crate::services::{hidden, ConceptService};
use crate::{Error, Result};

/// Export field alias for the concept list.
pub const CODES_FIELD: &str = "codes";

/// A phenotype version the subject is allowed to see.
#[derive(Debug, Clone)]
pub struct VisibleVersion {
    pub head: Phenotype,
    pub version: Phenotype,
    pub records: Vec<PublicationRecord>,
    pub access: AccessLevel,
    pub can_edit: bool,
}

impl VisibleVersion {
    fn status_of(&self, history_id: i64) -> Option<ApprovalStatus> {
        let records: Vec<_> = self
            .records
            .iter()
            .filter(|r| r.entity_history_id == history_id)
            .cloned()
            .collect();
        current_status(&records)
    }
}

fn approved_versions(records: &[PublicationRecord]) -> BTreeSet<i64> {
    records
        .iter()
        .filter(|r| r.status == ApprovalStatus::Approved)
        .map(|r| r.entity_history_id)
        .collect()
}

pub struct PhenotypeService {
    store: Arc<dyn Store>,
    concepts: Arc<ConceptService>,
}

impl PhenotypeService {
    pub fn new(store: Arc<dyn Store>, concepts: Arc<ConceptService>) -> Self {
        Self { store, concepts }
    }

    async fn template_version(&self, template_id: Option<i64>) -> Result<Option<i64>> {
        let Some(id) = template_id else {
            return Ok(None);
        };
        let template = self
            .store
            .template_version(id, None)
            .await?
            .ok_or_else(|| Error::Validation(format!("unknown template {id}")))?;
        Ok(Some(template.version_id))
    }

    pub async fn create(
        &self,
        input: PhenotypeInput,
        subject: &Subject,
        brand_id: Option<i32>,
    ) -> Result<Phenotype> {
        let Some(user_id) = subject.user_id else {
            return Err(Error::Unauthenticated);
        };
        input.validate()?;

        let template_version = self.template_version(input.template_id).await?;
        let brands = if input.brands.is_empty() {
            brand_id.into_iter().collect()
        } else {
            input.brands
        };
        let version = NewPhenotypeVersion {
            name: input.name,
            author: input.author,
            definition: input.definition,
            implementation: input.implementation,
            validation: input.validation,
            template_id: input.template_id,
            template_version,
            template_data: match input.template_data {
                Value::Null => Value::Object(Default::default()),
                other => other,
            },
            owner_id: Some(user_id),
            group_id: input.group_id,
            owner_access: AccessLevel::Edit,
            group_access: input.group_access.unwrap_or_default(),
            world_access: input.world_access.unwrap_or_default(),
            brands,
            is_deleted: false,
            user_id: Some(user_id),
        };
        let phenotype = self.store.create_phenotype(version).await?;
        tracing::info!(id = %phenotype.id, user_id, "Phenotype created");
        Ok(phenotype)
    }

    pub async fn update(
        &self,
        request: UpdatePhenotypeRequest,
        subject: &Subject,
        brand_id: Option<i32>,
    ) -> Result<Phenotype> {
        let Some(user_id) = subject.user_id else {
            return Err(Error::Unauthenticated);
        };
        request.validate()?;

        let head = self
            .store
            .get_phenotype(&request.id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("phenotype {}", request.id)))?;
        if !can_edit(subject, &head.ownership(), brand_id) {
            return Err(Error::PermissionDenied(format!(
                "no edit access to phenotype {}",
                head.id
            )));
        }

        let input = request.fields;
        let template_version = if input.template_id == head.template_id {
            head.template_version
        } else {
            self.template_version(input.template_id).await?
        };
        let version = NewPhenotypeVersion {
            name: input.name,
            author: input.author,
            definition: input.definition,
            implementation: input.implementation,
            validation: input.validation,
            template_id: input.template_id,
            template_version,
            template_data: match input.template_data {
                Value::Null => head.template_data.clone(),
                other => other,
            },
            owner_id: head.owner_id,
            group_id: input.group_id.or(head.group_id),
            owner_access: head.owner_access,
            group_access: input.group_access.unwrap_or(head.group_access),
            world_access: input.world_access.unwrap_or(head.world_access),
            brands: if input.brands.is_empty() {
                head.brands.clone()
            } else {
                input.brands
            },
            is_deleted: head.is_deleted,
            user_id: Some(user_id),
        };
        let phenotype = self.store.append_phenotype_version(&head.id, version).await?;
        tracing::info!(
            id = %phenotype.id,
            history_id = phenotype.history_id,
            user_id,
            "Phenotype version appended"
        );
        Ok(phenotype)
    }

    /// Resolve which version of `id` the subject sees.
    ///
    /// Without an explicit version, subjects with VIEW access get the head
    /// and everyone else the newest approved version.
    pub async fn visible(
        &self,
        id: &str,
        version: Option<i64>,
        subject: &Subject,
        brand_id: Option<i32>,
    ) -> Result<VisibleVersion> {
        let what = || format!("phenotype {id}");
        let head = self
            .store
            .get_phenotype(id)
            .await?
            .ok_or_else(|| Error::NotFound(what()))?;
        let ownership = head.ownership();
        if !in_brand_scope(&head.brands, brand_id) {
            return Err(Error::NotFound(what()));
        }

        let records = self.store.entity_publications(id).await?;
        let approved = approved_versions(&records);
        if !can_read(subject, &ownership, brand_id, !approved.is_empty()) {
            return Err(hidden(subject, &what()));
        }
        let access = effective_access(subject, &ownership, brand_id);
        let has_view = access >= AccessLevel::View;

        let target = match version {
            Some(v) if has_view || approved.contains(&v) => v,
            Some(v) => return Err(hidden(subject, &format!("phenotype {id} version {v}"))),
            None if has_view => head.history_id,
            None => *approved
                .iter()
                .next_back()
                .ok_or_else(|| hidden(subject, &what()))?,
        };
        let version = if target == head.history_id {
            head.clone()
        } else {
            self.store
                .get_phenotype_version(id, target)
                .await?
                .ok_or_else(|| Error::NotFound(format!("phenotype {id} version {target}")))?
        };

        Ok(VisibleVersion {
            can_edit: can_edit(subject, &ownership, brand_id),
            head,
            version,
            records,
            access,
        })
    }

    pub async fn detail(
        &self,
        id: &str,
        version: Option<i64>,
        subject: &Subject,
        brand_id: Option<i32>,
    ) -> Result<PhenotypeDetail> {
        let visible = self.visible(id, version, subject, brand_id).await?;
        Ok(PhenotypeDetail {
            publish_status: visible.status_of(visible.version.history_id),
            is_latest: visible.version.history_id == visible.head.history_id,
            can_edit: visible.can_edit,
            phenotype: visible.version,
        })
    }

    pub async fn versions(
        &self,
        id: &str,
        subject: &Subject,
        brand_id: Option<i32>,
    ) -> Result<Vec<VersionInfo>> {
        let visible = self.visible(id, None, subject, brand_id).await?;
        let approved = approved_versions(&visible.records);
        let has_view = visible.access >= AccessLevel::View;
        let versions = self.store.list_phenotype_versions(id).await?;
        Ok(versions
            .into_iter()
            .filter(|v| has_view || approved.contains(&v.history_id))
            .map(|v| VersionInfo {
                version_id: v.history_id,
                is_latest: v.history_id == visible.head.history_id,
                publish_status: visible.status_of(v.history_id),
                name: v.name,
                updated: v.updated,
                updated_by: v.updated_by,
            })
            .collect())
    }

    /// Resolve every concept listed under `field` of the version's
    /// `template_data`. `codes` selects the concept list.
    pub async fn export(
        &self,
        id: &str,
        version: Option<i64>,
        field: &str,
        subject: &Subject,
        brand_id: Option<i32>,
    ) -> Result<Vec<ExportedCode>> {
        let visible = self.visible(id, version, subject, brand_id).await?;
        let key = if field == CODES_FIELD { CONCEPT_KEY } else { field };
        let data = &visible.version.template_data;
        if !data.get(key).is_some_and(Value::is_array) {
            return Err(Error::NotFound(format!("field {field} of phenotype {id}")));
        }

        let mut rows = Vec::new();
        for (concept_id, history_id) in template_concepts(data, key) {
            let key = ConceptRef {
                concept_id,
                history_id,
            };
            match self.concepts.export_version(key).await {
                Ok(codes) => rows.extend(codes),
                Err(Error::NotFound(what)) => {
                    tracing::warn!(phenotype = %id, %what, "Skipping missing concept in export");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(rows)
    }
}
