//! Owner/group/world access levels and read/write decisions.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Totally ordered access level: `None < View < Edit`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccessLevel {
    #[default]
    None,
    View,
    Edit,
}

impl AccessLevel {
    /// Database code (`1`, `2`, `3`).
    pub fn code(self) -> i16 {
        match self {
            AccessLevel::None => 1,
            AccessLevel::View => 2,
            AccessLevel::Edit => 3,
        }
    }

    pub fn from_code(code: i16) -> Option<Self> {
        match code {
            1 => Some(AccessLevel::None),
            2 => Some(AccessLevel::View),
            3 => Some(AccessLevel::Edit),
            _ => None,
        }
    }
}

/// The caller of a request. Anonymous callers have no `user_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub groups: BTreeSet<i64>,
    pub is_superuser: bool,
    pub is_moderator: bool,
    /// Brand ids this user administers.
    pub brand_admin_of: BTreeSet<i32>,
}

impl Subject {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    /// Moderators and superusers may decide on any publication request.
    pub fn can_moderate(&self) -> bool {
        self.is_superuser || self.is_moderator
    }

    pub fn is_brand_admin(&self, brand_id: Option<i32>) -> bool {
        brand_id.is_some_and(|id| self.brand_admin_of.contains(&id))
    }
}

/// Ownership columns shared by every versioned entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    pub owner_id: Option<i64>,
    pub group_id: Option<i64>,
    pub owner_access: AccessLevel,
    pub group_access: AccessLevel,
    pub world_access: AccessLevel,
    /// Brands the entity belongs to. Empty means unbranded.
    pub brands: Vec<i32>,
    pub is_deleted: bool,
}

/// True when an entity with `brands` is visible under the active Brand.
pub fn in_brand_scope(brands: &[i32], brand_id: Option<i32>) -> bool {
    match brand_id {
        None => true,
        Some(id) => brands.contains(&id),
    }
}

/// Maximum of the levels that apply to `subject`.
///
/// World access only applies to signed-in users; anonymous visibility is
/// decided by publication state (see [`can_read`]).
pub fn effective_access(
    subject: &Subject,
    entity: &Ownership,
    brand_id: Option<i32>,
) -> AccessLevel {
    let Some(user_id) = subject.user_id else {
        return AccessLevel::None;
    };

    let mut level = entity.world_access;
    if entity.owner_id == Some(user_id) {
        level = level.max(entity.owner_access);
    }
    if let Some(group) = entity.group_id {
        if subject.groups.contains(&group) {
            level = level.max(entity.group_access);
        }
    }
    if subject.can_moderate() {
        level = level.max(AccessLevel::View);
    }
    if let Some(brand) = brand_id {
        if subject.is_brand_admin(Some(brand)) && entity.brands.contains(&brand) {
            level = level.max(AccessLevel::View);
        }
    }
    level
}

/// Read visibility.
///
/// `published_in_scope` is true when some history of the entity has an
/// `APPROVED` publication and the entity is visible under the active Brand.
pub fn can_read(
    subject: &Subject,
    entity: &Ownership,
    brand_id: Option<i32>,
    published_in_scope: bool,
) -> bool {
    if !in_brand_scope(&entity.brands, brand_id) {
        return false;
    }
    let access = effective_access(subject, entity, brand_id);
    if entity.is_deleted {
        return access == AccessLevel::Edit;
    }
    published_in_scope || access >= AccessLevel::View
}

pub fn can_edit(subject: &Subject, entity: &Ownership, brand_id: Option<i32>) -> bool {
    effective_access(subject, entity, brand_id) == AccessLevel::Edit
}
