use crate::model::PermissionRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub tenant_id: i64,
    pub created_at: DateTime<Utc>,
}

/// A role together with its current grants.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RoleDetail {
    #[serde(flatten)]
    pub role: Role,
    pub menu_ids: Vec<i64>,
    pub permissions: Vec<PermissionRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct RoleFilter {
    /// Case-sensitive substring match on the role name.
    pub name: Option<String>,
    pub page: u32,
    pub per_page: u32,
}

impl RoleFilter {
    pub const DEFAULT_PER_PAGE: u32 = 15;
    pub const MAX_PER_PAGE: u32 = 100;

    pub fn new(name: Option<String>, page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            name: name.filter(|value| !value.is_empty()),
            page: page.unwrap_or(1).max(1),
            per_page: per_page
                .unwrap_or(Self::DEFAULT_PER_PAGE)
                .clamp(1, Self::MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.per_page)
    }

    pub fn matches(&self, role: &Role) -> bool {
        self.name
            .as_deref()
            .map(|needle| role.name.contains(needle))
            .unwrap_or(true)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RolePage {
    pub items: Vec<Role>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_defaults_and_clamps() {
        let filter = RoleFilter::new(Some(String::new()), Some(0), Some(1000));
        assert_eq!(filter.name, None);
        assert_eq!(filter.page, 1);
        assert_eq!(filter.per_page, RoleFilter::MAX_PER_PAGE);
        assert_eq!(filter.offset(), 0);

        let filter = RoleFilter::new(None, Some(3), None);
        assert_eq!(filter.per_page, RoleFilter::DEFAULT_PER_PAGE);
        assert_eq!(filter.offset(), 30);
    }
}
