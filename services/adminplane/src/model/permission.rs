use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Stored (path, method) pair; unique by that pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PermissionRecord {
    pub id: i64,
    pub path: String,
    pub method: String,
    pub name: Option<String>,
}

/// Permission referenced by a menu declaration, resolved by (path, method).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct PermissionDeclaration {
    pub path: String,
    pub method: String,
    /// Display name pushed onto the stored record when non-blank.
    #[serde(default)]
    pub name: Option<String>,
}

impl PermissionDeclaration {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            path: path.to_string(),
            method: method.to_ascii_uppercase(),
            name: None,
        }
    }

    pub fn named(method: &str, path: &str, name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Self::new(method, path)
        }
    }

    /// Name to write onto `record`, if it differs from what is stored.
    pub fn rename_for(&self, record: &PermissionRecord) -> Option<&str> {
        let name = self.name.as_deref().map(str::trim).filter(|n| !n.is_empty())?;
        if record.name.as_deref() == Some(name) {
            None
        } else {
            Some(name)
        }
    }
}
