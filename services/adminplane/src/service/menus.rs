//! Operator menu management.
//!
//! # Purpose
//! Adds and edits menus outside module declarations. Operator menus are
//! display groupings: they carry no permission links, and reconciliation
//! never renames, reparents or reorders them.
//!
//! # Key invariants
//! - A menu `number` is unique across declared and operator menus.
//! - A parent is 0 or an existing menu.
//! - Edits touch only `name`, `sort` and `is_disabled`; `number` and
//!   `parent_id` stay as created.
//!
//! Menus are never deleted one at a time. Reconciliation prunes the links of
//! undeclared menus instead, so role grants stay consistent with the tree.
use crate::model::{MenuDetail, MenuRecord, MenuUpdate, NewMenu};
use crate::store::{RbacStore, StoreError};
use std::sync::Arc;
use thiserror::Error;

pub const MAX_MENU_NAME_CHARS: usize = 50;
pub const MAX_MENU_NUMBER_CHARS: usize = 64;

#[derive(Debug, Error)]
pub enum MenuError {
    #[error("{0}")]
    Validation(String),
    #[error("menu number {0} already exists")]
    Duplicate(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{context}: {source}")]
    Storage {
        context: &'static str,
        #[source]
        source: StoreError,
    },
}

impl MenuError {
    fn storage(context: &'static str) -> impl FnOnce(StoreError) -> MenuError {
        move |source| MenuError::Storage { context, source }
    }
}

pub struct MenuService {
    store: Arc<dyn RbacStore>,
}

impl MenuService {
    pub fn new(store: Arc<dyn RbacStore>) -> Self {
        Self { store }
    }

    /// Store a new operator menu.
    ///
    /// # Errors
    /// - [`MenuError::Validation`] for a blank or overlong number or name, or
    ///   a parent that does not exist.
    /// - [`MenuError::Duplicate`] when the number is taken.
    pub async fn create_menu(&self, menu: NewMenu) -> Result<MenuRecord, MenuError> {
        const CONTEXT: &str = "menu creation failed";
        let number = validate_text("menu number", &menu.number, MAX_MENU_NUMBER_CHARS)?;
        let name = validate_text("menu name", &menu.name, MAX_MENU_NAME_CHARS)?;
        if menu.parent_id < 0 {
            return Err(MenuError::Validation(
                "parent_id must be 0 or a menu id".to_string(),
            ));
        }
        if menu.parent_id != 0 {
            match self.store.get_menu(menu.parent_id).await {
                Ok(_) => {}
                Err(StoreError::NotFound(_)) => {
                    return Err(MenuError::Validation(format!(
                        "parent menu {} does not exist",
                        menu.parent_id
                    )));
                }
                Err(source) => return Err(MenuError::Storage { context: CONTEXT, source }),
            }
        }

        let record = self
            .store
            .create_menu(NewMenu {
                number: number.clone(),
                name,
                ..menu
            })
            .await
            .map_err(|err| match err {
                StoreError::Conflict(_) => MenuError::Duplicate(number.clone()),
                source => MenuError::Storage {
                    context: CONTEXT,
                    source,
                },
            })?;
        tracing::info!(menu_id = record.id, number = %record.number, "menu created");
        Ok(record)
    }

    /// Apply an operator edit to menu `id`.
    pub async fn update_menu(
        &self,
        id: i64,
        mut update: MenuUpdate,
    ) -> Result<MenuRecord, MenuError> {
        if let Some(name) = &update.name {
            update.name = Some(validate_text("menu name", name, MAX_MENU_NAME_CHARS)?);
        }
        let record = self
            .store
            .update_menu(id, &update)
            .await
            .map_err(|err| match err {
                StoreError::NotFound(_) => MenuError::NotFound(format!("menu {id} not found")),
                source => MenuError::Storage {
                    context: "menu update failed",
                    source,
                },
            })?;
        tracing::info!(menu_id = id, "menu updated");
        Ok(record)
    }

    pub async fn get_menu(&self, id: i64) -> Result<MenuDetail, MenuError> {
        const CONTEXT: &str = "menu lookup failed";
        let menu = match self.store.get_menu(id).await {
            Ok(menu) => menu,
            Err(StoreError::NotFound(_)) => {
                return Err(MenuError::NotFound(format!("menu {id} not found")));
            }
            Err(source) => return Err(MenuError::Storage { context: CONTEXT, source }),
        };
        let permissions = self
            .store
            .permissions_for_menus(&[id])
            .await
            .map_err(MenuError::storage(CONTEXT))?;
        Ok(MenuDetail { menu, permissions })
    }
}

fn validate_text(field: &str, raw: &str, max_chars: usize) -> Result<String, MenuError> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(MenuError::Validation(format!("{field} is required")));
    }
    if value.chars().count() > max_chars {
        return Err(MenuError::Validation(format!(
            "{field} must be at most {max_chars} characters"
        )));
    }
    Ok(value.to_string())
}
