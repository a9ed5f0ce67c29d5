use crate::model::{PermissionDeclaration, PermissionRecord};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use utoipa::ToSchema;

/// Menu node as declared by a module. In-memory only; `children` are owned by
/// the node for the duration of a tree walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MenuNode {
    /// Stable key assigned by the module author; distinct from the row id.
    pub number: String,
    pub name: String,
    #[serde(default)]
    pub sort: i32,
    #[serde(default)]
    pub is_disabled: bool,
    #[serde(default)]
    pub permissions: Vec<PermissionDeclaration>,
    #[serde(default)]
    pub children: Vec<MenuNode>,
}

impl MenuNode {
    pub fn new(number: &str, name: &str) -> Self {
        Self {
            number: number.to_string(),
            name: name.to_string(),
            sort: 0,
            is_disabled: false,
            permissions: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn sort(mut self, sort: i32) -> Self {
        self.sort = sort;
        self
    }

    pub fn permission(mut self, permission: PermissionDeclaration) -> Self {
        self.permissions.push(permission);
        self
    }

    pub fn child(mut self, child: MenuNode) -> Self {
        self.children.push(child);
        self
    }

    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(MenuNode::node_count).sum::<usize>()
    }
}

/// Persisted menu row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MenuRecord {
    pub id: i64,
    pub number: String,
    pub name: String,
    /// 0 for roots.
    pub parent_id: i64,
    pub sort: i32,
    pub is_disabled: bool,
}

#[derive(Debug, Clone)]
pub struct NewMenu {
    pub number: String,
    pub name: String,
    pub parent_id: i64,
    pub sort: i32,
    pub is_disabled: bool,
}

impl NewMenu {
    pub fn from_node(node: &MenuNode, parent_id: i64) -> Self {
        Self {
            number: node.number.clone(),
            name: node.name.clone(),
            parent_id,
            sort: node.sort,
            is_disabled: node.is_disabled,
        }
    }
}

/// Operator edit of a stored menu. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MenuUpdate {
    pub name: Option<String>,
    pub sort: Option<i32>,
    pub is_disabled: Option<bool>,
}

impl MenuUpdate {
    pub fn apply(&self, menu: &mut MenuRecord) {
        if let Some(name) = &self.name {
            menu.name = name.clone();
        }
        if let Some(sort) = self.sort {
            menu.sort = sort;
        }
        if let Some(is_disabled) = self.is_disabled {
            menu.is_disabled = is_disabled;
        }
    }
}

/// A stored menu with the permissions linked to it.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MenuDetail {
    #[serde(flatten)]
    pub menu: MenuRecord,
    pub permissions: Vec<PermissionRecord>,
}

/// Persisted menu rebuilt into a tree, with linked permissions.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MenuTreeNode {
    #[serde(flatten)]
    pub menu: MenuRecord,
    pub permissions: Vec<PermissionRecord>,
    pub children: Vec<MenuTreeNode>,
}

/// Rebuild persisted menus into a forest keyed on `parent_id`.
///
/// Siblings are ordered by `sort` then `id`. Menus whose parent is missing are
/// promoted to roots so operator-added rows never disappear from the view.
pub fn build_menu_tree(
    menus: Vec<MenuRecord>,
    links: &[(i64, i64)],
    permissions: &[PermissionRecord],
) -> Vec<MenuTreeNode> {
    let by_id: HashMap<i64, &PermissionRecord> =
        permissions.iter().map(|perm| (perm.id, perm)).collect();
    let mut perms_by_menu: HashMap<i64, BTreeSet<i64>> = HashMap::new();
    for (menu_id, permission_id) in links {
        perms_by_menu.entry(*menu_id).or_default().insert(*permission_id);
    }
    let known: BTreeSet<i64> = menus.iter().map(|menu| menu.id).collect();

    let mut children: HashMap<i64, Vec<MenuRecord>> = HashMap::new();
    for menu in menus {
        let parent = if menu.parent_id != 0 && known.contains(&menu.parent_id) {
            menu.parent_id
        } else {
            0
        };
        children.entry(parent).or_default().push(menu);
    }

    fn attach(
        parent: i64,
        children: &mut HashMap<i64, Vec<MenuRecord>>,
        perms_by_menu: &HashMap<i64, BTreeSet<i64>>,
        by_id: &HashMap<i64, &PermissionRecord>,
    ) -> Vec<MenuTreeNode> {
        let mut level = children.remove(&parent).unwrap_or_default();
        level.sort_by_key(|menu| (menu.sort, menu.id));
        level
            .into_iter()
            .map(|menu| {
                let permissions = perms_by_menu
                    .get(&menu.id)
                    .into_iter()
                    .flatten()
                    .filter_map(|id| by_id.get(id).map(|perm| (*perm).clone()))
                    .collect();
                let nested = attach(menu.id, children, perms_by_menu, by_id);
                MenuTreeNode {
                    menu,
                    permissions,
                    children: nested,
                }
            })
            .collect()
    }

    attach(0, &mut children, &perms_by_menu, &by_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn menu(id: i64, number: &str, parent_id: i64, sort: i32) -> MenuRecord {
        MenuRecord {
            id,
            number: number.to_string(),
            name: number.to_string(),
            parent_id,
            sort,
            is_disabled: false,
        }
    }

    #[test]
    fn node_len_counts_subtree() {
        let tree = MenuNode::new("root", "Root")
            .child(MenuNode::new("a", "A").child(MenuNode::new("a1", "A1")))
            .child(MenuNode::new("b", "B"));
        assert_eq!(tree.node_count(), 4);
    }

    #[test]
    fn tree_nests_and_orders_children() {
        let menus = vec![
            menu(1, "root", 0, 0),
            menu(2, "b", 1, 2),
            menu(3, "a", 1, 1),
            menu(4, "a1", 3, 0),
        ];
        let perms = vec![PermissionRecord {
            id: 10,
            path: "/admin/x".to_string(),
            method: "GET".to_string(),
            name: None,
        }];
        let tree = build_menu_tree(menus, &[(4, 10)], &perms);
        assert_eq!(tree.len(), 1);
        let root = &tree[0];
        let numbers: Vec<&str> = root
            .children
            .iter()
            .map(|node| node.menu.number.as_str())
            .collect();
        assert_eq!(numbers, vec!["a", "b"]);
        assert_eq!(root.children[0].children[0].permissions, perms);
    }

    #[test]
    fn orphans_are_promoted_to_roots() {
        let tree = build_menu_tree(vec![menu(5, "stray", 99, 0)], &[], &[]);
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].menu.number, "stray");
    }
}
