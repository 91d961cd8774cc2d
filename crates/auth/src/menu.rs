//! Navigation tree assembly.

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use tracing::{instrument, warn};

use portico_core::{Menu, MenuId, SystemId, UserId};

use crate::AuthError;
use crate::store::SharedStore;

/// A menu with its ordered children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuNode {
    #[serde(flatten)]
    pub menu: Menu,
    pub children: Vec<MenuNode>,
}

impl MenuNode {
    /// Number of nodes in this subtree, including `self`.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(MenuNode::node_count).sum::<usize>()
    }
}

/// Assemble a flat menu list into an ordered forest.
///
/// - A node whose parent is absent from the input becomes a root.
/// - Roots and siblings are ordered by `sequence`; ties keep input order.
/// - Every distinct id appears exactly once. Repeated ids collapse to their
///   first occurrence.
/// - Cyclic parent chains are broken at the first node found on the cycle,
///   which is promoted to a root.
pub fn build_tree(menus: Vec<Menu>) -> Vec<MenuNode> {
    let mut index: HashMap<MenuId, usize> = HashMap::with_capacity(menus.len());
    for (i, menu) in menus.iter().enumerate() {
        index.entry(menu.id).or_insert(i);
    }

    let is_primary = |i: usize| index.get(&menus[i].id) == Some(&i);

    let mut parent_of: Vec<Option<usize>> = vec![None; menus.len()];
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); menus.len()];
    let mut roots: Vec<usize> = Vec::new();

    for (i, menu) in menus.iter().enumerate() {
        if !is_primary(i) {
            continue;
        }
        match menu.parent_id.and_then(|p| index.get(&p).copied()) {
            Some(parent) if parent != i => {
                parent_of[i] = Some(parent);
                children[parent].push(i);
            }
            _ => roots.push(i),
        }
    }

    let order = |i: &usize| (menus[*i].sequence, *i);
    for siblings in &mut children {
        siblings.sort_by_key(order);
    }

    let mut visited = vec![false; menus.len()];
    for &root in &roots {
        mark(root, &children, &mut visited);
    }

    // Whatever is still unvisited hangs off a cycle.
    for i in 0..menus.len() {
        if !is_primary(i) || visited[i] {
            continue;
        }
        let entry = cycle_entry(i, &parent_of);
        warn!(menu_id = %menus[entry].id, "menu parent chain forms a cycle; promoting to root");
        roots.push(entry);
        mark(entry, &children, &mut visited);
    }

    roots.sort_by_key(order);

    let mut placed = vec![false; menus.len()];
    roots
        .into_iter()
        .map(|root| assemble(root, &menus, &children, &mut placed))
        .collect()
}

fn mark(start: usize, children: &[Vec<usize>], visited: &mut [bool]) {
    let mut stack = vec![start];
    while let Some(i) = stack.pop() {
        if visited[i] {
            continue;
        }
        visited[i] = true;
        stack.extend(children[i].iter().copied().filter(|&c| !visited[c]));
    }
}

fn cycle_entry(start: usize, parent_of: &[Option<usize>]) -> usize {
    let mut seen = HashSet::new();
    let mut current = start;
    while seen.insert(current) {
        match parent_of[current] {
            Some(parent) => current = parent,
            None => return current,
        }
    }
    current
}

fn assemble(i: usize, menus: &[Menu], children: &[Vec<usize>], placed: &mut [bool]) -> MenuNode {
    placed[i] = true;
    let mut nodes = Vec::with_capacity(children[i].len());
    for &child in &children[i] {
        if !placed[child] {
            nodes.push(assemble(child, menus, children, placed));
        }
    }
    MenuNode {
        menu: menus[i].clone(),
        children: nodes,
    }
}

/// Builds navigation trees from the store.
#[derive(Clone, Debug)]
pub struct MenuAssembler {
    store: SharedStore,
}

impl MenuAssembler {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Navigation `user` may render inside `system`.
    ///
    /// Menus come from the role → menu grants of every assignment admitted by
    /// the system scope, limited to visible and active nodes of that system.
    #[instrument(skip(self), fields(user_id = %user, system_id = %system), err)]
    pub async fn user_tree(&self, user: UserId, system: SystemId) -> Result<Vec<MenuNode>, AuthError> {
        let menus = self
            .store
            .within("menus_for_user", self.store.get().menus_for_user(user, system))
            .await?;

        let menus: Vec<Menu> = menus
            .into_iter()
            .filter(|m| m.system_id == Some(system) && m.is_displayable())
            .collect();

        Ok(build_tree(menus))
    }

    /// Full navigation of a system, hidden nodes included, for administrators.
    #[instrument(skip(self), fields(system_id = %system), err)]
    pub async fn system_tree(&self, system: SystemId) -> Result<Vec<MenuNode>, AuthError> {
        let menus = self
            .store
            .within("menus_for_system", self.store.get().menus_for_system(system))
            .await?;
        Ok(build_tree(menus))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn menu(id: i64, parent: Option<i64>, sequence: i32) -> Menu {
        Menu {
            id: MenuId::new(id),
            code: format!("m{id}"),
            name: format!("Menu {id}"),
            system_id: Some(SystemId::new(1)),
            parent_id: parent.map(MenuId::new),
            path: format!("/m{id}"),
            icon: String::new(),
            sequence,
            is_visible: true,
            is_active: true,
        }
    }

    fn ids(nodes: &[MenuNode]) -> Vec<i64> {
        nodes.iter().map(|n| n.menu.id.get()).collect()
    }

    fn total(nodes: &[MenuNode]) -> usize {
        nodes.iter().map(MenuNode::node_count).sum()
    }

    #[test]
    fn empty_input_yields_empty_forest() {
        assert!(build_tree(Vec::new()).is_empty());
    }

    #[test]
    fn parent_child_pair_yields_one_root_with_one_child() {
        let forest = build_tree(vec![menu(2, Some(1), 1), menu(1, None, 1)]);
        assert_eq!(ids(&forest), vec![1]);
        assert_eq!(ids(&forest[0].children), vec![2]);
    }

    #[test]
    fn dangling_parent_is_promoted_to_root() {
        let forest = build_tree(vec![menu(1, None, 2), menu(5, Some(99), 1)]);
        assert_eq!(ids(&forest), vec![5, 1]);
    }

    #[test]
    fn siblings_sort_by_sequence_and_ties_keep_input_order() {
        let forest = build_tree(vec![
            menu(1, None, 1),
            menu(10, Some(1), 3),
            menu(11, Some(1), 1),
            menu(12, Some(1), 3),
            menu(13, Some(1), 2),
        ]);
        assert_eq!(ids(&forest[0].children), vec![11, 13, 10, 12]);
    }

    #[test]
    fn self_parent_is_a_root() {
        let forest = build_tree(vec![menu(1, Some(1), 1)]);
        assert_eq!(ids(&forest), vec![1]);
        assert!(forest[0].children.is_empty());
    }

    #[test]
    fn cycle_is_broken_without_losing_nodes() {
        let forest = build_tree(vec![
            menu(3, Some(2), 1),
            menu(1, Some(2), 1),
            menu(2, Some(1), 2),
        ]);
        assert_eq!(total(&forest), 3);
        assert_eq!(forest.len(), 1);
    }

    #[test]
    fn duplicate_ids_collapse() {
        let forest = build_tree(vec![menu(1, None, 1), menu(1, None, 1)]);
        assert_eq!(total(&forest), 1);
    }

    #[test]
    fn nested_levels_are_preserved() {
        let forest = build_tree(vec![
            menu(1, None, 1),
            menu(2, Some(1), 1),
            menu(3, Some(2), 1),
            menu(4, Some(3), 1),
        ]);
        assert_eq!(forest.len(), 1);
        assert_eq!(forest[0].children[0].children[0].children[0].menu.id, MenuId::new(4));
    }

    #[test]
    fn serializes_children_beside_menu_fields() {
        let forest = build_tree(vec![menu(1, None, 1), menu(2, Some(1), 1)]);
        let json = serde_json::to_value(&forest).unwrap();
        assert_eq!(json[0]["code"], "m1");
        assert_eq!(json[0]["children"][0]["code"], "m2");
    }

    fn arbitrary_menus() -> impl Strategy<Value = Vec<Menu>> {
        proptest::collection::vec((proptest::option::of(1i64..40), -5i32..5), 0..40).prop_map(|specs| {
            specs
                .into_iter()
                .enumerate()
                .map(|(i, (parent, seq))| menu(i as i64 + 1, parent, seq))
                .collect()
        })
    }

    fn check_order(nodes: &[MenuNode]) -> bool {
        nodes.windows(2).all(|w| w[0].menu.sequence <= w[1].menu.sequence)
            && nodes.iter().all(|n| check_order(&n.children))
    }

    fn collect_ids(nodes: &[MenuNode], out: &mut Vec<i64>) {
        for n in nodes {
            out.push(n.menu.id.get());
            collect_ids(&n.children, out);
        }
    }

    proptest! {
        #[test]
        fn every_node_appears_exactly_once(menus in arbitrary_menus()) {
            let expected: HashSet<i64> = menus.iter().map(|m| m.id.get()).collect();
            let forest = build_tree(menus);
            let mut seen = Vec::new();
            collect_ids(&forest, &mut seen);
            prop_assert_eq!(seen.len(), expected.len());
            prop_assert_eq!(seen.into_iter().collect::<HashSet<_>>(), expected);
        }

        #[test]
        fn every_level_is_ordered_by_sequence(menus in arbitrary_menus()) {
            prop_assert!(check_order(&build_tree(menus)));
        }
    }
}
