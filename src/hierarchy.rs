//! Nested views of flat node lists.

use std::collections::HashMap;
use std::hash::Hash;

use crate::traits::TreeModel;

/// A node together with its children, in the order the flat list listed them.
#[derive(Clone, Debug, PartialEq)]
pub struct TreeNode<T> {
    pub model: T,
    pub children: Vec<TreeNode<T>>,
}

impl<T> TreeNode<T> {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Number of nodes in this subtree, the node itself included.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(TreeNode::size).sum::<usize>()
    }

    /// Models of the subtree in pre-order.
    pub fn flatten(self) -> Vec<T> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node.model);
            stack.extend(node.children.into_iter().rev());
        }
        out
    }
}

/// Nest `items` by their parent keys.
///
/// Items whose parent is not part of the list become top-level nodes. Sibling order follows
/// the input order. Items caught in a parent cycle are not reachable and are left out.
pub fn build_tree_by<T, K, FK, FP>(items: Vec<T>, key: FK, parent: FP) -> Vec<TreeNode<T>>
where
    K: Eq + Hash,
    FK: Fn(&T) -> K,
    FP: Fn(&T) -> Option<K>,
{
    let index: HashMap<K, usize> = items
        .iter()
        .enumerate()
        .map(|(position, item)| (key(item), position))
        .collect();

    let mut children: Vec<Vec<usize>> = vec![Vec::new(); items.len()];
    let mut tops = Vec::new();
    for (position, item) in items.iter().enumerate() {
        match parent(item).and_then(|parent| index.get(&parent).copied()) {
            Some(owner) if owner != position => children[owner].push(position),
            _ => tops.push(position),
        }
    }

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    tops.into_iter()
        .filter_map(|position| assemble(position, &children, &mut slots))
        .collect()
}

fn assemble<T>(
    position: usize,
    children: &[Vec<usize>],
    slots: &mut [Option<T>],
) -> Option<TreeNode<T>> {
    let model = slots[position].take()?;
    let children = children[position]
        .iter()
        .filter_map(|&child| assemble(child, children, slots))
        .collect();
    Some(TreeNode { model, children })
}

/// Nest tree models by their parent pointers.
pub fn build_tree<M: TreeModel>(nodes: Vec<M>) -> Vec<TreeNode<M>> {
    build_tree_by(nodes, |node| node.id(), |node| node.parent_id())
}
