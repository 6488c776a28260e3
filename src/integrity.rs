//! Nested set verification and renumbering over rows already loaded from the store.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;

use crate::error::TreeError;

/// Structural fields of one nested set row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NestedRow<Id> {
    pub id: Id,
    pub parent: Option<Id>,
    pub left: Option<i64>,
    pub right: Option<i64>,
    pub level: Option<i64>,
    /// Root column value in forest mode.
    pub scope: Option<String>,
}

/// Outcome of a tree verification. Problems are data, not errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verification {
    Valid,
    Invalid(Vec<String>),
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid)
    }

    pub fn errors(&self) -> &[String] {
        match self {
            Verification::Valid => &[],
            Verification::Invalid(errors) => errors,
        }
    }

    fn from_errors(errors: Vec<String>) -> Self {
        if errors.is_empty() {
            Verification::Valid
        } else {
            Verification::Invalid(errors)
        }
    }
}

/// Check every nested set invariant, scope by scope.
pub fn verify_rows<Id>(rows: &[NestedRow<Id>], forest: bool) -> Verification
where
    Id: Clone + Eq + Hash + Display,
{
    let by_id: HashMap<&Id, &NestedRow<Id>> = rows.iter().map(|row| (&row.id, row)).collect();

    let mut scopes: BTreeMap<Option<&str>, Vec<&NestedRow<Id>>> = BTreeMap::new();
    for row in rows {
        let key = if forest { row.scope.as_deref() } else { None };
        scopes.entry(key).or_default().push(row);
    }

    let mut errors = Vec::new();
    for (scope, members) in scopes {
        let suffix = match (forest, scope) {
            (true, Some(scope)) => format!(" on tree root: {scope}"),
            (true, None) => " on tree root: NULL".to_string(),
            (false, _) => String::new(),
        };
        verify_scope(&members, &by_id, &suffix, &mut errors);
    }

    Verification::from_errors(errors)
}

fn verify_scope<Id>(
    members: &[&NestedRow<Id>],
    by_id: &HashMap<&Id, &NestedRow<Id>>,
    suffix: &str,
    errors: &mut Vec<String>,
) where
    Id: Clone + Eq + Hash + Display,
{
    let edge = members.len() as i64 * 2;
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for row in members {
        for value in [row.left, row.right].into_iter().flatten() {
            *counts.entry(value).or_default() += 1;
        }
    }
    for index in 1..=edge {
        match counts.get(&index).copied().unwrap_or(0) {
            1 => {}
            0 => errors.push(format!("index [{index}], missing{suffix}")),
            _ => errors.push(format!("index [{index}], duplicate{suffix}")),
        }
    }
    for index in counts.keys().filter(|index| **index < 1 || **index > edge) {
        errors.push(format!("index [{index}], out of range{suffix}"));
    }

    let orphans: Vec<&NestedRow<Id>> = members
        .iter()
        .copied()
        .filter(|row| matches!(&row.parent, Some(parent) if !by_id.contains_key(parent)))
        .collect();
    if !orphans.is_empty() {
        for row in orphans {
            errors.push(format!("node [{}] has missing parent{suffix}", row.id));
        }
        return;
    }

    for row in members {
        if let (Some(left), Some(right)) = (row.left, row.right) {
            if left > right {
                errors.push(format!("node [{}], left is greater than right{suffix}", row.id));
            }
        }
    }

    let mut flagged: HashSet<&Id> = HashSet::new();
    for row in members {
        let (left, right) = match (row.left, row.right) {
            (Some(left), Some(right)) if left > 0 && right > 0 => (left, right),
            _ => {
                errors.push(format!("node [{}] has invalid left or right values", row.id));
                flagged.insert(&row.id);
                continue;
            }
        };
        if left == right {
            errors.push(format!("node [{}] has identical left and right values", row.id));
            flagged.insert(&row.id);
            continue;
        }
        match row.parent.as_ref().and_then(|parent| by_id.get(parent)) {
            Some(parent) => {
                let parent_left = parent.left.unwrap_or(0);
                let parent_right = parent.right.unwrap_or(0);
                if left < parent_left {
                    errors.push(format!(
                        "node [{}] left is less than parent`s [{}] left value",
                        row.id, parent.id
                    ));
                    flagged.insert(&row.id);
                } else if right > parent_right {
                    errors.push(format!(
                        "node [{}] right is greater than parent`s [{}] right value",
                        row.id, parent.id
                    ));
                    flagged.insert(&row.id);
                }
            }
            None => {
                let enclosed = members.iter().any(|other| {
                    matches!((other.left, other.right), (Some(l), Some(r)) if l < left && r > right)
                });
                if enclosed {
                    errors.push(format!(
                        "node [{}] parent field is blank, but it has a parent",
                        row.id
                    ));
                    flagged.insert(&row.id);
                }
            }
        }
    }

    sweep_intervals(members, &flagged, errors);
    check_levels(members, by_id, errors);
}

/// Walk intervals in left order with an ancestor stack to find partial overlaps and nodes
/// nested directly under something other than their parent.
fn sweep_intervals<Id>(members: &[&NestedRow<Id>], flagged: &HashSet<&Id>, errors: &mut Vec<String>)
where
    Id: Clone + Eq + Hash + Display,
{
    let mut intervals: Vec<(i64, i64, &NestedRow<Id>)> = members
        .iter()
        .filter_map(|row| match (row.left, row.right) {
            (Some(left), Some(right)) if left > 0 && left < right => Some((left, right, *row)),
            _ => None,
        })
        .collect();
    intervals.sort_by_key(|(left, _, _)| *left);

    let mut stack: Vec<(i64, &NestedRow<Id>)> = Vec::new();
    for (left, right, row) in intervals {
        while matches!(stack.last(), Some((top_right, _)) if *top_right < left) {
            stack.pop();
        }
        if let Some((top_right, top)) = stack.last() {
            if right > *top_right {
                errors.push(format!(
                    "node [{}] partially overlaps node [{}]",
                    row.id, top.id
                ));
                continue;
            }
            if let Some(parent) = &row.parent {
                if parent != &top.id && !flagged.contains(&row.id) {
                    errors.push(format!(
                        "node [{}] is nested under node [{}] instead of its parent [{parent}]",
                        row.id, top.id
                    ));
                }
            }
        }
        stack.push((right, row));
    }
}

fn check_levels<Id>(
    members: &[&NestedRow<Id>],
    by_id: &HashMap<&Id, &NestedRow<Id>>,
    errors: &mut Vec<String>,
) where
    Id: Clone + Eq + Hash + Display,
{
    for row in members {
        let Some(level) = row.level else { continue };
        let expected = match row.parent.as_ref().and_then(|parent| by_id.get(parent)) {
            Some(parent) => match parent.level {
                Some(parent_level) => parent_level + 1,
                None => continue,
            },
            None => 0,
        };
        if level != expected {
            errors.push(format!(
                "node [{}] has level [{level}], expected [{expected}]",
                row.id
            ));
        }
    }
}

/// Fresh structural values for one node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Numbering<Id> {
    pub id: Id,
    pub left: i64,
    pub right: i64,
    pub level: i64,
    /// Root of the tree the node was reached from.
    pub root: Id,
}

/// Number every row by pre-order traversal from the rows without a parent.
///
/// Siblings keep the order in which they appear in `rows`. In forest mode every tree starts
/// again at 1. Rows unreachable from a root make the numbering fail.
pub fn number_rows<Id>(rows: &[NestedRow<Id>], forest: bool) -> Result<Vec<Numbering<Id>>, TreeError>
where
    Id: Clone + Eq + Hash + Display,
{
    let roots: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| row.parent.is_none())
        .map(|(index, _)| index)
        .collect();

    let numbered = walk(rows, &roots, 1, 0, forest)?;
    if numbered.len() != rows.len() {
        let reached: HashSet<&Id> = numbered.iter().map(|node| &node.id).collect();
        let unreachable = rows
            .iter()
            .filter(|row| !reached.contains(&row.id))
            .map(|row| row.id.to_string())
            .collect::<Vec<_>>();
        return Err(TreeError::invariant(format!(
            "nodes [{}] are not reachable from any root",
            unreachable.join(", ")
        )));
    }
    Ok(numbered)
}

/// Renumber the descendants of `root`, keeping the root's own left value and level.
pub fn number_subtree<Id>(
    rows: &[NestedRow<Id>],
    root: &Id,
    left: i64,
    level: i64,
) -> Result<Vec<Numbering<Id>>, TreeError>
where
    Id: Clone + Eq + Hash + Display,
{
    let index = rows
        .iter()
        .position(|row| &row.id == root)
        .ok_or_else(|| TreeError::invariant(format!("node [{root}] is not part of its subtree")))?;
    walk(rows, &[index], left, level, false)
}

struct Frame {
    index: usize,
    level: i64,
    next: usize,
}

fn walk<Id>(
    rows: &[NestedRow<Id>],
    roots: &[usize],
    start: i64,
    base_level: i64,
    restart_per_root: bool,
) -> Result<Vec<Numbering<Id>>, TreeError>
where
    Id: Clone + Eq + Hash + Display,
{
    let mut children: HashMap<&Id, Vec<usize>> = HashMap::new();
    for (index, row) in rows.iter().enumerate() {
        if let Some(parent) = &row.parent {
            children.entry(parent).or_default().push(index);
        }
    }

    let mut numbered = Vec::with_capacity(rows.len());
    let mut visited: BTreeSet<usize> = BTreeSet::new();
    let mut counter = start;

    for &root in roots {
        if restart_per_root {
            counter = start;
        }
        let root_id = rows[root].id.clone();
        let mut lefts: HashMap<usize, i64> = HashMap::new();
        let mut stack = vec![Frame {
            index: root,
            level: base_level,
            next: 0,
        }];
        visited.insert(root);
        lefts.insert(root, counter);
        counter += 1;

        while let Some(frame) = stack.last_mut() {
            let kids = children
                .get(&rows[frame.index].id)
                .map(Vec::as_slice)
                .unwrap_or(&[]);
            if let Some(&child) = kids.get(frame.next) {
                frame.next += 1;
                if !visited.insert(child) {
                    return Err(TreeError::invariant(format!(
                        "node [{}] is reachable twice; parent pointers form a cycle",
                        rows[child].id
                    )));
                }
                let level = frame.level + 1;
                lefts.insert(child, counter);
                counter += 1;
                stack.push(Frame {
                    index: child,
                    level,
                    next: 0,
                });
            } else {
                let left = lefts.get(&frame.index).copied().unwrap_or(counter);
                numbered.push(Numbering {
                    id: rows[frame.index].id.clone(),
                    left,
                    right: counter,
                    level: frame.level,
                    root: root_id.clone(),
                });
                counter += 1;
                stack.pop();
            }
        }
    }

    Ok(numbered)
}
