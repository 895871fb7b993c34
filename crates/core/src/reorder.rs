//! Drag-to-reorder inside a (possibly filtered) list.

use std::collections::HashMap;

use serde::Serialize;
use thiserror::Error;

use crate::model::Task;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReorderError {
    #[error("Nothing to reorder: the list is empty")]
    EmptyList,
    #[error("Task {0} is not in the visible list")]
    UnknownTask(String),
    #[error("Position {index} is out of range for a list of {len}")]
    OutOfRange { index: usize, len: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReorderPlan {
    /// The full list with the visible tasks renumbered and moved.
    pub tasks: Vec<Task>,
    /// `(id, sort_order)` for every task of the visible sequence.
    pub writes: Vec<(String, i64)>,
    /// Visible ids in their new order.
    pub sequence: Vec<String>,
}

/// Move `task_id` to `to_index` within `visible_ids` and renumber that
/// sequence `0..N-1`.
///
/// Visible tasks keep the slots they already occupy in `full`; the slots are
/// refilled in the new order. Tasks outside the sequence keep both their slot
/// and their `sort_order`.
pub fn reorder(
    full: &[Task],
    visible_ids: &[String],
    task_id: &str,
    to_index: usize,
) -> Result<ReorderPlan, ReorderError> {
    if visible_ids.is_empty() {
        return Err(ReorderError::EmptyList);
    }
    let len = visible_ids.len();
    if to_index >= len {
        return Err(ReorderError::OutOfRange {
            index: to_index,
            len,
        });
    }
    let from_index = visible_ids
        .iter()
        .position(|id| id == task_id)
        .ok_or_else(|| ReorderError::UnknownTask(task_id.to_string()))?;
    if let Some(missing) = visible_ids
        .iter()
        .find(|id| !full.iter().any(|task| &task.id == *id))
    {
        return Err(ReorderError::UnknownTask(missing.clone()));
    }

    let mut sequence = visible_ids.to_vec();
    let moved = sequence.remove(from_index);
    sequence.insert(to_index, moved);

    let writes: Vec<(String, i64)> = sequence
        .iter()
        .enumerate()
        .map(|(order, id)| (id.clone(), order as i64))
        .collect();

    let mut tasks = full.to_vec();
    apply_sequence(&mut tasks, &writes);

    Ok(ReorderPlan {
        tasks,
        writes,
        sequence,
    })
}

/// Rewrite `sort_order` for the listed ids and lay them out, in list order,
/// over the slots they already hold.
pub fn apply_sequence(tasks: &mut [Task], orders: &[(String, i64)]) {
    let rank: HashMap<&str, usize> = orders
        .iter()
        .enumerate()
        .map(|(position, (id, _))| (id.as_str(), position))
        .collect();

    let mut slots: Vec<usize> = Vec::with_capacity(orders.len());
    let mut members: Vec<Task> = Vec::with_capacity(orders.len());
    for (slot, task) in tasks.iter().enumerate() {
        if rank.contains_key(task.id.as_str()) {
            slots.push(slot);
            members.push(task.clone());
        }
    }
    members.sort_by_key(|task| rank.get(task.id.as_str()).copied().unwrap_or(usize::MAX));

    for (slot, mut task) in slots.into_iter().zip(members) {
        if let Some(position) = rank.get(task.id.as_str()) {
            task.sort_order = orders[*position].1;
        }
        tasks[slot] = task;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::task;
    use pretty_assertions::assert_eq;

    fn ids(tasks: &[Task]) -> Vec<&str> {
        tasks.iter().map(|task| task.id.as_str()).collect()
    }

    /// Six tasks; `a`, `c`, `d`, `f` pass the active filter.
    fn board() -> (Vec<Task>, Vec<String>) {
        let full: Vec<Task> = ["a", "b", "c", "d", "e", "f"]
            .iter()
            .enumerate()
            .map(|(order, id)| {
                let mut task = task(id);
                task.sort_order = (order as i64) * 10;
                task
            })
            .collect();
        let visible = ["a", "c", "d", "f"].iter().map(|id| id.to_string()).collect();
        (full, visible)
    }

    #[test]
    fn moving_within_filtered_list_renumbers_subset_only() {
        let (full, visible) = board();
        let plan = reorder(&full, &visible, "d", 0).unwrap();

        assert_eq!(plan.sequence, vec!["d", "a", "c", "f"]);
        assert_eq!(ids(&plan.tasks), vec!["d", "b", "a", "c", "e", "f"]);

        let orders: Vec<i64> = plan
            .sequence
            .iter()
            .map(|id| plan.tasks.iter().find(|t| &t.id == id).unwrap().sort_order)
            .collect();
        assert!(orders.windows(2).all(|pair| pair[0] < pair[1]));
        assert_eq!(orders, vec![0, 1, 2, 3]);

        let untouched: Vec<(&str, i64)> = plan
            .tasks
            .iter()
            .filter(|t| t.id == "b" || t.id == "e")
            .map(|t| (t.id.as_str(), t.sort_order))
            .collect();
        assert_eq!(untouched, vec![("b", 10), ("e", 40)]);
    }

    #[test]
    fn writes_cover_the_whole_sequence() {
        let (full, visible) = board();
        let plan = reorder(&full, &visible, "a", 3).unwrap();
        assert_eq!(
            plan.writes,
            vec![
                ("c".to_string(), 0),
                ("d".to_string(), 1),
                ("f".to_string(), 2),
                ("a".to_string(), 3)
            ]
        );
    }

    #[test]
    fn rejects_invalid_requests() {
        let (full, visible) = board();
        assert_eq!(
            reorder(&full, &[], "a", 0).unwrap_err(),
            ReorderError::EmptyList
        );
        assert_eq!(
            reorder(&full, &visible, "b", 0).unwrap_err(),
            ReorderError::UnknownTask("b".into())
        );
        assert_eq!(
            reorder(&full, &visible, "a", 4).unwrap_err(),
            ReorderError::OutOfRange { index: 4, len: 4 }
        );
    }

    #[test]
    fn input_list_is_left_alone() {
        let (full, visible) = board();
        let before = full.clone();
        let _ = reorder(&full, &visible, "f", 1).unwrap();
        assert_eq!(full, before);
    }
}
