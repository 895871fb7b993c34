//! Retention rules for soft-deleted tasks.

use chrono::{DateTime, Duration, Utc};

use crate::model::Task;
use crate::permissions::Actor;

pub const RETENTION_DAYS: i64 = 30;

/// When a trashed task becomes eligible for permanent deletion.
pub fn purge_at(task: &Task) -> Option<DateTime<Utc>> {
    task.deleted_at
        .map(|deleted| deleted + Duration::days(RETENTION_DAYS))
}

pub fn is_expired(task: &Task, now: DateTime<Utc>) -> bool {
    purge_at(task).map_or(false, |purge| purge <= now)
}

/// Whole days left before purge, rounded up; zero once expired.
pub fn days_remaining(task: &Task, now: DateTime<Utc>) -> Option<i64> {
    purge_at(task).map(|purge| {
        let left = purge - now;
        if left <= Duration::zero() {
            0
        } else {
            let days = left.num_days();
            if left > Duration::days(days) {
                days + 1
            } else {
                days
            }
        }
    })
}

/// Trashed tasks the actor may purge right now. Admins see everyone's trash.
pub fn expired_ids(tasks: &[Task], actor: &Actor, now: DateTime<Utc>) -> Vec<String> {
    tasks
        .iter()
        .filter(|task| is_expired(task, now))
        .filter(|task| actor.is_admin() || task.is_visible_to(&actor.user_id))
        .map(|task| task.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::task;
    use crate::permissions::Role;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn trashed(id: &str, deleted: DateTime<Utc>) -> Task {
        let mut task = task(id);
        task.deleted_at = Some(deleted);
        task
    }

    #[test]
    fn retention_window_is_thirty_days() {
        let deleted = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let task = trashed("t1", deleted);

        assert_eq!(
            purge_at(&task),
            Some(Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap())
        );
        assert!(!is_expired(&task, deleted + Duration::days(29)));
        assert!(is_expired(&task, deleted + Duration::days(30)));
        assert_eq!(
            days_remaining(&task, deleted + Duration::hours(12)),
            Some(30)
        );
        assert_eq!(days_remaining(&task, deleted + Duration::days(45)), Some(0));
    }

    #[test]
    fn live_tasks_never_expire() {
        let task = task("t1");
        assert_eq!(purge_at(&task), None);
        assert!(!is_expired(&task, Utc::now()));
    }

    #[test]
    fn members_only_purge_their_own_trash() {
        let deleted = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let now = deleted + Duration::days(31);
        let mut mine = trashed("mine", deleted);
        mine.owner_id = "u1".into();
        let theirs = trashed("theirs", deleted);
        let mut fresh = trashed("fresh", now);
        fresh.owner_id = "u1".into();
        let tasks = vec![mine, theirs, fresh];

        let member = Actor::new("u1", Role::Member);
        assert_eq!(expired_ids(&tasks, &member, now), vec!["mine"]);

        let admin = Actor::new("root", Role::Admin);
        assert_eq!(expired_ids(&tasks, &admin, now), vec!["mine", "theirs"]);
    }
}
