use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Task;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    Member,
    Viewer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
            Role::Viewer => "viewer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            "viewer" | "guest" => Ok(Role::Viewer),
            other => Err(anyhow!("Unknown role '{}': expected admin|member|viewer", other)),
        }
    }
}

/// The user a request is made on behalf of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Admins edit anything; members edit tasks they own or are assigned; viewers edit nothing.
    pub fn can_edit(&self, task: &Task) -> bool {
        match self.role {
            Role::Admin => true,
            Role::Member => task.is_visible_to(&self.user_id),
            Role::Viewer => false,
        }
    }

    pub fn ensure_can_edit(&self, task: &Task, action: &str) -> Result<(), PermissionDenied> {
        if self.can_edit(task) {
            Ok(())
        } else {
            Err(PermissionDenied {
                user_id: self.user_id.clone(),
                action: action.to_string(),
                task_id: task.id.clone(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{user_id} is not allowed to {action} task {task_id}")]
pub struct PermissionDenied {
    pub user_id: String,
    pub action: String,
    pub task_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::task;

    #[test]
    fn members_edit_owned_and_assigned_tasks() {
        let member = Actor::new("u1", Role::Member);
        let mut owned = task("t1");
        owned.owner_id = "u1".into();
        let mut assigned = task("t2");
        assigned.assignee_id = Some("u1".into());
        let foreign = task("t3");

        assert!(member.can_edit(&owned));
        assert!(member.can_edit(&assigned));
        assert!(!member.can_edit(&foreign));
    }

    #[test]
    fn viewers_are_denied_with_context() {
        let viewer = Actor::new("u2", Role::Viewer);
        let mut owned = task("t1");
        owned.owner_id = "u2".into();

        let err = viewer.ensure_can_edit(&owned, "complete").unwrap_err();
        assert_eq!(err.task_id, "t1");
        assert_eq!(err.to_string(), "u2 is not allowed to complete task t1");
    }

    #[test]
    fn admins_edit_everything() {
        let admin = Actor::new("root", Role::Admin);
        assert!(admin.can_edit(&task("t9")));
    }
}
