//! # Background Jobs
//!
//! The catalogue of tasks the API hands to the worker. On the wire a job is
//! a JSON envelope whose `payload` is `{"task": <name>, "args": {...}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", content = "args", rename_all = "snake_case")]
pub enum JobTask {
    SendEmail(SendEmailArgs),
    OrganizationInvitation(OrganizationInvitationArgs),
    TaskAssigned(TaskAssignedArgs),
    TaskUnassigned(TaskUnassignedArgs),
    TaskCompleted(TaskCompletedArgs),
    TaskCompletedNotice(TaskCompletedNoticeArgs),
    ProjectMemberAdded(ProjectMemberAddedArgs),
}

impl JobTask {
    pub fn name(&self) -> &'static str {
        match self {
            JobTask::SendEmail(_) => "send_email",
            JobTask::OrganizationInvitation(_) => "organization_invitation",
            JobTask::TaskAssigned(_) => "task_assigned",
            JobTask::TaskUnassigned(_) => "task_unassigned",
            JobTask::TaskCompleted(_) => "task_completed",
            JobTask::TaskCompletedNotice(_) => "task_completed_notice",
            JobTask::ProjectMemberAdded(_) => "project_member_added",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendEmailArgs {
    pub to_email: String,
    pub subject: String,
    /// File name under the templates directory
    pub template: String,
    /// Plain-text alternative
    pub text_content: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub template_vars: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationInvitationArgs {
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub org_name: String,
    pub inviter_id: Uuid,
    pub inviter_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAssignedArgs {
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub task_id: Uuid,
    pub task_title: String,
    pub assigned_by_id: Uuid,
    pub assigned_by_name: String,
    pub project_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskUnassignedArgs {
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub task_id: Uuid,
    pub task_title: String,
    pub unassigned_by_id: Uuid,
    pub unassigned_by_name: String,
    pub project_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletedArgs {
    pub project_id: Uuid,
    pub org_id: Uuid,
    pub task_id: Uuid,
    pub task_title: String,
    pub completed_by_id: Uuid,
    pub completed_by_name: String,
    pub project_name: String,
}

/// One recipient's share of a `task_completed` fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCompletedNoticeArgs {
    pub user_id: Uuid,
    #[serde(flatten)]
    pub completion: TaskCompletedArgs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectMemberAddedArgs {
    pub user_id: Uuid,
    pub org_id: Uuid,
    pub project_id: Uuid,
    pub project_name: String,
    pub added_by_id: Uuid,
    pub added_by_name: String,
}

/// Queue envelope carrying retry bookkeeping around a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub payload: JobTask,
    /// Failed attempts so far
    pub attempts: u32,
    pub max_attempts: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl Job {
    pub fn new(payload: JobTask, max_attempts: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            attempts: 0,
            max_attempts: max_attempts.max(1),
            enqueued_at: Utc::now(),
        }
    }

    /// Counts a failed attempt. Returns true while another attempt is allowed.
    pub fn record_failure(&mut self) -> bool {
        self.attempts += 1;
        self.attempts < self.max_attempts
    }
}
