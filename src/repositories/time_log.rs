//! # Time Log Repository
//!
//! Timers and manual time entries. Every listing is scoped to a set of
//! project ids so callers decide the organization boundary.

use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, IntoActiveModel,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use uuid::Uuid;

use super::{Page, RepositoryError};
use crate::models::TimeLog;
use crate::models::time_log::{
    self, ActiveModel as TimeLogActiveModel, Model as TimeLogModel, TimeLogStatus,
};

/// A log about to be inserted; `stopped_at: None` starts a timer.
#[derive(Debug, Clone)]
pub struct NewTimeLog {
    pub project_id: Uuid,
    pub task_id: Uuid,
    pub log_date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub stopped_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub notes: Option<String>,
    pub created_by: Uuid,
}

/// Replacement interval and notes for a stopped log.
#[derive(Debug, Clone, Default)]
pub struct TimeLogChanges {
    pub interval: Option<(DateTime<Utc>, DateTime<Utc>, i64)>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TimeLogFilter {
    pub project_ids: Vec<Uuid>,
    pub created_by: Option<Uuid>,
    pub task_id: Option<Uuid>,
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
    pub status: Option<TimeLogStatus>,
}

impl TimeLogFilter {
    fn condition(&self) -> Condition {
        let mut condition = Condition::all()
            .add(time_log::Column::ProjectId.is_in(self.project_ids.iter().copied()));
        if let Some(created_by) = self.created_by {
            condition = condition.add(time_log::Column::CreatedBy.eq(created_by));
        }
        if let Some(task_id) = self.task_id {
            condition = condition.add(time_log::Column::TaskId.eq(task_id));
        }
        if let Some(from) = self.from_date {
            condition = condition.add(time_log::Column::LogDate.gte(from));
        }
        if let Some(to) = self.to_date {
            condition = condition.add(time_log::Column::LogDate.lte(to));
        }
        match self.status {
            Some(TimeLogStatus::Running) => {
                condition = condition.add(time_log::Column::StoppedAt.is_null())
            }
            Some(TimeLogStatus::Stopped) => {
                condition = condition.add(time_log::Column::StoppedAt.is_not_null())
            }
            None => {}
        }
        condition
    }
}

/// One page of logs plus the totals over every matching row.
#[derive(Debug, Clone)]
pub struct TimeLogPage {
    pub rows: Vec<TimeLogModel>,
    pub total_count: u64,
    pub total_duration_seconds: i64,
}

pub struct TimeLogRepository<'a> {
    db: &'a DatabaseConnection,
}

impl<'a> TimeLogRepository<'a> {
    pub fn new(db: &'a DatabaseConnection) -> Self {
        Self { db }
    }

    pub async fn create(&self, request: NewTimeLog) -> Result<TimeLogModel, RepositoryError> {
        let now = Utc::now();
        TimeLogActiveModel {
            id: Set(Uuid::new_v4()),
            project_id: Set(request.project_id),
            task_id: Set(Some(request.task_id)),
            log_date: Set(request.log_date),
            started_at: Set(request.started_at.into()),
            stopped_at: Set(request.stopped_at.map(Into::into)),
            duration_seconds: Set(request.duration_seconds),
            notes: Set(request.notes),
            created_by: Set(request.created_by),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        }
        .insert(self.db)
        .await
        .map_err(RepositoryError::database_error)
    }

    pub async fn find(&self, id: Uuid) -> Result<TimeLogModel, RepositoryError> {
        TimeLog::find_by_id(id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)?
            .ok_or_else(|| RepositoryError::not_found("Time log"))
    }

    /// The user's running timer, if any.
    pub async fn running_for_user(
        &self,
        user_id: Uuid,
    ) -> Result<Option<TimeLogModel>, RepositoryError> {
        TimeLog::find()
            .filter(time_log::Column::CreatedBy.eq(user_id))
            .filter(time_log::Column::StoppedAt.is_null())
            .order_by_desc(time_log::Column::StartedAt)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn stop(
        &self,
        log: TimeLogModel,
        stopped_at: DateTime<Utc>,
        notes: Option<String>,
    ) -> Result<TimeLogModel, RepositoryError> {
        let started_at = log.started_at.with_timezone(&Utc);
        let duration = (stopped_at - started_at).num_seconds().max(0);
        let mut active = log.into_active_model();
        active.stopped_at = Set(Some(stopped_at.into()));
        active.duration_seconds = Set(Some(duration));
        if notes.is_some() {
            active.notes = Set(notes);
        }
        active.updated_at = Set(Utc::now().into());
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn update(
        &self,
        log: TimeLogModel,
        changes: TimeLogChanges,
    ) -> Result<TimeLogModel, RepositoryError> {
        let mut active = log.into_active_model();
        if let Some((started_at, stopped_at, duration)) = changes.interval {
            active.started_at = Set(started_at.into());
            active.stopped_at = Set(Some(stopped_at.into()));
            active.duration_seconds = Set(Some(duration));
        }
        if let Some(notes) = changes.notes {
            active.notes = Set(Some(notes));
        }
        active.updated_at = Set(Utc::now().into());
        active
            .update(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), RepositoryError> {
        let result = TimeLog::delete_by_id(id)
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("Time log"));
        }
        Ok(())
    }

    /// Matching logs, most recent day first.
    pub async fn list(
        &self,
        filter: &TimeLogFilter,
        page: Page,
    ) -> Result<TimeLogPage, RepositoryError> {
        if filter.project_ids.is_empty() {
            return Ok(TimeLogPage {
                rows: Vec::new(),
                total_count: 0,
                total_duration_seconds: 0,
            });
        }
        let query = TimeLog::find().filter(filter.condition());

        let total_count = query
            .clone()
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        let durations: Vec<Option<i64>> = query
            .clone()
            .select_only()
            .column(time_log::Column::DurationSeconds)
            .into_tuple()
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        let rows = query
            .order_by_desc(time_log::Column::LogDate)
            .order_by_desc(time_log::Column::StartedAt)
            .offset(page.offset)
            .limit(page.limit)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        Ok(TimeLogPage {
            rows,
            total_count,
            total_duration_seconds: durations.into_iter().flatten().sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{seed_org, seed_project, seed_task, setup_db};
    use chrono::{Duration, TimeZone};

    fn entry(project_id: Uuid, task_id: Uuid, user: Uuid, day: u32, seconds: i64) -> NewTimeLog {
        let started_at = Utc.with_ymd_and_hms(2025, 3, day, 9, 0, 0).unwrap();
        NewTimeLog {
            project_id,
            task_id,
            log_date: started_at.date_naive(),
            started_at,
            stopped_at: Some(started_at + Duration::seconds(seconds)),
            duration_seconds: Some(seconds),
            notes: None,
            created_by: user,
        }
    }

    #[tokio::test]
    async fn listing_filters_and_totals_every_match() {
        let db = setup_db().await;
        let owner = Uuid::new_v4();
        let org = seed_org(&db, "Acme", owner).await;
        let project = seed_project(&db, org.id, "Apollo", owner).await;
        let task = seed_task(&db, project.id, "Build", owner).await;
        let repo = TimeLogRepository::new(&db);

        for (day, seconds) in [(1, 600), (2, 1200), (3, 1800)] {
            repo.create(entry(project.id, task.id, owner, day, seconds))
                .await
                .unwrap();
        }
        repo.create(entry(project.id, task.id, Uuid::new_v4(), 2, 99))
            .await
            .unwrap();

        let filter = TimeLogFilter {
            project_ids: vec![project.id],
            created_by: Some(owner),
            from_date: NaiveDate::from_ymd_opt(2025, 3, 2),
            ..Default::default()
        };
        let page = repo.list(&filter, Page::new(0, 1)).await.unwrap();
        assert_eq!(page.total_count, 2);
        assert_eq!(page.total_duration_seconds, 3000);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.rows[0].duration_seconds, Some(1800));

        let outside = TimeLogFilter {
            project_ids: Vec::new(),
            ..Default::default()
        };
        assert_eq!(repo.list(&outside, Page::new(0, 10)).await.unwrap().total_count, 0);
    }

    #[tokio::test]
    async fn stopping_a_timer_records_its_duration() {
        let db = setup_db().await;
        let owner = Uuid::new_v4();
        let org = seed_org(&db, "Acme", owner).await;
        let project = seed_project(&db, org.id, "Apollo", owner).await;
        let task = seed_task(&db, project.id, "Build", owner).await;
        let repo = TimeLogRepository::new(&db);

        let started_at = Utc.with_ymd_and_hms(2025, 3, 1, 23, 30, 0).unwrap();
        let running = repo
            .create(NewTimeLog {
                stopped_at: None,
                duration_seconds: None,
                started_at,
                ..entry(project.id, task.id, owner, 1, 0)
            })
            .await
            .unwrap();
        assert_eq!(running.status(), TimeLogStatus::Running);
        assert_eq!(
            repo.running_for_user(owner).await.unwrap().map(|log| log.id),
            Some(running.id)
        );

        let stopped = repo
            .stop(running, started_at + Duration::minutes(45), Some("late".into()))
            .await
            .unwrap();
        assert_eq!(stopped.duration_seconds, Some(45 * 60));
        assert_eq!(stopped.notes.as_deref(), Some("late"));
        assert!(repo.running_for_user(owner).await.unwrap().is_none());
    }
}
