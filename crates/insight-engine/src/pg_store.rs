//! PostgreSQL 태스크 저장소.
//!
//! `analysis_tasks` 테이블에 대한 [`TaskStore`] 구현입니다.
//! 멱등 upsert는 `ON CONFLICT DO NOTHING`으로, 상태 전이 보호는
//! 조건부 UPDATE로 표현합니다. `parameters`는 JSONB로 보관합니다.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{FromRow, PgPool};
use tracing::debug;

use insight_core::{Task, TaskStatus};

use crate::error::{EngineError, Result};
use crate::store::{TaskStore, UpsertOutcome};

/// analysis_tasks 테이블의 데이터베이스 표현.
#[derive(Debug, Clone, FromRow)]
struct TaskRow {
    task_id: String,
    owner_id: String,
    subject: String,
    market: String,
    parameters: Value,
    status: String,
    progress_percent: i16,
    stage_label: String,
    result_ref: Option<String>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TaskRow {
    fn into_task(self) -> Result<Task> {
        Ok(Task {
            market: self
                .market
                .parse()
                .map_err(|e: String| EngineError::Store(e))?,
            status: self
                .status
                .parse()
                .map_err(|e: String| EngineError::Store(e))?,
            task_id: self.task_id,
            owner_id: self.owner_id,
            subject: self.subject,
            parameters: self.parameters,
            progress_percent: self.progress_percent.clamp(0, 100) as u8,
            stage_label: self.stage_label,
            created_at: self.created_at,
            updated_at: self.updated_at,
            result_ref: self.result_ref,
            error_message: self.error_message,
        })
    }
}

/// PostgreSQL 기반 태스크 저장소.
pub struct PgTaskStore {
    pool: PgPool,
}

impl PgTaskStore {
    /// 연결 풀로 저장소를 생성합니다.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 데이터베이스 마이그레이션을 실행합니다.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| EngineError::Store(e.to_string()))?;
        Ok(())
    }

    /// 전이 실패를 NotFound/AlreadyFinished/IllegalTransition으로 구분합니다.
    async fn classify_no_update(&self, task_id: &str, attempted: &str) -> EngineError {
        match self.get(task_id).await {
            Ok(Some(task)) if task.status.is_terminal() => {
                EngineError::AlreadyFinished(task_id.to_string())
            }
            Ok(Some(task)) => EngineError::IllegalTransition(format!(
                "{} -> {} for task {}",
                task.status, attempted, task_id
            )),
            Ok(None) => EngineError::NotFound(task_id.to_string()),
            Err(e) => e,
        }
    }
}

#[async_trait]
impl TaskStore for PgTaskStore {
    async fn upsert_new(&self, task: Task) -> Result<UpsertOutcome> {
        let result = sqlx::query(
            r#"
            INSERT INTO analysis_tasks (
                task_id, owner_id, subject, market, parameters,
                status, progress_percent, stage_label, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (task_id) DO NOTHING
            "#,
        )
        .bind(&task.task_id)
        .bind(&task.owner_id)
        .bind(&task.subject)
        .bind(task.market.as_str())
        .bind(&task.parameters)
        .bind(task.status.as_str())
        .bind(task.progress_percent as i16)
        .bind(&task.stage_label)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(task_id = %task.task_id, "Task already exists, submission is a no-op");
            Ok(UpsertOutcome::AlreadyExists)
        } else {
            Ok(UpsertOutcome::Created)
        }
    }

    async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM analysis_tasks WHERE task_id = $1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TaskRow::into_task).transpose()
    }

    async fn update_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        // 목표 상태별 허용 선행 상태
        let allowed_from: &[&str] = match status {
            TaskStatus::Running => &["queued"],
            TaskStatus::Succeeded | TaskStatus::Failed => &["running"],
            TaskStatus::Cancelled => &["queued", "running"],
            TaskStatus::Queued => &[],
        };

        let result = sqlx::query(
            r#"
            UPDATE analysis_tasks
            SET status = $2, updated_at = now()
            WHERE task_id = $1 AND status = ANY($3)
            "#,
        )
        .bind(task_id)
        .bind(status.as_str())
        .bind(allowed_from)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.classify_no_update(task_id, status.as_str()).await);
        }
        Ok(())
    }

    async fn update_progress(&self, task_id: &str, percent: u8, stage_label: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE analysis_tasks
            SET progress_percent = GREATEST(progress_percent, $2),
                stage_label = $3,
                updated_at = now()
            WHERE task_id = $1
            "#,
        )
        .bind(task_id)
        .bind(percent.min(100) as i16)
        .bind(stage_label)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::NotFound(task_id.to_string()));
        }
        Ok(())
    }

    async fn complete(&self, task_id: &str, result_ref: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE analysis_tasks
            SET status = 'succeeded',
                progress_percent = 100,
                stage_label = 'completed',
                result_ref = $2,
                updated_at = now()
            WHERE task_id = $1 AND status = 'running'
            "#,
        )
        .bind(task_id)
        .bind(result_ref)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.classify_no_update(task_id, "succeeded").await);
        }
        Ok(())
    }

    async fn fail(&self, task_id: &str, error_message: &str) -> Result<()> {
        // 실패해도 이미 기록된 진행률은 유지
        let result = sqlx::query(
            r#"
            UPDATE analysis_tasks
            SET status = 'failed',
                error_message = $2,
                updated_at = now()
            WHERE task_id = $1 AND status = 'running'
            "#,
        )
        .bind(task_id)
        .bind(error_message)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.classify_no_update(task_id, "failed").await);
        }
        Ok(())
    }

    async fn mark_cancelled(&self, task_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE analysis_tasks
            SET status = 'cancelled', updated_at = now()
            WHERE task_id = $1 AND status IN ('queued', 'running')
            "#,
        )
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        match self.get(task_id).await? {
            Some(task) if task.status == TaskStatus::Cancelled => Ok(false),
            Some(_) => Err(EngineError::AlreadyFinished(task_id.to_string())),
            None => Err(EngineError::NotFound(task_id.to_string())),
        }
    }

    async fn find_by_owner_keys(&self, keys: &[String]) -> Result<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(
            r#"
            SELECT * FROM analysis_tasks
            WHERE owner_id = ANY($1)
            ORDER BY created_at DESC
            "#,
        )
        .bind(keys)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TaskRow::into_task).collect()
    }

    async fn count_finished_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM analysis_tasks
            WHERE status IN ('succeeded', 'failed', 'cancelled')
              AND updated_at < $1
            "#,
        )
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await?;

        Ok(count.max(0) as u64)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
