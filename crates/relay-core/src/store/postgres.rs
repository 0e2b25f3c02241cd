//! PostgreSQL-backed run store implementation.
//!
//! Mirrors the SQLite backend; the two share the run-store contract and
//! differ only in placeholder syntax and column types (JSONB/BYTEA/TIMESTAMPTZ).

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::EngineError;

use super::{
    ChildCall, Claim, RunStore, StackRunRecord, TASKS_SERVICE, TaskRunRecord,
};

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations/postgresql");

/// PostgreSQL-backed run store.
#[derive(Clone)]
pub struct PostgresRunStore {
    pool: PgPool,
}

impl PostgresRunStore {
    /// Create a new Postgres run store from an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the given database URL and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self, EngineError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| EngineError::DatabaseError {
                operation: "connect".to_string(),
                details: format!("Failed to connect to Postgres: {}", e),
            })?;

        MIGRATOR
            .run(&pool)
            .await
            .map_err(|e| EngineError::DatabaseError {
                operation: "migrate".to_string(),
                details: format!("Failed to run migrations: {}", e),
            })?;

        Ok(Self { pool })
    }
}

#[async_trait::async_trait]
impl RunStore for PostgresRunStore {
    async fn create_submission(
        &self,
        task_id: &str,
        input: &Value,
    ) -> Result<(TaskRunRecord, StackRunRecord), EngineError> {
        let task_run_id = Uuid::new_v4().to_string();
        let stack_run_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO task_runs (id, task_id, input, status, created_at, updated_at)
            VALUES ($1, $2, $3, 'queued', $4, $4)
            "#,
        )
        .bind(&task_run_id)
        .bind(task_id)
        .bind(Json(input))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO stack_runs
                (id, parent_stack_run_id, parent_task_run_id, service_name, method_name,
                 args, status, created_at, updated_at)
            VALUES ($1, NULL, $2, $3, $4, $5, 'pending', $6, $6)
            "#,
        )
        .bind(&stack_run_id)
        .bind(&task_run_id)
        .bind(TASKS_SERVICE)
        .bind(task_id)
        .bind(Json(vec![input.clone()]))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let task_run =
            self.get_task_run(&task_run_id)
                .await?
                .ok_or_else(|| EngineError::TaskRunNotFound {
                    task_run_id: task_run_id.clone(),
                })?;
        let stack_run =
            self.get_stack_run(&stack_run_id)
                .await?
                .ok_or_else(|| EngineError::RunNotFound {
                    run_id: stack_run_id.clone(),
                })?;

        Ok((task_run, stack_run))
    }

    async fn get_task_run(&self, task_run_id: &str) -> Result<Option<TaskRunRecord>, EngineError> {
        let record = sqlx::query_as::<_, TaskRunRecord>(
            r#"
            SELECT id, task_id, input, status, result, error, waiting_on_stack_run_id,
                   created_at, updated_at, suspended_at, resumed_at, ended_at
            FROM task_runs
            WHERE id = $1
            "#,
        )
        .bind(task_run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_stack_run(
        &self,
        stack_run_id: &str,
    ) -> Result<Option<StackRunRecord>, EngineError> {
        let record = sqlx::query_as::<_, StackRunRecord>(
            r#"
            SELECT id, parent_stack_run_id, parent_task_run_id, service_name, method_name,
                   args, status, result, error, continuation, resume_payload,
                   waiting_on_stack_run_id, attempts, created_at, updated_at
            FROM stack_runs
            WHERE id = $1
            "#,
        )
        .bind(stack_run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn get_root_stack_run(
        &self,
        task_run_id: &str,
    ) -> Result<Option<StackRunRecord>, EngineError> {
        let record = sqlx::query_as::<_, StackRunRecord>(
            r#"
            SELECT id, parent_stack_run_id, parent_task_run_id, service_name, method_name,
                   args, status, result, error, continuation, resume_payload,
                   waiting_on_stack_run_id, attempts, created_at, updated_at
            FROM stack_runs
            WHERE parent_task_run_id = $1 AND parent_stack_run_id IS NULL
            "#,
        )
        .bind(task_run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn claim(&self, stack_run_id: &str) -> Result<Claim, EngineError> {
        let record = sqlx::query_as::<_, StackRunRecord>(
            r#"
            UPDATE stack_runs
            SET status = 'processing', updated_at = $1
            WHERE id = $2 AND status = 'pending'
            RETURNING id, parent_stack_run_id, parent_task_run_id, service_name, method_name,
                      args, status, result, error, continuation, resume_payload,
                      waiting_on_stack_run_id, attempts, created_at, updated_at
            "#,
        )
        .bind(Utc::now())
        .bind(stack_run_id)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(record) = record {
            return Ok(Claim::Claimed(record));
        }

        let exists =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM stack_runs WHERE id = $1")
                .bind(stack_run_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(if exists > 0 {
            Claim::AlreadyClaimed
        } else {
            Claim::NotFound
        })
    }

    async fn complete(&self, stack_run_id: &str, result: &Value) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE stack_runs
            SET status = 'completed',
                result = $1,
                error = NULL,
                waiting_on_stack_run_id = NULL,
                updated_at = $2
            WHERE id = $3 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(Json(result))
        .bind(Utc::now())
        .bind(stack_run_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn fail(&self, stack_run_id: &str, error: &str) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE stack_runs
            SET status = 'failed',
                error = $1,
                waiting_on_stack_run_id = NULL,
                updated_at = $2
            WHERE id = $3 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(error)
        .bind(Utc::now())
        .bind(stack_run_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn suspend(
        &self,
        parent_id: &str,
        call: &ChildCall,
        continuation: &[u8],
    ) -> Result<StackRunRecord, EngineError> {
        let mut tx = self.pool.begin().await?;

        let parent = sqlx::query_as::<_, StackRunRecord>(
            r#"
            SELECT id, parent_stack_run_id, parent_task_run_id, service_name, method_name,
                   args, status, result, error, continuation, resume_payload,
                   waiting_on_stack_run_id, attempts, created_at, updated_at
            FROM stack_runs
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(parent_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| EngineError::RunNotFound {
            run_id: parent_id.to_string(),
        })?;

        let child_id = Uuid::new_v4().to_string();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO stack_runs
                (id, parent_stack_run_id, parent_task_run_id, service_name, method_name,
                 args, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 'pending', $7, $7)
            "#,
        )
        .bind(&child_id)
        .bind(parent_id)
        .bind(&parent.parent_task_run_id)
        .bind(&call.service_name)
        .bind(&call.method_name)
        .bind(Json(&call.args))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        // One outstanding call per parent: the guarded update loses if the
        // run is not processing or already waits on a child.
        let updated = sqlx::query(
            r#"
            UPDATE stack_runs
            SET status = 'suspended_waiting_child',
                continuation = $1,
                resume_payload = NULL,
                waiting_on_stack_run_id = $2,
                updated_at = $3
            WHERE id = $4 AND status = 'processing' AND waiting_on_stack_run_id IS NULL
            "#,
        )
        .bind(continuation)
        .bind(&child_id)
        .bind(now)
        .bind(parent_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(EngineError::InvalidRunState {
                run_id: parent_id.to_string(),
                expected: "processing".to_string(),
                actual: parent.status,
            });
        }

        tx.commit().await?;

        self.get_stack_run(&child_id)
            .await?
            .ok_or_else(|| EngineError::RunNotFound { run_id: child_id })
    }

    async fn resume(&self, parent_id: &str, resume_payload: &Value) -> Result<(), EngineError> {
        let updated = sqlx::query(
            r#"
            UPDATE stack_runs
            SET status = 'pending',
                resume_payload = $1,
                waiting_on_stack_run_id = NULL,
                updated_at = $2
            WHERE id = $3 AND status = 'suspended_waiting_child'
            "#,
        )
        .bind(Json(resume_payload))
        .bind(Utc::now())
        .bind(parent_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            let exists =
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM stack_runs WHERE id = $1")
                    .bind(parent_id)
                    .fetch_one(&self.pool)
                    .await?;
            if exists == 0 {
                return Err(EngineError::RunNotFound {
                    run_id: parent_id.to_string(),
                });
            }
            // Duplicate resume after a retried trigger: idempotent no-op.
        }

        Ok(())
    }

    async fn find_waiter(
        &self,
        stack_run_id: &str,
    ) -> Result<Option<StackRunRecord>, EngineError> {
        let record = sqlx::query_as::<_, StackRunRecord>(
            r#"
            SELECT id, parent_stack_run_id, parent_task_run_id, service_name, method_name,
                   args, status, result, error, continuation, resume_payload,
                   waiting_on_stack_run_id, attempts, created_at, updated_at
            FROM stack_runs
            WHERE waiting_on_stack_run_id = $1
            "#,
        )
        .bind(stack_run_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn mark_task_run_processing(&self, task_run_id: &str) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE task_runs
            SET status = 'processing',
                resumed_at = CASE WHEN status = 'suspended' THEN $1 ELSE resumed_at END,
                waiting_on_stack_run_id = NULL,
                updated_at = $1
            WHERE id = $2 AND status IN ('queued', 'suspended')
            "#,
        )
        .bind(Utc::now())
        .bind(task_run_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_task_run_suspended(
        &self,
        task_run_id: &str,
        waiting_on: &str,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE task_runs
            SET status = 'suspended',
                waiting_on_stack_run_id = $1,
                suspended_at = $2,
                updated_at = $2
            WHERE id = $3 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(waiting_on)
        .bind(Utc::now())
        .bind(task_run_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn finish_task_run(
        &self,
        task_run_id: &str,
        result: Option<&Value>,
        error: Option<&str>,
    ) -> Result<(), EngineError> {
        sqlx::query(
            r#"
            UPDATE task_runs
            SET status = CASE
                    WHEN $1::TEXT IS NOT NULL THEN 'failed'
                    ELSE 'completed'
                END,
                result = $2,
                error = $1,
                waiting_on_stack_run_id = NULL,
                ended_at = $3,
                updated_at = $3
            WHERE id = $4 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(error)
        .bind(result.map(Json))
        .bind(Utc::now())
        .bind(task_run_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_stale_stack_runs(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<StackRunRecord>, EngineError> {
        let rows = sqlx::query_as::<_, StackRunRecord>(
            r#"
            SELECT id, parent_stack_run_id, parent_task_run_id, service_name, method_name,
                   args, status, result, error, continuation, resume_payload,
                   waiting_on_stack_run_id, attempts, created_at, updated_at
            FROM stack_runs
            WHERE status IN ('processing', 'suspended_waiting_child')
              AND updated_at < $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        )
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn list_stale_queued_task_runs(
        &self,
        older_than: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<TaskRunRecord>, EngineError> {
        let rows = sqlx::query_as::<_, TaskRunRecord>(
            r#"
            SELECT id, task_id, input, status, result, error, waiting_on_stack_run_id,
                   created_at, updated_at, suspended_at, resumed_at, ended_at
            FROM task_runs
            WHERE status = 'queued' AND updated_at < $1
            ORDER BY updated_at ASC
            LIMIT $2
            "#,
        )
        .bind(older_than)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn record_trigger_attempt(&self, stack_run_id: &str) -> Result<i32, EngineError> {
        let attempts = sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE stack_runs
            SET attempts = attempts + 1, updated_at = $1
            WHERE id = $2
            RETURNING attempts
            "#,
        )
        .bind(Utc::now())
        .bind(stack_run_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| EngineError::RunNotFound {
            run_id: stack_run_id.to_string(),
        })?;

        Ok(attempts)
    }

    async fn reset_for_retry(&self, stack_run_id: &str) -> Result<bool, EngineError> {
        let updated = sqlx::query(
            r#"
            UPDATE stack_runs
            SET status = 'pending', updated_at = $1
            WHERE id = $2 AND status = 'processing'
            "#,
        )
        .bind(Utc::now())
        .bind(stack_run_id)
        .execute(&self.pool)
        .await?;

        Ok(updated.rows_affected() > 0)
    }

    async fn count_live_children(&self, parent_stack_run_id: &str) -> Result<i64, EngineError> {
        let count = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COUNT(*)
            FROM stack_runs
            WHERE parent_stack_run_id = $1 AND status NOT IN ('completed', 'failed')
            "#,
        )
        .bind(parent_stack_run_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn list_stack_runs_for_task(
        &self,
        task_run_id: &str,
    ) -> Result<Vec<StackRunRecord>, EngineError> {
        let rows = sqlx::query_as::<_, StackRunRecord>(
            r#"
            SELECT id, parent_stack_run_id, parent_task_run_id, service_name, method_name,
                   args, status, result, error, continuation, resume_payload,
                   waiting_on_stack_run_id, attempts, created_at, updated_at
            FROM stack_runs
            WHERE parent_task_run_id = $1
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .bind(task_run_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn health_check(&self) -> Result<bool, EngineError> {
        let row: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&self.pool).await?;
        Ok(row.0 == 1)
    }
}
