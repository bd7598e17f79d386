use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use driftsync_core::error::ErrorKind;
use driftsync_core::hlc::HlcTimestamp;
use driftsync_core::queue::{OperationStatus, QueueError, QueueRepository, QueuedOperation};

/// Offline queue persisted in SQLite.
pub struct SqliteQueueRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct QueuedOperationRow {
    id: String,
    kind: String,
    payload: String,
    queued_at: String,
    created_at: String,
    retry_count: i64,
    last_error: Option<String>,
    last_error_kind: Option<String>,
    status: String,
    entity_id: Option<String>,
    entity_version: Option<i64>,
}

impl QueuedOperationRow {
    fn into_operation(self) -> Result<QueuedOperation, QueueError> {
        let corrupt = |field: &str, e: String| {
            QueueError::Storage(format!("Corrupt {} for operation {}: {}", field, self.id, e))
        };

        let payload = serde_json::from_str(&self.payload).map_err(|e| corrupt("payload", e.to_string()))?;
        let queued_at = HlcTimestamp::parse(&self.queued_at)
            .map_err(|e| corrupt("queued_at", e.to_string()))?;
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| corrupt("created_at", e.to_string()))?;
        let status: OperationStatus = self.status.parse().map_err(|e| corrupt("status", e))?;
        let last_error_kind = self
            .last_error_kind
            .as_deref()
            .map(str::parse::<ErrorKind>)
            .transpose()
            .map_err(|e| corrupt("last_error_kind", e))?;

        Ok(QueuedOperation {
            id: self.id.clone(),
            kind: self.kind.clone(),
            payload,
            queued_at,
            created_at,
            retry_count: self.retry_count.max(0) as u32,
            last_error: self.last_error.clone(),
            last_error_kind,
            status,
            entity_id: self.entity_id.clone(),
            entity_version: self.entity_version,
        })
    }
}

fn storage_error(e: sqlx::Error) -> QueueError {
    QueueError::Storage(e.to_string())
}

impl SqliteQueueRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueRepository for SqliteQueueRepository {
    async fn append(&self, operation: &QueuedOperation) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&operation.payload)
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO queued_operations (id, kind, payload, queued_at, created_at, retry_count, last_error, last_error_kind, status, entity_id, entity_version)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&operation.id)
        .bind(&operation.kind)
        .bind(&payload)
        .bind(operation.queued_at.to_string())
        .bind(operation.created_at.to_rfc3339())
        .bind(operation.retry_count as i64)
        .bind(&operation.last_error)
        .bind(operation.last_error_kind.map(|k| k.as_str()))
        .bind(operation.status.as_str())
        .bind(&operation.entity_id)
        .bind(operation.entity_version)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }

    async fn list(&self) -> Result<Vec<QueuedOperation>, QueueError> {
        let rows: Vec<QueuedOperationRow> = sqlx::query_as("SELECT * FROM queued_operations")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        rows.into_iter().map(QueuedOperationRow::into_operation).collect()
    }

    async fn get(&self, id: &str) -> Result<Option<QueuedOperation>, QueueError> {
        let row: Option<QueuedOperationRow> =
            sqlx::query_as("SELECT * FROM queued_operations WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(storage_error)?;

        row.map(QueuedOperationRow::into_operation).transpose()
    }

    async fn update(&self, operation: &QueuedOperation) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&operation.payload)
            .map_err(|e| QueueError::Storage(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE queued_operations
            SET kind = ?, payload = ?, queued_at = ?, retry_count = ?, last_error = ?, last_error_kind = ?, status = ?, entity_id = ?, entity_version = ?
            WHERE id = ?
            "#,
        )
        .bind(&operation.kind)
        .bind(&payload)
        .bind(operation.queued_at.to_string())
        .bind(operation.retry_count as i64)
        .bind(&operation.last_error)
        .bind(operation.last_error_kind.map(|k| k.as_str()))
        .bind(operation.status.as_str())
        .bind(&operation.entity_id)
        .bind(operation.entity_version)
        .bind(&operation.id)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        if result.rows_affected() == 0 {
            return Err(QueueError::NotFound(operation.id.clone()));
        }
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, QueueError> {
        let result = sqlx::query("DELETE FROM queued_operations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn clear(&self) -> Result<usize, QueueError> {
        let result = sqlx::query("DELETE FROM queued_operations")
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use driftsync_core::hlc::{HybridLogicalClock, ManualClock, NodeId};
    use driftsync_core::queue::{NewOperation, OfflineQueue, QueueConfig};
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn setup() -> (SqliteQueueRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let pool = init_db(&db_path).await.unwrap();
        (SqliteQueueRepository::new(pool), temp_dir)
    }

    fn sample(id: &str) -> QueuedOperation {
        QueuedOperation {
            id: id.to_string(),
            kind: "entity.update".to_string(),
            payload: json!({"collection": "tasks", "data": {"title": "Ship it"}}),
            queued_at: HlcTimestamp::new(1_700_000_000_000, 2, NodeId::new("abc12345").unwrap()),
            created_at: Utc::now(),
            retry_count: 0,
            last_error: None,
            last_error_kind: None,
            status: OperationStatus::Pending,
            entity_id: Some("task-1".to_string()),
            entity_version: Some(4),
        }
    }

    #[tokio::test]
    async fn test_append_and_get() {
        let (repo, _temp) = setup().await;
        let op = sample("op-1");

        repo.append(&op).await.unwrap();
        let loaded = repo.get("op-1").await.unwrap().unwrap();

        assert_eq!(loaded.kind, "entity.update");
        assert_eq!(loaded.payload, op.payload);
        assert_eq!(loaded.queued_at, op.queued_at);
        assert_eq!(loaded.entity_id.as_deref(), Some("task-1"));
        assert_eq!(loaded.entity_version, Some(4));
        assert_eq!(loaded.status, OperationStatus::Pending);
    }

    #[tokio::test]
    async fn test_get_missing() {
        let (repo, _temp) = setup().await;
        assert!(repo.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_records_failure() {
        let (repo, _temp) = setup().await;
        let mut op = sample("op-1");
        repo.append(&op).await.unwrap();

        op.status = OperationStatus::Failed;
        op.retry_count = 3;
        op.last_error = Some("Session expired".to_string());
        op.last_error_kind = Some(ErrorKind::Auth);
        repo.update(&op).await.unwrap();

        let loaded = repo.get("op-1").await.unwrap().unwrap();
        assert_eq!(loaded.status, OperationStatus::Failed);
        assert_eq!(loaded.retry_count, 3);
        assert_eq!(loaded.last_error.as_deref(), Some("Session expired"));
        assert_eq!(loaded.last_error_kind, Some(ErrorKind::Auth));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let (repo, _temp) = setup().await;
        let result = repo.update(&sample("ghost")).await;
        assert!(matches!(result, Err(QueueError::NotFound(id)) if id == "ghost"));
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let (repo, _temp) = setup().await;
        repo.append(&sample("op-1")).await.unwrap();
        assert!(matches!(
            repo.append(&sample("op-1")).await,
            Err(QueueError::Storage(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let (repo, _temp) = setup().await;
        for id in ["a", "b", "c"] {
            repo.append(&sample(id)).await.unwrap();
        }

        assert!(repo.delete("a").await.unwrap());
        assert!(!repo.delete("a").await.unwrap());
        assert_eq!(repo.list().await.unwrap().len(), 2);

        assert_eq!(repo.clear().await.unwrap(), 2);
        assert!(repo.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queue_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("queue.db");
        let clock = Arc::new(HybridLogicalClock::with_physical_clock(
            NodeId::new("abc12345").unwrap(),
            Arc::new(ManualClock::new(1_700_000_000_000)),
        ));

        {
            let pool = init_db(&db_path).await.unwrap();
            let queue = OfflineQueue::new(
                Arc::new(SqliteQueueRepository::new(pool.clone())),
                clock.clone(),
                QueueConfig::default(),
            );
            for id in ["A", "B", "C"] {
                queue
                    .enqueue(NewOperation::new("entity.create", json!({})).with_id(id))
                    .await
                    .unwrap();
            }
            queue.mark_syncing("B").await.unwrap();
            pool.close().await;
        }

        let pool = init_db(&db_path).await.unwrap();
        let queue = OfflineQueue::new(
            Arc::new(SqliteQueueRepository::new(pool)),
            clock,
            QueueConfig::default(),
        );
        assert_eq!(queue.reset_stale_syncing().await.unwrap(), 1);

        let pending: Vec<String> = queue
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|op| op.id)
            .collect();
        assert_eq!(pending, vec!["A", "B", "C"]);
    }
}
