//! JSON-file task store: the whole queue lives in one atomically rewritten document.

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{DeskError, Result};
use crate::task::{Task, TaskId, TaskStatus, TaskStore};

#[derive(Debug, Default, Serialize, Deserialize)]
struct TaskFile {
    /// Next identity to hand out; only ever grows.
    next_id: TaskId,
    tasks: Vec<Task>,
}

/// File-based task store.
///
/// Layout: `<base>/tasks.json` holding `{ next_id, tasks: [...] }`.
pub struct JsonTaskStore {
    base: PathBuf,
    lock: Mutex<()>,
}

impl JsonTaskStore {
    pub fn new(base: PathBuf) -> Self {
        Self {
            base,
            lock: Mutex::new(()),
        }
    }

    fn file_path(&self) -> PathBuf {
        self.base.join("tasks.json")
    }

    async fn load(&self) -> Result<TaskFile> {
        let path = self.file_path();
        if !path.exists() {
            return Ok(TaskFile {
                next_id: 1,
                tasks: Vec::new(),
            });
        }
        let data = tokio::fs::read_to_string(&path).await?;
        serde_json::from_str(&data)
            .map_err(|e| DeskError::Store(format!("corrupt task file {}: {e}", path.display())))
    }

    async fn save(&self, file: &TaskFile) -> Result<()> {
        tokio::fs::create_dir_all(&self.base).await?;
        let data = serde_json::to_string_pretty(file)?;
        let path = self.file_path();
        // Atomic write: write to temp then rename
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data.as_bytes()).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Put tasks left in `processing` by an interrupted run back into the queue.
    ///
    /// Returns how many tasks were reset.
    pub async fn recover_interrupted(&self) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        let now = Utc::now();
        let mut count = 0;
        for task in file
            .tasks
            .iter_mut()
            .filter(|t| t.status == TaskStatus::Processing)
        {
            task.status = TaskStatus::Pending;
            task.updated_at = now;
            count += 1;
        }
        if count > 0 {
            self.save(&file).await?;
            info!(count, "Re-queued interrupted tasks");
        }
        Ok(count)
    }
}

#[async_trait]
impl TaskStore for JsonTaskStore {
    async fn enqueue(&self, content: &str) -> Result<TaskId> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;

        let id = file.next_id.max(1);
        file.next_id = id + 1;
        let now = Utc::now();
        file.tasks.push(Task {
            id,
            status: TaskStatus::Pending,
            content: content.to_string(),
            result: None,
            created_at: now,
            updated_at: now,
        });
        self.save(&file).await?;

        let preview: String = content.chars().take(50).collect();
        debug!(task_id = id, content = %preview, "Enqueued task");
        Ok(id)
    }

    async fn next_pending(&self) -> Result<Option<Task>> {
        let _guard = self.lock.lock().await;
        let file = self.load().await?;
        Ok(file
            .tasks
            .into_iter()
            .filter(|t| t.status == TaskStatus::Pending)
            .min_by_key(|t| (t.created_at, t.id)))
    }

    async fn set_status(
        &self,
        id: TaskId,
        status: TaskStatus,
        result: Option<String>,
    ) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;

        let Some(task) = file.tasks.iter_mut().find(|t| t.id == id) else {
            warn!(task_id = id, %status, "Task not found for status update");
            return Ok(0);
        };
        task.status = status;
        task.updated_at = Utc::now();
        if result.is_some() {
            task.result = result;
        }
        self.save(&file).await?;

        debug!(task_id = id, %status, "Updated task status");
        Ok(1)
    }

    async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let _guard = self.lock.lock().await;
        let mut tasks = self.load().await?.tasks;
        match status {
            Some(status) => {
                tasks.retain(|t| t.status == status);
                tasks.sort_by_key(|t| (t.updated_at, t.id));
            }
            None => tasks.sort_by_key(|t| (t.created_at, t.id)),
        }
        Ok(tasks)
    }

    async fn remove(&self, id: TaskId) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        let before = file.tasks.len();
        file.tasks.retain(|t| t.id != id);
        if file.tasks.len() < before {
            self.save(&file).await?;
            debug!(task_id = id, "Removed task");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, JsonTaskStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonTaskStore::new(dir.path().to_path_buf());
        (dir, store)
    }

    #[tokio::test]
    async fn test_enqueue_assigns_increasing_ids() {
        let (_dir, store) = store();
        let a = store.enqueue("first").await.unwrap();
        let b = store.enqueue("second").await.unwrap();
        assert_eq!(a, 1);
        assert_eq!(b, 2);

        let task = store.next_pending().await.unwrap().unwrap();
        assert_eq!(task.id, a);
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.created_at, task.updated_at);
        assert!(task.result.is_none());
    }

    #[tokio::test]
    async fn test_next_pending_drains_in_creation_order() {
        let (_dir, store) = store();
        let t1 = store.enqueue("t1").await.unwrap();
        let t2 = store.enqueue("t2").await.unwrap();
        let t3 = store.enqueue("t3").await.unwrap();

        for expected in [t1, t2, t3] {
            let next = store.next_pending().await.unwrap().unwrap();
            assert_eq!(next.id, expected);
            store
                .set_status(next.id, TaskStatus::Completed, Some("ok".into()))
                .await
                .unwrap();
        }
        assert!(store.next_pending().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_set_status_keeps_created_at_and_result() {
        let (_dir, store) = store();
        let id = store.enqueue("work").await.unwrap();
        let created = store.next_pending().await.unwrap().unwrap().created_at;

        assert_eq!(
            store
                .set_status(id, TaskStatus::Processing, None)
                .await
                .unwrap(),
            1
        );
        store
            .set_status(id, TaskStatus::Failed, Some("boom".into()))
            .await
            .unwrap();
        // A later update without a result leaves the stored result alone.
        store.set_status(id, TaskStatus::Failed, None).await.unwrap();

        let task = store.list(None).await.unwrap().remove(0);
        assert_eq!(task.created_at, created);
        assert!(task.updated_at >= created);
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.result.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_set_status_unknown_task_returns_zero() {
        let (_dir, store) = store();
        let updated = store
            .set_status(42, TaskStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(updated, 0);
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_remove() {
        let (_dir, store) = store();
        let a = store.enqueue("a").await.unwrap();
        let b = store.enqueue("b").await.unwrap();
        store.remove(b).await.unwrap();
        store.remove(a).await.unwrap();
        let c = store.enqueue("c").await.unwrap();
        assert_eq!(c, 3);
        assert_eq!(store.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_filtered_by_status() {
        let (_dir, store) = store();
        let a = store.enqueue("a").await.unwrap();
        let _b = store.enqueue("b").await.unwrap();
        store
            .set_status(a, TaskStatus::Completed, Some("done".into()))
            .await
            .unwrap();

        let completed = store.list(Some(TaskStatus::Completed)).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, a);

        let pending = store.list(Some(TaskStatus::Pending)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(store.list(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let id = JsonTaskStore::new(dir.path().to_path_buf())
            .enqueue("survive restart")
            .await
            .unwrap();

        let reopened = JsonTaskStore::new(dir.path().to_path_buf());
        let task = reopened.next_pending().await.unwrap().unwrap();
        assert_eq!(task.id, id);
        assert_eq!(task.content, "survive restart");
    }

    #[tokio::test]
    async fn test_recover_interrupted_only_touches_processing() {
        let (_dir, store) = store();
        let a = store.enqueue("a").await.unwrap();
        let b = store.enqueue("b").await.unwrap();
        store.set_status(a, TaskStatus::Processing, None).await.unwrap();
        store
            .set_status(b, TaskStatus::Completed, Some("x".into()))
            .await
            .unwrap();

        assert_eq!(store.recover_interrupted().await.unwrap(), 1);
        let next = store.next_pending().await.unwrap().unwrap();
        assert_eq!(next.id, a);
        assert_eq!(
            store.list(Some(TaskStatus::Completed)).await.unwrap()[0].id,
            b
        );
        assert_eq!(store.recover_interrupted().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_store_error() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("tasks.json"), "not json").unwrap();
        let err = store.next_pending().await.unwrap_err();
        assert!(matches!(err, DeskError::Store(_)));
    }
}
