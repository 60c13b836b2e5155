/// Tests for the task manager
#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::gate::testing::FlakyStore;
    use crate::gate::StoreGate;
    use crate::manager::testing::temp_manager;
    use crate::repositories::Store;
    use assert_matches::assert_matches;
    use serde_json::json;
    use std::sync::Arc;

    fn neft_request() -> TaskRequest {
        TaskRequest::new("U1", "MB", "TRANSFER_NEFT").data("amount", json!(100))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let manager = TaskManager::in_memory();
        let task = manager.create_task(neft_request()).await.unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.expires_at.is_none());
        assert_eq!(manager.get_task(&task.task_id).await.unwrap(), task);
        assert_eq!(manager.count_by_status(TaskStatus::Pending), 1);
    }

    #[tokio::test]
    async fn test_create_validates_request() {
        let manager = TaskManager::in_memory();
        assert_matches!(
            manager.create_task(TaskRequest::new("U1", "", "X")).await,
            Err(Error::Validation { .. })
        );
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_update_is_visible_immediately() {
        let manager = TaskManager::in_memory();
        let task = manager.create_task(neft_request()).await.unwrap();

        manager
            .update_task(&task.task_id, TaskUpdate::status(TaskStatus::Processing))
            .await
            .unwrap();
        assert_eq!(
            manager.get_task(&task.task_id).await.unwrap().status,
            TaskStatus::Processing
        );

        let done = manager
            .update_task(
                &task.task_id,
                TaskUpdate::status(TaskStatus::Completed).with_result(json!({"status": "APPROVED"})),
            )
            .await
            .unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert_eq!(manager.get_task(&task.task_id).await.unwrap(), done);
    }

    #[tokio::test]
    async fn test_terminal_state_is_final() {
        let manager = TaskManager::in_memory();
        let task = manager.create_task(neft_request()).await.unwrap();
        manager
            .update_task(&task.task_id, TaskUpdate::rejected("no agent available"))
            .await
            .unwrap();

        assert_matches!(
            manager
                .update_task(&task.task_id, TaskUpdate::status(TaskStatus::Processing))
                .await,
            Err(Error::StateTransition { .. })
        );
        assert_eq!(
            manager.get_task(&task.task_id).await.unwrap().status,
            TaskStatus::Rejected
        );
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let manager = TaskManager::in_memory();
        assert_matches!(manager.get_task("task_missing").await, Err(Error::NotFound { .. }));
        assert_matches!(
            manager.update_task("task_missing", TaskUpdate::default()).await,
            Err(Error::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn test_retention_expires_tasks() {
        let manager = TaskManager::in_memory().with_retention(Duration::milliseconds(20));
        let task = manager.create_task(neft_request()).await.unwrap();
        assert!(task.expires_at.is_some());
        assert!(manager.get_task(&task.task_id).await.is_ok());

        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        assert_matches!(manager.get_task(&task.task_id).await, Err(Error::NotFound { .. }));
        assert_matches!(
            manager
                .update_task(&task.task_id, TaskUpdate::status(TaskStatus::Processing))
                .await,
            Err(Error::NotFound { .. })
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_terminal_writers_yield_one_winner() {
        let manager = Arc::new(TaskManager::in_memory());
        let task = manager.create_task(neft_request()).await.unwrap();
        manager
            .update_task(&task.task_id, TaskUpdate::status(TaskStatus::Processing))
            .await
            .unwrap();

        let writers = (0..16).map(|i| {
            let manager = manager.clone();
            let task_id = task.task_id.clone();
            tokio::spawn(async move {
                let update = if i % 2 == 0 {
                    TaskUpdate::status(TaskStatus::Completed).with_result(json!({"writer": i}))
                } else {
                    TaskUpdate::failed(format!("writer {i}"))
                };
                manager.update_task(&task_id, update).await.is_ok()
            })
        });
        let winners = futures::future::join_all(writers)
            .await
            .into_iter()
            .filter(|r| *r.as_ref().unwrap())
            .count();
        assert_eq!(winners, 1);

        let final_task = manager.get_task(&task.task_id).await.unwrap();
        assert_eq!(final_task.revision, 2);
        match final_task.status {
            TaskStatus::Completed => {
                assert!(final_task.error.is_none());
                assert!(final_task.result.is_some());
            }
            TaskStatus::Failed => {
                assert!(final_task.result.is_none());
                assert!(final_task.error.is_some());
            }
            other => panic!("unexpected status {other}"),
        }
    }

    #[tokio::test]
    async fn test_tasks_survive_restart() {
        let (storage, _temp) = temp_manager().await;

        let first = TaskManager::new(Some(storage.tasks()));
        let task = first.create_task(neft_request()).await.unwrap();
        first
            .update_task(&task.task_id, TaskUpdate::status(TaskStatus::Processing))
            .await
            .unwrap();

        let restarted = TaskManager::new(Some(storage.tasks()));
        let restored = restarted.get_task(&task.task_id).await.unwrap();
        assert_eq!(restored.status, TaskStatus::Processing);

        let done = restarted
            .update_task(&task.task_id, TaskUpdate::failed("agent unreachable"))
            .await
            .unwrap();
        assert_eq!(done.revision, 2);
    }

    #[tokio::test]
    async fn test_store_outage_keeps_tasks_in_memory() {
        let backend = Arc::new(FlakyStore::<Task>::new());
        let gate = Arc::new(StoreGate::new(std::time::Duration::from_secs(3600)));
        backend.set_down(true);
        let manager = TaskManager::new(Some(GatedStore::new(
            backend.clone() as Arc<dyn Store<Task>>,
            gate.clone(),
        )));

        let task = manager.create_task(neft_request()).await.unwrap();
        manager
            .update_task(&task.task_id, TaskUpdate::status(TaskStatus::Processing))
            .await
            .unwrap();

        assert!(!gate.is_available());
        assert!(backend.stored(&task.task_id).is_none());
        assert_eq!(
            manager.get_task(&task.task_id).await.unwrap().status,
            TaskStatus::Processing
        );
    }
}
