//! Bounded-concurrency async task manager: wraps an `Executor` so a caller
//! can submit a module call, get a task id back immediately, and poll for
//! its result instead of awaiting the call inline.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;

use crate::context::Context;
use crate::executor::Executor;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task '{0}' not found")]
    NotFound(String),
    #[error("task '{0}' already completed")]
    AlreadyCompleted(String),
    #[error("outstanding task limit of {0} reached")]
    LimitExceeded(usize),
}

impl TaskError {
    pub fn code(&self) -> &'static str {
        match self {
            TaskError::NotFound(_) => "TASK_NOT_FOUND",
            TaskError::AlreadyCompleted(_) => "TASK_ALREADY_COMPLETED",
            TaskError::LimitExceeded(_) => "TASK_LIMIT_EXCEEDED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Clone)]
pub struct TaskInfo {
    pub id: String,
    pub module_id: String,
    pub state: TaskState,
    pub created_at_ms: u64,
    pub started_at_ms: Option<u64>,
    pub completed_at_ms: Option<u64>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

struct TaskSlot {
    info: TaskInfo,
    cancel: Arc<tokio::sync::Notify>,
    cancelled: Arc<std::sync::atomic::AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Runs submitted module calls with a fixed concurrency cap; excess
/// submissions queue FIFO behind a semaphore permit. Also enforces a cap on
/// outstanding (not yet cleaned up) tasks, rejecting new submissions once
/// that limit is reached.
pub struct TaskManager {
    executor: Arc<Executor>,
    semaphore: Arc<Semaphore>,
    tasks: Arc<Mutex<HashMap<String, TaskSlot>>>,
    next_id: AtomicU64,
    max_outstanding: usize,
}

impl TaskManager {
    pub fn new(executor: Arc<Executor>, max_concurrency: usize, max_outstanding: usize) -> Self {
        Self {
            executor,
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            max_outstanding: max_outstanding.max(1),
        }
    }

    fn generate_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("task-{n}")
    }

    /// Submits a call to `module_id` for execution. Returns the task id
    /// immediately; the call runs once a concurrency slot frees up (or right
    /// away if one is available). Rejects with `TaskError::LimitExceeded` if
    /// the number of outstanding tasks is already at the configured cap.
    /// Cancelling a still-queued task releases it before it ever runs.
    pub async fn submit(
        &self,
        module_id: &str,
        inputs: Value,
        context: Option<Context>,
    ) -> Result<String, TaskError> {
        let mut tasks = self.tasks.lock().await;
        if tasks.len() >= self.max_outstanding {
            return Err(TaskError::LimitExceeded(self.max_outstanding));
        }

        let id = self.generate_id();
        let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let notify = Arc::new(tokio::sync::Notify::new());

        let info = TaskInfo {
            id: id.clone(),
            module_id: module_id.to_string(),
            state: TaskState::Pending,
            created_at_ms: now_ms(),
            started_at_ms: None,
            completed_at_ms: None,
            result: None,
            error: None,
        };

        let executor = self.executor.clone();
        let semaphore = self.semaphore.clone();
        let tasks_shared = self.tasks.clone();
        let cancelled_for_task = cancelled.clone();
        let notify_for_task = notify.clone();
        let id_for_task = id.clone();
        let module_id_owned = module_id.to_string();

        let handle = tokio::spawn(async move {
            let permit = tokio::select! {
                permit = semaphore.acquire_owned() => permit,
                _ = notify_for_task.notified() => return,
            };
            let Ok(_permit) = permit else { return };
            if cancelled_for_task.load(Ordering::SeqCst) {
                return;
            }

            {
                let mut tasks = tasks_shared.lock().await;
                if let Some(slot) = tasks.get_mut(&id_for_task) {
                    slot.info.state = TaskState::Running;
                    slot.info.started_at_ms = Some(now_ms());
                }
            }

            let outcome = executor.call(&module_id_owned, inputs, context.as_ref()).await;

            let mut tasks = tasks_shared.lock().await;
            if cancelled_for_task.load(Ordering::SeqCst) {
                // cancel() already finalized this slot as Cancelled.
                return;
            }
            if let Some(slot) = tasks.get_mut(&id_for_task) {
                match outcome {
                    Ok(value) => {
                        slot.info.state = TaskState::Completed;
                        slot.info.result = Some(value);
                    }
                    Err(err) => {
                        slot.info.state = TaskState::Failed;
                        slot.info.error = Some(err.to_string());
                    }
                }
                slot.info.completed_at_ms = Some(now_ms());
            }
        });

        tasks.insert(id.clone(), TaskSlot { info, cancel: notify, cancelled, handle: Some(handle) });
        Ok(id)
    }

    pub async fn status(&self, task_id: &str) -> Result<TaskInfo, TaskError> {
        let tasks = self.tasks.lock().await;
        tasks
            .get(task_id)
            .map(|slot| slot.info.clone())
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))
    }

    /// Cancels a task. Exactly-once slot release: a task still waiting for a
    /// permit is woken and exits without ever running; a running task's
    /// `JoinHandle` is aborted.
    pub async fn cancel(&self, task_id: &str) -> Result<(), TaskError> {
        let mut tasks = self.tasks.lock().await;
        let slot = tasks.get_mut(task_id).ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
        if matches!(slot.info.state, TaskState::Completed | TaskState::Failed | TaskState::Cancelled) {
            return Err(TaskError::AlreadyCompleted(task_id.to_string()));
        }
        slot.cancelled.store(true, Ordering::SeqCst);
        slot.cancel.notify_waiters();
        if let Some(handle) = &slot.handle {
            handle.abort();
        }
        slot.info.state = TaskState::Cancelled;
        slot.info.completed_at_ms = Some(now_ms());
        Ok(())
    }

    /// Drops finished task records older than `max_age_seconds`.
    pub async fn cleanup(&self, max_age_seconds: u64) -> usize {
        let cutoff = now_ms().saturating_sub(max_age_seconds * 1000);
        let mut tasks = self.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|_, slot| match slot.info.completed_at_ms {
            Some(finished) => finished >= cutoff,
            None => true,
        });
        before - tasks.len()
    }

    pub async fn active_count(&self) -> usize {
        let tasks = self.tasks.lock().await;
        tasks
            .values()
            .filter(|s| matches!(s.info.state, TaskState::Pending | TaskState::Running))
            .count()
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::{Acl, Effect};
    use crate::approval::AutoApprove;
    use crate::middleware::MiddlewareManager;
    use crate::module::{Module, ModuleError};
    use crate::registry::Registry;
    use crate::schema::BasicSchemaAdapter;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl Module for Echo {
        fn input_schema(&self) -> &Value {
            static S: std::sync::OnceLock<Value> = std::sync::OnceLock::new();
            S.get_or_init(|| serde_json::json!({"type":"object"}))
        }
        fn output_schema(&self) -> &Value {
            self.input_schema()
        }
        fn description(&self) -> &str {
            "echoes inputs"
        }
        async fn execute(&self, inputs: Value, _ctx: &Context) -> Result<Value, ModuleError> {
            Ok(inputs)
        }
    }

    struct Slow;

    #[async_trait]
    impl Module for Slow {
        fn input_schema(&self) -> &Value {
            static S: std::sync::OnceLock<Value> = std::sync::OnceLock::new();
            S.get_or_init(|| serde_json::json!({"type":"object"}))
        }
        fn output_schema(&self) -> &Value {
            self.input_schema()
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _inputs: Value, _ctx: &Context) -> Result<Value, ModuleError> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            Ok(serde_json::json!(null))
        }
    }

    async fn manager_with(max_concurrency: usize, max_outstanding: usize) -> TaskManager {
        let registry = Arc::new(Registry::new());
        registry.register("echo", Arc::new(Echo), None).await.unwrap();
        registry.register("slow", Arc::new(Slow), None).await.unwrap();
        let executor = Arc::new(Executor::new(
            registry,
            Arc::new(Acl::new(vec![], Effect::Allow)),
            Arc::new(MiddlewareManager::new(vec![])),
            Arc::new(AutoApprove),
            Arc::new(BasicSchemaAdapter),
            Default::default(),
        ));
        TaskManager::new(executor, max_concurrency, max_outstanding)
    }

    #[tokio::test]
    async fn submit_runs_through_the_executor_and_completes() {
        let manager = manager_with(2, 10).await;
        let id = manager.submit("echo", serde_json::json!({"hi": 1}), None).await.unwrap();

        for _ in 0..50 {
            let info = manager.status(&id).await.unwrap();
            if info.state == TaskState::Completed {
                assert_eq!(info.result, Some(serde_json::json!({"hi": 1})));
                assert!(info.started_at_ms.is_some());
                assert!(info.completed_at_ms.is_some());
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("task never completed");
    }

    #[tokio::test]
    async fn submit_records_module_errors_as_failed() {
        let manager = manager_with(2, 10).await;
        let id = manager.submit("missing", serde_json::json!({}), None).await.unwrap();

        for _ in 0..50 {
            let info = manager.status(&id).await.unwrap();
            if info.state == TaskState::Failed {
                assert!(info.error.is_some());
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("task never failed");
    }

    #[tokio::test]
    async fn submit_rejects_once_outstanding_limit_is_reached() {
        let manager = manager_with(1, 1).await;
        let _first = manager.submit("slow", serde_json::json!({}), None).await.unwrap();
        let err = manager.submit("slow", serde_json::json!({}), None).await.unwrap_err();
        assert!(matches!(err, TaskError::LimitExceeded(1)));
    }

    #[tokio::test]
    async fn cancel_while_queued_releases_without_running() {
        let manager = manager_with(1, 10).await;
        let _hold = manager.submit("slow", serde_json::json!({}), None).await.unwrap();
        let queued_id = manager.submit("echo", serde_json::json!({}), None).await.unwrap();

        manager.cancel(&queued_id).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        let info = manager.status(&queued_id).await.unwrap();
        assert_eq!(info.state, TaskState::Cancelled);
    }

    #[tokio::test]
    async fn cleanup_drops_old_finished_tasks() {
        let manager = manager_with(2, 10).await;
        let id = manager.submit("echo", serde_json::json!({}), None).await.unwrap();
        manager.cancel(&id).await.unwrap();
        let dropped = manager.cleanup(0).await;
        assert_eq!(dropped, 1);
        assert!(manager.status(&id).await.is_err());
    }
}
