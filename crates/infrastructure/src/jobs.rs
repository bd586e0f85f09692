//! 进程内后台任务队列
//!
//! 每个任务在独立的 tokio 任务中执行：先等待可选的初始延迟，失败后按退避策略重试，
//! 用尽次数的任务保留在失败列表中以便排查。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use application::jobs::{
    DeleteFilePayload, JobOptions, JobRequest, OfflineNotificationPayload, QueueError, TaskQueue,
    DELETE_AVATAR_FILE, SEND_OFFLINE_NOTIFICATION,
};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid payload: {0}")]
    Payload(String),
    #[error("job failed: {0}")]
    Failed(String),
}

/// 某一类任务的执行者
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, payload: &JsonValue) -> Result<(), JobError>;
}

/// 重试用尽后保留的任务
#[derive(Debug, Clone, PartialEq)]
pub struct FailedJob {
    pub id: u64,
    pub job_type: &'static str,
    pub payload: JsonValue,
    pub attempts: u32,
    pub last_error: String,
}

#[derive(Clone, Default)]
pub struct InProcessTaskQueue {
    handlers: HashMap<&'static str, Arc<dyn JobHandler>>,
    next_id: Arc<AtomicU64>,
    failed: Arc<Mutex<Vec<FailedJob>>>,
}

impl InProcessTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, job_type: &'static str, handler: Arc<dyn JobHandler>) -> Self {
        self.handlers.insert(job_type, handler);
        self
    }

    /// 注册默认处理器：离线邮件与头像文件清理
    pub fn with_default_handlers(self) -> Self {
        self.with_handler(SEND_OFFLINE_NOTIFICATION, Arc::new(LoggingMailer))
            .with_handler(DELETE_AVATAR_FILE, Arc::new(LoggingFileCleaner))
    }

    pub async fn failed_jobs(&self) -> Vec<FailedJob> {
        self.failed.lock().await.clone()
    }
}

async fn run_with_retry(
    id: u64,
    job_type: &'static str,
    payload: JsonValue,
    options: JobOptions,
    handler: Arc<dyn JobHandler>,
    failed: Arc<Mutex<Vec<FailedJob>>>,
) {
    if !options.delay.is_zero() {
        sleep(options.delay).await;
    }

    let max_attempts = options.attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match handler.handle(&payload).await {
            Ok(()) => {
                info!(job_id = id, job_type, attempt, "后台任务完成");
                return;
            }
            Err(err) => {
                // 负载本身无效时重试没有意义
                let retryable = !matches!(err, JobError::Payload(_));
                if attempt >= max_attempts || !retryable {
                    warn!(job_id = id, job_type, attempt, error = %err, "后台任务最终失败");
                    failed.lock().await.push(FailedJob {
                        id,
                        job_type,
                        payload,
                        attempts: attempt,
                        last_error: err.to_string(),
                    });
                    return;
                }
                let delay = options.backoff.delay_at(attempt);
                warn!(job_id = id, job_type, attempt, retry_in_ms = delay.as_millis() as u64, error = %err, "后台任务失败，稍后重试");
                sleep(delay).await;
            }
        }
    }
}

#[async_trait]
impl TaskQueue for InProcessTaskQueue {
    async fn enqueue(&self, job: JobRequest) -> Result<u64, QueueError> {
        let handler = self
            .handlers
            .get(job.job_type)
            .cloned()
            .ok_or_else(|| QueueError::Enqueue(format!("no handler for {}", job.job_type)))?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        tokio::spawn(run_with_retry(
            id,
            job.job_type,
            job.payload,
            job.options,
            handler,
            self.failed.clone(),
        ));
        Ok(id)
    }
}

/// 邮件投递由外部服务负责，这里只记录投递意图
pub struct LoggingMailer;

#[async_trait]
impl JobHandler for LoggingMailer {
    async fn handle(&self, payload: &JsonValue) -> Result<(), JobError> {
        let mail: OfflineNotificationPayload = serde_json::from_value(payload.clone())
            .map_err(|err| JobError::Payload(err.to_string()))?;
        info!(
            to = %mail.email,
            sender = %mail.sender_username,
            room_id = %mail.room_id,
            message_id = %mail.message_id,
            "离线消息邮件已投递"
        );
        Ok(())
    }
}

/// 文件存储在外部，这里只记录待删除的地址
pub struct LoggingFileCleaner;

#[async_trait]
impl JobHandler for LoggingFileCleaner {
    async fn handle(&self, payload: &JsonValue) -> Result<(), JobError> {
        let file: DeleteFilePayload = serde_json::from_value(payload.clone())
            .map_err(|err| JobError::Payload(err.to_string()))?;
        info!(url = %file.url, "旧头像文件已删除");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use application::jobs::Backoff;
    use serde_json::json;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    struct Flaky {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl Flaky {
        fn failing(times: u32) -> Arc<Self> {
            Arc::new(Self {
                failures_left: AtomicU32::new(times),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl JobHandler for Flaky {
        async fn handle(&self, _payload: &JsonValue) -> Result<(), JobError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(JobError::Failed("smtp unavailable".into()));
            }
            Ok(())
        }
    }

    fn request(attempts: u32) -> JobRequest {
        JobRequest {
            job_type: SEND_OFFLINE_NOTIFICATION,
            payload: json!({}),
            options: JobOptions {
                attempts,
                backoff: Backoff::exponential(Duration::from_millis(2000)),
                delay: Duration::ZERO,
            },
        }
    }

    async fn settle() {
        // 让出执行权直到重试链走完；测试时钟会自动推进
        for _ in 0..20 {
            sleep(Duration::from_secs(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let handler = Flaky::failing(2);
        let queue =
            InProcessTaskQueue::new().with_handler(SEND_OFFLINE_NOTIFICATION, handler.clone());

        queue.enqueue(request(3)).await.unwrap();
        settle().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        assert!(queue.failed_jobs().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_job_is_retained() {
        let handler = Flaky::failing(10);
        let queue =
            InProcessTaskQueue::new().with_handler(SEND_OFFLINE_NOTIFICATION, handler.clone());

        let id = queue.enqueue(request(3)).await.unwrap();
        settle().await;

        assert_eq!(handler.calls.load(Ordering::SeqCst), 3);
        let failed = queue.failed_jobs().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, id);
        assert_eq!(failed[0].attempts, 3);
        assert!(failed[0].last_error.contains("smtp unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_payload_is_not_retried() {
        let queue = InProcessTaskQueue::new().with_default_handlers();

        queue.enqueue(request(3)).await.unwrap();
        settle().await;

        let failed = queue.failed_jobs().await;
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].attempts, 1);
    }

    #[tokio::test]
    async fn unknown_job_type_is_rejected() {
        let mut job = request(1);
        job.job_type = "resize-image";

        let err = InProcessTaskQueue::new().enqueue(job).await.unwrap_err();
        assert!(matches!(err, QueueError::Enqueue(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn delete_file_job_runs_after_delay() {
        let queue = InProcessTaskQueue::new().with_default_handlers();
        queue
            .enqueue(JobRequest {
                job_type: DELETE_AVATAR_FILE,
                payload: json!({ "url": "https://cdn.example.com/a.png" }),
                options: JobOptions {
                    attempts: 3,
                    backoff: Backoff::exponential(Duration::from_millis(1000)),
                    delay: Duration::from_millis(5000),
                },
            })
            .await
            .unwrap();
        settle().await;

        assert!(queue.failed_jobs().await.is_empty());
    }
}
