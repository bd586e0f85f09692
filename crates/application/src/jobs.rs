//! 后台任务端口
//!
//! 核心只负责入队；执行、重试与失败保留由 infrastructure 中的任务队列完成。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 离线用户的新消息邮件
pub const SEND_OFFLINE_NOTIFICATION: &str = "send-offline-notification";
/// 延迟删除远端头像文件
pub const DELETE_AVATAR_FILE: &str = "delete-file";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Backoff {
    Fixed { delay: Duration },
    Exponential { base: Duration },
}

impl Backoff {
    pub fn exponential(base: Duration) -> Self {
        Backoff::Exponential { base }
    }

    pub fn fixed(delay: Duration) -> Self {
        Backoff::Fixed { delay }
    }

    /// 第 `attempt` 次失败后的等待时间（从 1 开始计数）
    pub fn delay_at(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Fixed { delay } => *delay,
            Backoff::Exponential { base } => {
                let exp = std::cmp::min(attempt.saturating_sub(1), 20);
                let factor = 1u32 << exp;
                base.saturating_mul(factor)
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobOptions {
    /// 最多执行次数，包括第一次
    pub attempts: u32,
    pub backoff: Backoff,
    /// 首次执行前的延迟
    pub delay: Duration,
}

impl JobOptions {
    pub fn offline_email(config: &config::JobsConfig) -> Self {
        Self {
            attempts: config.email_attempts,
            backoff: Backoff::exponential(Duration::from_millis(config.email_backoff_ms)),
            delay: Duration::ZERO,
        }
    }

    pub fn avatar_cleanup(config: &config::JobsConfig) -> Self {
        Self {
            attempts: config.avatar_cleanup_attempts,
            backoff: Backoff::exponential(Duration::from_millis(config.avatar_cleanup_backoff_ms)),
            delay: Duration::from_millis(config.avatar_cleanup_delay_ms),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct JobRequest {
    pub job_type: &'static str,
    pub payload: serde_json::Value,
    pub options: JobOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineNotificationPayload {
    pub email: String,
    pub username: String,
    pub sender_username: String,
    pub room_id: String,
    pub message_id: String,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteFilePayload {
    pub url: String,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to enqueue job: {0}")]
    Enqueue(String),
    #[error("invalid job payload: {0}")]
    Payload(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// 入队并返回任务编号
    async fn enqueue(&self, job: JobRequest) -> Result<u64, QueueError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles() {
        let backoff = Backoff::exponential(Duration::from_millis(2000));
        assert_eq!(backoff.delay_at(1), Duration::from_millis(2000));
        assert_eq!(backoff.delay_at(2), Duration::from_millis(4000));
        assert_eq!(backoff.delay_at(3), Duration::from_millis(8000));
    }

    #[test]
    fn policies_follow_configuration() {
        let config = config::JobsConfig {
            email_attempts: 3,
            email_backoff_ms: 2000,
            avatar_cleanup_attempts: 3,
            avatar_cleanup_backoff_ms: 1000,
            avatar_cleanup_delay_ms: 5000,
        };
        let email = JobOptions::offline_email(&config);
        assert_eq!(email.attempts, 3);
        assert_eq!(email.delay, Duration::ZERO);

        let cleanup = JobOptions::avatar_cleanup(&config);
        assert_eq!(cleanup.delay, Duration::from_millis(5000));
        assert_eq!(cleanup.backoff.delay_at(1), Duration::from_millis(1000));
    }
}
