//! 基础设施层实现。
//!
//! 提供 PostgreSQL 与内存仓储、密码哈希、令牌签发、实时连接注册表和后台任务队列，
//! 实现应用/领域层定义的接口。

pub mod gateway;
pub mod jobs;
pub mod memory;
pub mod migrations;
pub mod password;
pub mod repository;
pub mod token;

pub use gateway::{ConnectionHandle, ConnectionId, ConnectionRegistry, Departure};
pub use jobs::{FailedJob, InProcessTaskQueue, JobError, JobHandler};
pub use memory::InMemoryStore;
pub use migrations::MIGRATOR;
pub use password::BcryptPasswordHasher;
pub use repository::{
    create_pg_pool, PgMessageRepository, PgNotificationRepository, PgRefreshTokenRepository,
    PgRoomRepository, PgStorage, PgUserRepository,
};
pub use token::{Claims, JwtTokenService};
