use sqlx::migrate::Migrator;

/// 嵌入式数据库迁移，启动时与 PostgreSQL 集成测试共用
pub static MIGRATOR: Migrator = sqlx::migrate!("../../migrations");
