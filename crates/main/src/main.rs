//! 主应用程序入口
//!
//! 加载配置、准备存储后端，然后启动 Axum Web API 服务。

use std::sync::Arc;

use axum::http::HeaderValue;
use config::{AppConfig, StorageBackend};
use infrastructure::{
    create_pg_pool, BcryptPasswordHasher, InMemoryStore, InProcessTaskQueue, PgStorage, MIGRATOR,
};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::EnvFilter;
use web_api::{build_state, router, Adapters, Repositories};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    if config.uses_development_secret() {
        tracing::warn!("正在使用开发环境的 JWT 密钥，请在生产环境中设置 JWT_SECRET");
    }

    let repositories = match config.storage.backend {
        StorageBackend::Postgres => {
            tracing::info!(
                "连接数据库: {}",
                config.database.url.split('@').last().unwrap_or("unknown")
            );
            let pool = create_pg_pool(&config.database.url, config.database.max_connections).await?;
            MIGRATOR.run(&pool).await?;
            Repositories::postgres(&PgStorage::new(pool))
        }
        StorageBackend::Memory => {
            tracing::warn!("使用内存存储，进程退出后数据会丢失");
            Repositories::memory(Arc::new(InMemoryStore::new()))
        }
    };

    let adapters = Adapters {
        password_hasher: Arc::new(BcryptPasswordHasher::from_config(&config.security)),
        task_queue: Arc::new(InProcessTaskQueue::new().with_default_handlers()),
    };

    let state = build_state(&config, repositories, adapters);
    let app = router(state)
        .layer(cors_layer(&config.server.cors_origins))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http());

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address).await?;

    tracing::info!("聊天室服务器启动在 http://{}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|origin| origin == "*") {
        return layer.allow_origin(Any);
    }

    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "忽略无效的 CORS 来源");
                None
            }
        })
        .collect();
    layer.allow_origin(origins)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "监听退出信号失败");
        return;
    }
    tracing::info!("收到退出信号，正在关闭服务");
}
