//! Web API 层。
//!
//! 提供 Axum 路由与 WebSocket 网关，将 HTTP / 实时请求委托给应用层的用例服务。

mod auth;
pub mod bootstrap;
mod error;
mod routes;
mod state;
mod websocket;

pub use auth::AuthUser;
pub use bootstrap::{build_state, Adapters, Repositories};
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
