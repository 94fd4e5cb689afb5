//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 实时入口与健康检查。
//! 业务语义全部委托给应用层的连接处理器。

mod routes;
mod state;
mod websocket;

pub use routes::router;
pub use state::AppState;
