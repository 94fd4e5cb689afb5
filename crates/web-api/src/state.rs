use std::sync::Arc;
use std::time::Duration;

use application::ConnectionDeps;
use config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub deps: Arc<ConnectionDeps>,
    /// Authenticating 状态允许等待 authenticate 事件的时长
    pub handshake_timeout: Duration,
    /// 认证后的连接空闲超时
    pub idle_timeout: Duration,
}

impl AppState {
    pub fn new(deps: Arc<ConnectionDeps>, config: &AppConfig) -> Self {
        Self {
            deps,
            handshake_timeout: Duration::from_secs(config.auth.handshake_timeout_seconds),
            idle_timeout: Duration::from_secs(config.realtime.idle_timeout_seconds),
        }
    }
}
