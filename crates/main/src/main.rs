//! 主应用程序入口
//!
//! 装配应用层运行时组件与基础设施实现，启动 Axum 服务。
//! 配置了 REDIS_URL 时启用共享限流窗口和跨实例扇出背板，
//! 否则以单进程内存实现运行。

use std::sync::Arc;
use std::time::Duration;

use application::collaborators::auth::TokenVerifier;
use application::collaborators::membership::memory::MemoryMembershipAuthority;
use application::collaborators::persistence::memory::MemoryMessagePersistence;
use application::{
    ConnectionDeps, FanoutRouter, FixedWindowRateLimiter, MessageService,
    MessageServiceDependencies, PresenceTracker, RateLimiter, SessionRegistry, SystemClock,
    TypingIndicatorStore,
};
use config::AppConfig;
use domain::ServerEvent;
use infrastructure::{
    spawn_fanout_subscriber, JwtTokenVerifier, RedisFanoutBackbone, RedisRateLimiter,
};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::from_env_with_defaults();
    config.validate()?;

    let clock: Arc<dyn application::Clock> = Arc::new(SystemClock);
    let registry = Arc::new(SessionRegistry::new());
    let fanout = Arc::new(FanoutRouter::new(registry.clone()));
    let presence = Arc::new(PresenceTracker::new(clock.clone()));
    let typing = Arc::new(TypingIndicatorStore::new(Duration::from_secs(
        config.realtime.typing_ttl_seconds,
    )));

    // 限流器：多实例共享 Redis 窗口，单进程用内存窗口
    let limiter: Arc<dyn RateLimiter> = match &config.redis {
        Some(redis) => Arc::new(RedisRateLimiter::new(redis).await?),
        None => {
            let limiter = Arc::new(FixedWindowRateLimiter::new());
            spawn_window_cleanup(
                limiter.clone(),
                Duration::from_secs(config.rate_limit.window_seconds),
            );
            limiter
        }
    };

    // 协作方：认证走 JWT 验签；成员资格与消息持久化在单机部署下
    // 使用内存权威，生产部署替换为对外部服务的客户端实现
    let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtTokenVerifier::new(&config.auth));
    let membership = Arc::new(MemoryMembershipAuthority::new());
    let persistence = Arc::new(MemoryMessagePersistence::new());

    let messages = Arc::new(MessageService::new(MessageServiceDependencies {
        limiter,
        membership: membership.clone(),
        persistence,
        router: fanout.clone(),
        limits: config.rate_limit.clone(),
    }));

    // 跨实例扇出背板
    if let Some(redis) = &config.redis {
        let origin = Uuid::new_v4();
        let backbone = Arc::new(RedisFanoutBackbone::new(redis, origin).await?);
        fanout.attach_backbone(backbone);
        let _subscriber = spawn_fanout_subscriber(redis, origin, fanout.clone());
        tracing::info!(origin = %origin, "fanout backbone enabled");
    }

    spawn_typing_sweeper(
        typing.clone(),
        fanout.clone(),
        Duration::from_secs(config.realtime.typing_sweep_interval_seconds),
    );

    let deps = Arc::new(ConnectionDeps {
        verifier,
        membership,
        registry,
        presence,
        typing,
        router: fanout,
        messages,
        clock,
    });
    let state = AppState::new(deps, &config);

    let app = router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("实时消息服务启动在 http://{addr}");
    axum::serve(listener, app).await?;

    Ok(())
}

/// 丢失 stop 事件的输入标记靠 TTL 过期，由清扫任务补发 typing:stop。
fn spawn_typing_sweeper(
    typing: Arc<TypingIndicatorStore>,
    fanout: Arc<FanoutRouter>,
    interval: Duration,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            for state in typing.sweep_expired().await {
                fanout
                    .broadcast_to_channel(
                        state.channel_id,
                        ServerEvent::TypingStopped {
                            channel_id: state.channel_id,
                            user_id: state.user_id,
                        },
                    )
                    .await;
            }
        }
    });
}

fn spawn_window_cleanup(limiter: Arc<FixedWindowRateLimiter>, window: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(window);
        loop {
            ticker.tick().await;
            limiter.cleanup_expired_windows(window);
        }
    });
}
