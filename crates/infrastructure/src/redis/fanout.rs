//! Redis Pub/Sub 扇出背板
//!
//! 多实例部署时，本地产生的广播经单一频道镜像给其他实例，
//! 订阅端只做本地投递（不再镜像），信封里的 origin 标识用来
//! 丢弃本实例发布的事件，避免回环。

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use application::router::{BackboneError, FanoutBackbone, FanoutRouter, FanoutScope};
use config::RedisConfig;
use domain::ServerEvent;

use super::RedisError;

/// 背板线上信封。
#[derive(Debug, Serialize, Deserialize)]
pub struct FanoutEnvelope {
    /// 发布实例标识，订阅端据此丢弃自己的事件
    pub origin: Uuid,
    pub scope: FanoutScope,
    pub event: ServerEvent,
}

pub struct RedisFanoutBackbone {
    connection: ConnectionManager,
    channel: String,
    origin: Uuid,
}

impl RedisFanoutBackbone {
    pub async fn new(config: &RedisConfig, origin: Uuid) -> Result<Self, RedisError> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| RedisError::Connection(format!("failed to create client: {e}")))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| RedisError::Connection(format!("failed to connect: {e}")))?;
        info!(channel = %config.fanout_channel, origin = %origin, "fanout backbone connected");
        Ok(Self {
            connection,
            channel: config.fanout_channel.clone(),
            origin,
        })
    }
}

#[async_trait]
impl FanoutBackbone for RedisFanoutBackbone {
    async fn publish(&self, scope: FanoutScope, event: &ServerEvent) -> Result<(), BackboneError> {
        let envelope = FanoutEnvelope {
            origin: self.origin,
            scope,
            event: event.clone(),
        };
        let payload = serde_json::to_string(&envelope)
            .map_err(|e| BackboneError::Publish(format!("serialization failed: {e}")))?;

        let mut conn = self.connection.clone();
        let _: u32 = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| BackboneError::Publish(e.to_string()))?;
        Ok(())
    }
}

/// 启动背板订阅任务。连接断开时退避重连，收到的远端事件只做本地投递。
pub fn spawn_fanout_subscriber(
    config: &RedisConfig,
    origin: Uuid,
    router: Arc<FanoutRouter>,
) -> tokio::task::JoinHandle<()> {
    let url = config.url.clone();
    let channel = config.fanout_channel.clone();

    tokio::spawn(async move {
        let mut backoff = Duration::from_millis(500);
        loop {
            match subscribe_and_forward(&url, &channel, origin, &router).await {
                Ok(()) => {
                    info!("fanout subscriber stream ended, reconnecting");
                    backoff = Duration::from_millis(500);
                }
                Err(e) => {
                    error!(error = %e, "fanout subscriber failed, reconnecting");
                    backoff = (backoff * 2).min(Duration::from_secs(30));
                }
            }
            sleep(backoff).await;
        }
    })
}

async fn subscribe_and_forward(
    url: &str,
    channel: &str,
    origin: Uuid,
    router: &FanoutRouter,
) -> Result<(), RedisError> {
    let client = redis::Client::open(url)
        .map_err(|e| RedisError::Connection(format!("failed to create client: {e}")))?;
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| RedisError::Connection(format!("failed to open pubsub: {e}")))?;
    pubsub
        .subscribe(channel)
        .await
        .map_err(|e| RedisError::Connection(format!("subscribe failed: {e}")))?;
    info!(channel = %channel, "fanout subscriber listening");

    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "dropping unreadable fanout payload");
                continue;
            }
        };
        let envelope: FanoutEnvelope = match serde_json::from_str(&payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, "dropping malformed fanout envelope");
                continue;
            }
        };
        if envelope.origin == origin {
            continue;
        }
        debug!(origin = %envelope.origin, "delivering remote fanout event");
        router.deliver_local(envelope.scope, &envelope.event).await;
    }
    Ok(())
}
