use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use config::RateLimitConfig;
use domain::{
    ChannelId, DisplayName, ErrorCode, MessageKind, ServerEvent, Session, SessionId, TeamId,
    UserId,
};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::collaborators::membership::memory::MemoryMembershipAuthority;
use crate::collaborators::membership::ChannelRole;
use crate::collaborators::persistence::memory::MemoryMessagePersistence;
use crate::rate_limiter::{
    FixedWindowRateLimiter, RateAction, RateDecision, RateLimitError, RateLimiter,
};
use crate::registry::SessionRegistry;
use crate::router::FanoutRouter;
use crate::services::{MessageService, MessageServiceDependencies};

struct Harness {
    membership: Arc<MemoryMembershipAuthority>,
    persistence: Arc<MemoryMessagePersistence>,
    registry: Arc<SessionRegistry>,
    router: Arc<FanoutRouter>,
    service: MessageService,
}

fn limits() -> RateLimitConfig {
    RateLimitConfig {
        messages_per_window: 3,
        typing_per_window: 10,
        dms_per_window: 3,
        window_seconds: 60,
    }
}

fn harness_with_limiter(limiter: Arc<dyn RateLimiter>) -> Harness {
    let membership = Arc::new(MemoryMembershipAuthority::new());
    let persistence = Arc::new(MemoryMessagePersistence::new());
    let registry = Arc::new(SessionRegistry::new());
    let router = Arc::new(FanoutRouter::new(registry.clone()));
    let service = MessageService::new(MessageServiceDependencies {
        limiter,
        membership: membership.clone(),
        persistence: persistence.clone(),
        router: router.clone(),
        limits: limits(),
    });
    Harness {
        membership,
        persistence,
        registry,
        router,
        service,
    }
}

fn harness() -> Harness {
    harness_with_limiter(Arc::new(FixedWindowRateLimiter::new()))
}

async fn connect(
    harness: &Harness,
    user_id: UserId,
    channels: &[ChannelId],
) -> (SessionId, mpsc::UnboundedReceiver<ServerEvent>) {
    let mut session = Session::new(user_id, DisplayName::parse("tester").unwrap(), Utc::now());
    for channel_id in channels {
        session.join_channel(*channel_id);
    }
    let session_id = session.session_id;
    harness.registry.register(session).await;
    let (tx, rx) = mpsc::unbounded_channel();
    harness.router.register_sender(session_id, tx).await;
    (session_id, rx)
}

/// 始终报基础设施错误的限流器，用于验证 fail-open。
struct BrokenLimiter;

#[async_trait]
impl RateLimiter for BrokenLimiter {
    async fn check_and_consume(
        &self,
        _user_id: UserId,
        _action: RateAction,
        _limit: u32,
        _window: Duration,
    ) -> Result<RateDecision, RateLimitError> {
        Err(RateLimitError::Unavailable("redis down".to_string()))
    }
}

#[tokio::test]
async fn non_member_send_leaves_no_side_effects() {
    let harness = harness();
    let channel_id = ChannelId::from(Uuid::new_v4());
    let member = UserId::from(Uuid::new_v4());
    let outsider = UserId::from(Uuid::new_v4());
    harness
        .membership
        .add_channel_member(channel_id, member, ChannelRole::Member);
    harness.membership.add_user(outsider);
    let (_, mut member_rx) = connect(&harness, member, &[channel_id]).await;

    let err = harness
        .service
        .send_message(
            outsider,
            channel_id,
            "hi".to_string(),
            MessageKind::Text,
            serde_json::Value::Null,
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::AccessDenied);
    assert_eq!(harness.persistence.message_count().await, 0);
    assert!(member_rx.try_recv().is_err(), "no broadcast on denial");
}

#[tokio::test]
async fn channel_message_reaches_members_not_outsiders() {
    let harness = harness();
    let channel_id = ChannelId::from(Uuid::new_v4());
    let other_channel = ChannelId::from(Uuid::new_v4());
    let alice = UserId::from(Uuid::new_v4());
    let bob = UserId::from(Uuid::new_v4());
    let carol = UserId::from(Uuid::new_v4());
    harness
        .membership
        .add_channel_member(channel_id, alice, ChannelRole::Member);
    harness
        .membership
        .add_channel_member(channel_id, bob, ChannelRole::Member);

    let (_, mut alice_rx) = connect(&harness, alice, &[channel_id]).await;
    let (_, mut bob_rx) = connect(&harness, bob, &[channel_id]).await;
    let (_, mut carol_rx) = connect(&harness, carol, &[other_channel]).await;

    let record = harness
        .service
        .send_message(
            alice,
            channel_id,
            "hello channel".to_string(),
            MessageKind::Text,
            serde_json::Value::Null,
        )
        .await
        .unwrap();

    assert_eq!(record.channel_id, Some(channel_id));
    assert_eq!(harness.persistence.message_count().await, 1);
    for rx in [&mut alice_rx, &mut bob_rx] {
        match rx.try_recv() {
            Ok(ServerEvent::MessageNew { message }) => assert_eq!(message.id, record.id),
            other => panic!("expected message:new, got {:?}", other),
        }
    }
    assert!(carol_rx.try_recv().is_err(), "outsider must not receive");
}

#[tokio::test]
async fn channel_messages_arrive_in_persistence_order() {
    let harness = harness();
    let channel_id = ChannelId::from(Uuid::new_v4());
    let alice = UserId::from(Uuid::new_v4());
    let bob = UserId::from(Uuid::new_v4());
    harness
        .membership
        .add_channel_member(channel_id, alice, ChannelRole::Member);
    harness
        .membership
        .add_channel_member(channel_id, bob, ChannelRole::Member);

    let (_, mut alice_rx) = connect(&harness, alice, &[channel_id]).await;
    let (_, mut bob_rx) = connect(&harness, bob, &[channel_id]).await;

    // 持久化接受顺序由返回的记录顺序给出
    let mut accepted = Vec::new();
    for text in ["first", "second", "third"] {
        let record = harness
            .service
            .send_message(
                alice,
                channel_id,
                text.to_string(),
                MessageKind::Text,
                serde_json::Value::Null,
            )
            .await
            .unwrap();
        accepted.push(record.id);
    }

    for rx in [&mut alice_rx, &mut bob_rx] {
        for expected in &accepted {
            match rx.try_recv() {
                Ok(ServerEvent::MessageNew { message }) => assert_eq!(
                    message.id, *expected,
                    "delivery must follow persistence-acceptance order"
                ),
                other => panic!("expected message:new, got {:?}", other),
            }
        }
        assert!(rx.try_recv().is_err(), "no extra deliveries");
    }
}

#[tokio::test]
async fn rate_limit_rejects_excess_sends() {
    let harness = harness();
    let channel_id = ChannelId::from(Uuid::new_v4());
    let alice = UserId::from(Uuid::new_v4());
    harness
        .membership
        .add_channel_member(channel_id, alice, ChannelRole::Member);

    for _ in 0..3 {
        harness
            .service
            .send_message(
                alice,
                channel_id,
                "ok".to_string(),
                MessageKind::Text,
                serde_json::Value::Null,
            )
            .await
            .unwrap();
    }
    let err = harness
        .service
        .send_message(
            alice,
            channel_id,
            "one too many".to_string(),
            MessageKind::Text,
            serde_json::Value::Null,
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::RateLimitExceeded);
    // 被拒绝的请求不产生持久化
    assert_eq!(harness.persistence.message_count().await, 3);
}

#[tokio::test]
async fn broken_limiter_fails_open() {
    let harness = harness_with_limiter(Arc::new(BrokenLimiter));
    let channel_id = ChannelId::from(Uuid::new_v4());
    let alice = UserId::from(Uuid::new_v4());
    harness
        .membership
        .add_channel_member(channel_id, alice, ChannelRole::Member);

    let result = harness
        .service
        .send_message(
            alice,
            channel_id,
            "limiter is down".to_string(),
            MessageKind::Text,
            serde_json::Value::Null,
        )
        .await;

    assert!(result.is_ok(), "infrastructure failure must not block sends");
}

#[tokio::test]
async fn oversized_content_is_rejected() {
    let harness = harness();
    let channel_id = ChannelId::from(Uuid::new_v4());
    let alice = UserId::from(Uuid::new_v4());
    harness
        .membership
        .add_channel_member(channel_id, alice, ChannelRole::Member);

    let err = harness
        .service
        .send_message(
            alice,
            channel_id,
            "x".repeat(16_001),
            MessageKind::Text,
            serde_json::Value::Null,
        )
        .await
        .unwrap_err();

    assert_eq!(err.code(), ErrorCode::MessageError);
    assert_eq!(harness.persistence.message_count().await, 0);
}

#[tokio::test]
async fn only_author_or_moderator_may_edit() {
    let harness = harness();
    let channel_id = ChannelId::from(Uuid::new_v4());
    let author = UserId::from(Uuid::new_v4());
    let plain = UserId::from(Uuid::new_v4());
    let moderator = UserId::from(Uuid::new_v4());
    harness
        .membership
        .add_channel_member(channel_id, author, ChannelRole::Member);
    harness
        .membership
        .add_channel_member(channel_id, plain, ChannelRole::Member);
    harness
        .membership
        .add_channel_member(channel_id, moderator, ChannelRole::Moderator);
    let (_, mut author_rx) = connect(&harness, author, &[channel_id]).await;

    let record = harness
        .service
        .send_message(
            author,
            channel_id,
            "original".to_string(),
            MessageKind::Text,
            serde_json::Value::Null,
        )
        .await
        .unwrap();
    let _ = author_rx.try_recv();

    let err = harness
        .service
        .edit_message(plain, record.id, "hijacked".to_string())
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::AccessDenied);

    let edited = harness
        .service
        .edit_message(moderator, record.id, "moderated".to_string())
        .await
        .unwrap();
    assert_eq!(edited.content.as_str(), "moderated");
    assert!(edited.edited_at.is_some());
    match author_rx.try_recv() {
        Ok(ServerEvent::MessageEdited { message }) => assert_eq!(message.id, record.id),
        other => panic!("expected message:edit, got {:?}", other),
    }
}

#[tokio::test]
async fn delete_removes_record_and_broadcasts() {
    let harness = harness();
    let channel_id = ChannelId::from(Uuid::new_v4());
    let author = UserId::from(Uuid::new_v4());
    harness
        .membership
        .add_channel_member(channel_id, author, ChannelRole::Member);
    let (_, mut author_rx) = connect(&harness, author, &[channel_id]).await;

    let record = harness
        .service
        .send_message(
            author,
            channel_id,
            "to be removed".to_string(),
            MessageKind::Text,
            serde_json::Value::Null,
        )
        .await
        .unwrap();
    let _ = author_rx.try_recv();

    harness
        .service
        .delete_message(author, record.id)
        .await
        .unwrap();

    assert_eq!(harness.persistence.message_count().await, 0);
    match author_rx.try_recv() {
        Ok(ServerEvent::MessageDeleted { message_id, .. }) => assert_eq!(message_id, record.id),
        other => panic!("expected message:delete, got {:?}", other),
    }
}

#[tokio::test]
async fn reaction_is_persisted_and_broadcast() {
    let harness = harness();
    let channel_id = ChannelId::from(Uuid::new_v4());
    let author = UserId::from(Uuid::new_v4());
    let reactor = UserId::from(Uuid::new_v4());
    harness
        .membership
        .add_channel_member(channel_id, author, ChannelRole::Member);
    harness
        .membership
        .add_channel_member(channel_id, reactor, ChannelRole::Member);
    let (_, mut author_rx) = connect(&harness, author, &[channel_id]).await;

    let record = harness
        .service
        .send_message(
            author,
            channel_id,
            "react to me".to_string(),
            MessageKind::Text,
            serde_json::Value::Null,
        )
        .await
        .unwrap();
    let _ = author_rx.try_recv();

    harness
        .service
        .add_reaction(reactor, record.id, "👍".to_string())
        .await
        .unwrap();

    match author_rx.try_recv() {
        Ok(ServerEvent::MessageReaction { message_id, emoji, .. }) => {
            assert_eq!(message_id, record.id);
            assert_eq!(emoji, "👍");
        }
        other => panic!("expected message:reaction, got {:?}", other),
    }
}

#[tokio::test]
async fn dm_reaches_recipient_and_echoes_other_sender_sessions() {
    let harness = harness();
    let team_id = TeamId::from(Uuid::new_v4());
    let alice = UserId::from(Uuid::new_v4());
    let bob = UserId::from(Uuid::new_v4());
    harness.membership.add_team_member(team_id, alice);
    harness.membership.add_team_member(team_id, bob);

    let (origin, mut origin_rx) = connect(&harness, alice, &[]).await;
    let (_, mut alice_phone_rx) = connect(&harness, alice, &[]).await;
    let (_, mut bob_rx) = connect(&harness, bob, &[]).await;

    let record = harness
        .service
        .send_direct(
            alice,
            origin,
            bob,
            "psst".to_string(),
            serde_json::Value::Null,
        )
        .await
        .unwrap();

    assert!(record.is_direct());
    match bob_rx.try_recv() {
        Ok(ServerEvent::DmNew { message }) => assert_eq!(message.id, record.id),
        other => panic!("expected dm:new for recipient, got {:?}", other),
    }
    match alice_phone_rx.try_recv() {
        Ok(ServerEvent::DmNew { message }) => assert_eq!(message.id, record.id),
        other => panic!("expected dm:new echo, got {:?}", other),
    }
    assert!(origin_rx.try_recv().is_err(), "origin session must not echo");
}

#[tokio::test]
async fn dm_to_unknown_user_is_user_not_found() {
    let harness = harness();
    let team_id = TeamId::from(Uuid::new_v4());
    let alice = UserId::from(Uuid::new_v4());
    harness.membership.add_team_member(team_id, alice);
    let (origin, _origin_rx) = connect(&harness, alice, &[]).await;

    let err = harness
        .service
        .send_direct(
            alice,
            origin,
            UserId::from(Uuid::new_v4()),
            "anyone there".to_string(),
            serde_json::Value::Null,
        )
        .await
        .unwrap_err();

    assert_eq!(err.code_for_dm(), ErrorCode::UserNotFound);
    assert_eq!(harness.persistence.message_count().await, 0);
}

#[tokio::test]
async fn dm_requires_shared_team() {
    let harness = harness();
    let alice = UserId::from(Uuid::new_v4());
    let bob = UserId::from(Uuid::new_v4());
    harness
        .membership
        .add_team_member(TeamId::from(Uuid::new_v4()), alice);
    harness
        .membership
        .add_team_member(TeamId::from(Uuid::new_v4()), bob);
    let (origin, _origin_rx) = connect(&harness, alice, &[]).await;

    let err = harness
        .service
        .send_direct(
            alice,
            origin,
            bob,
            "stranger danger".to_string(),
            serde_json::Value::Null,
        )
        .await
        .unwrap_err();

    assert_eq!(err.code_for_dm(), ErrorCode::AccessDenied);
    assert_eq!(harness.persistence.message_count().await, 0);
}
