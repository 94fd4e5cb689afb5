//! 应用层：实时消息核心的用例与运行时组件
//!
//! 这一层持有全部进程内运行状态（会话注册表、在线状态、输入指示、限流窗口），
//! 通过 `collaborators` 下的 trait 与外部权威服务（认证、成员资格、消息持久化）
//! 协作。传输层只负责把字节翻译成 `ClientEvent` 交给 `ConnectionHandler`。

pub mod clock;
pub mod collaborators;
pub mod connection;
pub mod error;
pub mod presence;
pub mod rate_limiter;
pub mod registry;
pub mod router;
pub mod services;
pub mod typing;

pub use clock::{Clock, SystemClock};
pub use connection::{ConnectionDeps, ConnectionHandler, EventOutcome};
pub use error::ApplicationError;
pub use presence::{PresenceChange, PresenceTracker};
pub use rate_limiter::{
    FixedWindowRateLimiter, RateAction, RateDecision, RateLimitError, RateLimiter,
};
pub use registry::SessionRegistry;
pub use router::{BackboneError, FanoutBackbone, FanoutRouter, FanoutScope};
pub use services::{MessageService, MessageServiceDependencies};
pub use typing::TypingIndicatorStore;
