//! 实时消息核心领域模型
//!
//! 包含会话、在线状态、输入指示、消息记录等核心实体，
//! 以及传输无关的客户端/服务端协议事件定义。

pub mod errors;
pub mod events;
pub mod message;
pub mod presence;
pub mod session;
pub mod typing;
pub mod value_objects;

// 重新导出常用类型
pub use errors::*;
pub use events::*;
pub use message::*;
pub use presence::*;
pub use session::*;
pub use typing::*;
pub use value_objects::*;
