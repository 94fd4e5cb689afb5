//! 外部协作方的接口定义
//!
//! 身份验证、成员资格、消息持久化都不属于本核心，
//! 这里只定义调用契约和用于测试/单机部署的内存实现。

pub mod auth;
pub mod membership;
pub mod persistence;
