mod message_service;

pub use message_service::{MessageService, MessageServiceDependencies};

#[cfg(test)]
mod message_service_tests;
