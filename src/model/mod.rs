//! Data models for messages and their attachments.
pub mod attachment;
pub mod message;
