//! `mailscan` — find and classify MIME attachments in mail files.
//!
//! This crate provides the core library for loading message files, walking
//! nested multipart bodies, decoding attachment payloads, and classifying
//! each message against a detection policy.

pub mod classify;
pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod parser;
pub mod scan;
