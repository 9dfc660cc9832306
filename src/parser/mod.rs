//! Message parsing: file loading, header decoding, content types, multipart
//! walking, and transfer decoding.
pub mod content_type;
pub mod eml;
pub mod header;
pub mod multipart;
pub mod transfer;
