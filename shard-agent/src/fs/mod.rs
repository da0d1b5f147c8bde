//! Node-local file handling.

pub mod checksum;
pub mod walker;
