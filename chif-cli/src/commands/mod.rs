//! Subcommand implementations.

pub mod decode;
pub mod download;
pub mod encode;
pub mod files;
pub mod status;
