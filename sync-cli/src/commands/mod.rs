//! CLI command implementations.

pub mod forget;
pub mod init;
pub mod reset;
pub mod status;
