//! Topolab CLI library.
//!
//! Command implementations behind the `topolab` binary.

pub mod chat_cmd;
pub mod cli;
pub mod output;
pub mod refresh_cmd;
pub mod sessions_cmd;
