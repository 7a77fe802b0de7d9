//! Conductor CLI: command implementations shared by the `conductor` binary
//! and its integration tests.

pub mod commands;
