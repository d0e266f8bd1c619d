//! Terminal host for a local coding engine.
//!
//! The binary resolves a [`config::HostConfig`], then either runs one store
//! subcommand ([`sessions::run_command`]) or the interactive chat loop
//! ([`interactive::run`]), which keeps one engine alive per workspace and
//! streams replies through the chat controller.

pub mod cli;
pub mod config;
pub mod interactive;
pub mod logging;
pub mod recent;
pub mod sessions;
