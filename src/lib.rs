//! # HexoTeams API Library
//!
//! Core of the HexoTeams backend: the HTTP API for organizations, projects,
//! tasks, files and inboxes, plus the background worker that delivers email
//! and inbox notifications.

pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod mail;
pub mod models;
pub mod notifications;
pub mod queue;
pub mod realtime;
pub mod repositories;
pub mod server;
pub mod storage;
pub mod telemetry;
pub mod utils;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

pub use migration;
