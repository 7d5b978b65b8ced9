#![doc = "gradescope-archiver-core: the archive synchronisation engine behind gradescope-archiver."]

//! Keeps a local and hosted mirror of a user's graded coursework.
//!
//! The engine never drives a browser or shells out on its own initiative:
//! everything external goes through the traits in [`contract`], so the CLI
//! crate supplies the real session and the tests supply mocks.
//!
//! # Usage
//! Build an [`synchronise::Archiver`] from a [`contract::Session`], a
//! [`contract::VcsHost`] and an [`config::ArchiveConfig`], then call one of its
//! batch or single-course operations.

pub mod config;
pub mod contract;
pub mod discovery;
pub mod download;
pub mod error;
pub mod extract;
pub mod repository;
pub mod sanitize;
pub mod state;
pub mod synchronise;

pub use config::ArchiveConfig;
pub use error::{ArchiveError, Result};
