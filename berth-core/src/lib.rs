//! Berth Core
//!
//! Core types and abstractions for the Berth job scheduler.
//!
//! This crate contains:
//! - Domain types: queue entries, job records, container specs, schedules
//! - Trigger: cron trigger evaluation used by scheduled jobs
//! - DTOs: request and response bodies shared by the daemon and the CLI

pub mod domain;
pub mod dto;
pub mod trigger;
