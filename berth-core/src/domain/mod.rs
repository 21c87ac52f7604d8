//! Core domain types
//!
//! This module contains the domain structures shared between the daemon
//! (which queues, runs and persists jobs) and the CLI (which displays them).

pub mod job;
pub mod schedule;
pub mod spec;
