//! Data Transfer Objects for the HTTP surface
//!
//! Request and response bodies shared by the daemon and the CLI. Domain
//! types are reused directly where their JSON shape is already what the
//! client sees.

pub mod job;
pub mod schedule;
pub mod worker;
