//! The scheduler control loop and its supporting machinery.
//!
//! [`TaskManager`] is the entry point: it owns the live job and
//! workflow tables and advances them one [`TaskManager::tick`] at a
//! time under a [`SchedulerLease`]. The dispatcher and aggregator
//! halves of the loop live in their own modules but all operate through
//! the manager's `&mut self`.

pub mod aggregator;
pub mod config;
pub mod dispatcher;
pub mod lease;
pub mod manager;

pub use config::SchedulerConfig;
pub use lease::{LeaseGuard, SchedulerLease};
pub use manager::{SchedulerError, TaskManager, TickReport};
