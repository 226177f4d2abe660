//! Storage plumbing shared by every engine subsystem: the store handle, its
//! SQLite pool and schema, the store clock, config and errors.

pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod pool;
pub mod schemas;
pub mod store;
pub mod time;
