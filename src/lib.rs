//! Bulk import of DroneDB datasets into local processing tasks.

pub mod config;
pub mod db;
pub mod import;
pub mod task;
