pub mod config;
pub mod database;
pub mod logging;
pub mod models;
pub mod store;

pub use database::MySqlTaskStore;
pub use store::{MemoryTaskStore, TaskStore};
