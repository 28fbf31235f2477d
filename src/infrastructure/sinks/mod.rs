//! Output managers, one per sink kind.

pub mod database;
pub mod file;
pub mod redis;

pub use database::{Database, DatabaseOutputManager};
pub use file::FileOutputManager;
pub use redis::{RedisOutputManager, RedisWrite};
