pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod providers;
pub mod storage;
pub mod sync;

pub use error::{Result, SyncError};
