pub mod config;
pub mod download;
pub mod follow;
pub mod watch;
