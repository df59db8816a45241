pub mod common;
pub mod config;
pub mod consensus;
pub mod kv;
pub mod network;
pub mod state;
pub mod vm;
