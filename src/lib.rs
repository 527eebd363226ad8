pub mod candidate;
pub mod client;
pub mod config;
mod connection;
pub mod error;
mod event;
pub mod job;
pub mod monitor;
pub mod process;
mod protocol;
mod shutdown;
pub mod testutil;
mod transport;
pub mod worker;
