pub mod attacher;
pub mod command;
pub mod connection;
pub mod executor;
