pub mod bootstrap;
pub mod cluster;
pub mod graph;
pub mod remote;
pub mod utils;
