pub mod runner;
pub mod task_graph;
