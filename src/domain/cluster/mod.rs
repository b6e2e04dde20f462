pub mod infrastructure;
pub mod node;
pub mod request;
