pub mod project;
pub mod workflow;
