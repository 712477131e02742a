pub mod defs;
pub mod workflow;
