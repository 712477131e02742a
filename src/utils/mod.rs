pub mod command;
pub mod file;
pub mod ini;
pub mod manifest;
pub mod qc;
pub mod system;
