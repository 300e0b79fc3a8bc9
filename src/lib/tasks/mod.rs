pub mod build;
pub mod docker;
pub mod engine;
pub mod source;
pub mod types;
