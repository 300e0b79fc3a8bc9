pub mod detector;
pub mod poll;
pub mod types;
