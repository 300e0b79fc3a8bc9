pub mod conversion;
pub mod deployer;
pub mod disk;
pub mod scope;
pub mod state;
pub mod types;
pub mod validation;
