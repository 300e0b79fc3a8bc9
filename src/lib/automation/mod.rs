pub mod driver;
pub mod types;
pub mod webdriver;
