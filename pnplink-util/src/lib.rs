pub mod dirs;
pub mod fs;
pub mod json;
pub mod store;
pub mod types;
