pub mod config;
pub mod media;
pub mod proxy;
pub mod version;
