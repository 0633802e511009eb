pub mod alerts;
pub mod compression;
pub mod error;
pub mod gateway;
pub mod media;
pub mod publisher;
pub mod watchdog;
