pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod sink;
pub mod table;
pub mod transform;
