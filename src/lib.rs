pub mod codec;
pub mod command;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod frame;
pub mod server;

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Result<T> = std::result::Result<T, Error>;
