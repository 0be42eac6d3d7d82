pub mod app;
pub mod aria2;
pub mod boost;
pub mod config;
pub mod config_io;
pub mod deals;
pub mod logging;
pub mod lotus;
pub mod rpc;
pub mod single_instance;
pub mod spade;
