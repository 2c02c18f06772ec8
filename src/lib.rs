pub mod api;
pub mod backend;
pub mod errors;
pub mod gateway;
pub mod orchestrator;
pub mod server;
pub mod settings;
pub mod store;
