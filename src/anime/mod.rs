pub mod api_types;
pub mod client;
pub mod repository;
pub mod types;
