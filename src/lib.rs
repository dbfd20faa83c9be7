pub mod api;
pub mod broadcast;
pub mod config;
pub mod error;
pub mod ingest;
pub mod prediction;
pub mod recommendation;
pub mod seed;
pub mod state;
pub mod store;
