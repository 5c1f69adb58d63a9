pub mod connections;
pub mod events;
pub mod ingest;
pub mod registry;
pub mod server;
