pub mod coordinator;
pub mod events;
pub mod provider;
pub mod signature;
