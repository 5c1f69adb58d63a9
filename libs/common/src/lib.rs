pub mod id;
pub mod stats;

pub use stats::Aggregate;
