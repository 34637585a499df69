pub mod candidate;
pub mod ids;
