pub mod event;
pub mod node;
pub mod stats;
