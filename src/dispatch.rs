pub mod actions;
pub mod job;
pub mod queue;
pub mod store;
pub mod tx_queue;
