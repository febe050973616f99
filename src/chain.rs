pub mod client;
pub mod rpc;
pub mod types;
