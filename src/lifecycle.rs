pub mod context;
pub mod coordinator;
pub mod machine;
pub mod ops;
pub mod runtime;
