pub mod cache;
pub mod checkpoint;
pub mod engine;
pub mod gates;
pub mod machine;
