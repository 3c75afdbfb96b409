pub mod context;
pub mod definition;
pub mod engine;
pub mod error;
pub mod memory;
pub mod resource;
pub mod status;
pub mod synchronization;
