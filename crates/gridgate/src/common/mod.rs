pub mod error;
pub mod rpc;
pub mod setup;
pub mod time;
pub mod wrapped;
