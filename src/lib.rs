pub mod api;
pub mod args;
pub mod assemble;
pub mod codec;
pub mod config;
pub mod display;
pub mod errors;
pub mod facts;
pub mod filter;
pub mod model;
pub mod policy;
pub mod polling;
pub mod resolve;
pub mod unmanaged;
