pub mod cli;
pub mod config;
pub mod grpc;
pub mod jsonrpc;
pub mod registry;
