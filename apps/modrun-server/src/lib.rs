//! Modrun server wiring: configuration, logging, REST and gRPC assembly.
//! The binary in `main.rs` is a thin shell over these modules.

pub mod config;
pub mod grpc;
pub mod http;
pub mod logging;
