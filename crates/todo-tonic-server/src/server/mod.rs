//! Server internals: configuration, telemetry, persistence and the two
//! request surfaces (gRPC and the HTTP/JSON gateway).

pub mod config;
pub mod gateway;
pub mod service;
pub mod store;
pub mod telemetry;
