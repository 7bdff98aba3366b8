#![doc = include_str!("../README.md")]

mod common;
pub use common::*;
// Public re-export so downstream crates can build `Timestamp`s without a
// direct `prost-types` dependency.
pub use prost_types;

/// Generated protobuf bindings for the `v1` package.
pub mod proto {
    tonic::include_proto!("v1");

    /// Encoded `FileDescriptorSet` for `todo.proto`, used by server reflection.
    pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("todo_descriptor");
}
