//! Compiles `proto/todo.proto` into Rust with `tonic-prost-build`.
//!
//! Besides the message types and the `ToDoService` client/server bindings,
//! the build writes an encoded `FileDescriptorSet` to
//! `$OUT_DIR/todo_descriptor.bin`. The server registers it with
//! `tonic-reflection` so tools like `grpcurl` can discover the service.
//!
//! `google.protobuf.Timestamp` is not compiled locally; prost maps it onto
//! `prost_types::Timestamp`.
use std::env;
use std::path::PathBuf;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let descriptor_path = out_dir.join("todo_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    println!("cargo:rerun-if-changed=proto/todo.proto");
    tonic_prost_build::configure().compile_with_config(
        config,
        &["proto/todo.proto"],
        &["proto"],
    )?;
    Ok(())
}
