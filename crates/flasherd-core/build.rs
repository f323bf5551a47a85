/// Builds the gRPC client and server code for `proto/flasherd.proto` using
/// `tonic-prost-build`.
///
/// Payload fields (staged binary chunks and process output) are generated as
/// `Bytes` rather than `Vec<u8>` so frames can be handed between the stager,
/// the process runner and the transport without copying.
///
/// A file descriptor set is written next to the generated code so the server
/// can expose gRPC reflection.
///
/// # Panics
///
/// Panics if code generation fails.
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("flasherd_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    config
        .bytes([
            ".flasherd.BinaryChunk.data",
            ".flasherd.RunCommandResponse.stdout",
            ".flasherd.RunCommandResponse.stderr",
        ])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/flasherd.proto"], &["proto"])
        .unwrap();
}
