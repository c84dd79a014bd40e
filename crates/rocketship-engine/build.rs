// Pure-Rust protobuf pipeline, mirroring internal-protocol's build.rs:
// protox compiles .proto to file descriptors (no external protoc binary
// needed), tonic-build generates the server/client stubs from them.
fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/rocketship.proto");

    let file_descriptors = protox::compile(["proto/rocketship.proto"], ["proto"])?;
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_fds(file_descriptors)?;
    Ok(())
}
