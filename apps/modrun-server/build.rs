fn main() -> Result<(), Box<dyn std::error::Error>> {
    // protox compiles the proto sources in-process, no system protoc needed.
    let file_descriptors = protox::compile(["proto/modrun/v1/runner.proto"], ["proto"])?;
    tonic_prost_build::configure().compile_fds(file_descriptors)?;
    println!("cargo:rerun-if-changed=proto/modrun/v1/runner.proto");
    Ok(())
}
