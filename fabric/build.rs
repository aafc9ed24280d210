fn main() -> Result<(), Box<dyn std::error::Error>> {
    // SAFETY: build-script process, single-threaded at this point.
    unsafe {
        std::env::set_var("PROTOC", protobuf_src::protoc());
    }

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/agent.proto"], &["proto/"])?;
    Ok(())
}
