fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=remotejobs.proto");
    // the harness is the client, the agent is the server
    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile(&["remotejobs.proto"], &["."])?;
    Ok(())
}
