use anyhow::{Context, Result};

fn main() -> Result<()> {
    // Build the afrouter.proto code.
    tonic_build::configure()
        .build_server(false)
        .compile(&["proto/afrouter.proto"], &["proto"])
        .context("error compiling afrouter proto")?;

    // Build the vcore.proto code.
    tonic_build::configure()
        .build_server(false)
        .compile(&["proto/vcore.proto"], &["proto"])
        .context("error compiling vcore proto")?;

    // Build the events.proto code.
    tonic_build::configure()
        .build_server(false)
        .build_client(false)
        .compile(&["proto/events.proto"], &["proto"])
        .context("error compiling events proto")?;

    Ok(())
}
