use std::time::{SystemTime, UNIX_EPOCH};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Compile protobuf files
    tonic_build::compile_protos("proto/external_callout.proto")?;

    // Stamp the build time so the callout can report it in diagnostic headers
    record_build_time();

    Ok(())
}

fn record_build_time() {
    let epoch_secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    println!("cargo:rustc-env=CALLOUT_BUILD_EPOCH={}", epoch_secs);
    println!("cargo:rerun-if-changed=proto/external_callout.proto");
    println!("cargo:rerun-if-changed=src");
    println!("cargo:rerun-if-changed=Cargo.toml");
}
