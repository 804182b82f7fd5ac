fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/named_cache.proto");
    tonic_prost_build::configure().compile_protos(&["proto/named_cache.proto"], &["proto"])?;
    Ok(())
}
