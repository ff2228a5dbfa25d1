fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::var_os("PROTOC").is_none() {
        std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path()?);
    }
    tonic_build::configure().compile_protos(
        &[
            "proto/data_types.proto",
            "proto/compute.proto",
            "proto/app_comm.proto",
            "proto/wakeup.proto",
        ],
        &["proto"],
    )?;
    Ok(())
}
