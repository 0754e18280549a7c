use std::fs;


fn main() -> Result<(), Box<dyn std::error::Error>> {
    let proto_dir = "./protobuf/spark/connect/";
    println!("cargo:rerun-if-changed={proto_dir}");

    let mut file_paths: Vec<String> = vec![];

    for file in fs::read_dir(proto_dir)? {
        let entry = file?.path();
        if entry.extension().is_some_and(|ext| ext == "proto") {
            file_paths.push(entry.to_string_lossy().into_owned());
        }
    }
    file_paths.sort();

    // Get protobuf compiler path and set environment variable
    let protoc_path = protoc_bin_vendored::protoc_bin_path()?;
    // SAFE in build.rs because this script runs single-threaded.
    unsafe {
        std::env::set_var("PROTOC", protoc_path);
    }

    tonic_prost_build::configure()
        .protoc_arg("--experimental_allow_proto3_optional")
        .build_server(false)
        .build_client(true)
        .build_transport(true)
        .compile_protos(&file_paths[..], &["./protobuf/".to_string()])?;

    Ok(())
}
