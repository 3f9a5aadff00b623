pub mod isoport {
    pub mod v1 {
        tonic::include_proto!("isoport.v1");
    }
}

/// Encoded descriptor set for gRPC reflection.
pub const FILE_DESCRIPTOR_SET: &[u8] = tonic::include_file_descriptor_set!("isoport_descriptor");
