//! Generated request/response types for the remote NamedMap cache service.

tonic::include_proto!("named_cache");
