//! Generated gRPC bindings for the remote controller agent.

tonic::include_proto!("remotejobs");
