pub mod config;
pub mod proto;
pub mod rpc_server;
pub mod sdk;
pub mod sidecar;
