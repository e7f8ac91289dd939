//! Gateway callout: the shim that turns an invocation into a verdict, and the
//! gRPC and HTTP transports in front of it.

pub mod grpc;
pub mod http;
pub mod server;
pub mod shim;

pub use grpc::ExternalCalloutServer;
pub use http::configure_routes;
pub use server::CalloutServer;
pub use shim::{
    CalloutInvocation, CalloutOutcome, CalloutShim, Diagnostics, BUILD_TIME, BUILD_TIME_HEADER,
    INVOCATION_COUNT_HEADER,
};
