//! gRPC external callout server
//!
//! The gateway sends its message context, the server reads the identity claims
//! and request attributes out of it, and returns the context with the verdict
//! written to a flow variable.

use std::sync::Arc;
use tonic::Status;
use tracing::debug;

use super::shim::{CalloutInvocation, CalloutOutcome, CalloutShim};
use crate::rules::RequestAttributes;

/// Generated protobuf types for the external callout protocol
pub mod proto {
    tonic::include_proto!("externalcallout");
}

use proto::external_callout_service_server::{ExternalCalloutService, ExternalCalloutServiceServer};
use proto::{flow_variable, FlowVariable, MessageContext, Strings};

/// gRPC server implementation of the external callout
pub struct ExternalCalloutServer {
    shim: Arc<CalloutShim>,
}

impl ExternalCalloutServer {
    pub fn new(shim: Arc<CalloutShim>) -> Self {
        Self { shim }
    }

    /// Wrap into the tonic service
    pub fn into_service(self) -> ExternalCalloutServiceServer<Self> {
        ExternalCalloutServiceServer::new(self)
    }

    /// Read a flow variable as a string, whatever its wire type
    fn flow_string(context: &MessageContext, name: &str) -> Option<String> {
        let value = context.flow_variables.get(name)?.value.as_ref()?;
        Some(match value {
            flow_variable::Value::String(s) => s.clone(),
            flow_variable::Value::Int32(i) => i.to_string(),
            flow_variable::Value::Int64(i) => i.to_string(),
            flow_variable::Value::Bool(b) => b.to_string(),
            flow_variable::Value::Double(d) => d.to_string(),
        })
    }

    /// Extract the invocation; anything missing becomes an empty value
    fn invocation_from_context(&self, context: &MessageContext) -> CalloutInvocation {
        let config = self.shim.config();

        let verb = context
            .request
            .as_ref()
            .map(|r| r.verb.clone())
            .filter(|v| !v.is_empty())
            .or_else(|| Self::flow_string(context, &config.verb_variable))
            .unwrap_or_default();

        CalloutInvocation {
            claims: Self::flow_string(context, &config.claims_variable).map(serde_json::Value::String),
            request: RequestAttributes {
                verb,
                method: Self::flow_string(context, &config.method_variable).unwrap_or_default(),
                tool: Self::flow_string(context, &config.tool_variable).unwrap_or_default(),
            },
        }
    }

    /// Write the verdict, and diagnostics when enabled, back into the context
    fn apply_outcome(&self, context: &mut MessageContext, outcome: &CalloutOutcome) {
        context.flow_variables.insert(
            self.shim.config().verdict_variable.clone(),
            FlowVariable {
                value: Some(flow_variable::Value::String(outcome.verdict.to_string())),
            },
        );

        if let Some(diagnostics) = &outcome.diagnostics {
            let request = context.request.get_or_insert_with(Default::default);
            for (name, value) in diagnostics.headers() {
                request.headers.insert(name.to_string(), Strings { strings: vec![value] });
            }
        }
    }
}

#[tonic::async_trait]
impl ExternalCalloutService for ExternalCalloutServer {
    async fn process_message(
        &self,
        request: tonic::Request<MessageContext>,
    ) -> std::result::Result<tonic::Response<MessageContext>, Status> {
        let mut context = request.into_inner();
        debug!(
            "External callout for {} {} ({} flow variables)",
            context.request.as_ref().map(|r| r.verb.as_str()).unwrap_or(""),
            context.request.as_ref().map(|r| r.path.as_str()).unwrap_or(""),
            context.flow_variables.len()
        );

        let invocation = self.invocation_from_context(&context);
        let outcome = self.shim.decide(invocation).await;
        self.apply_outcome(&mut context, &outcome);

        Ok(tonic::Response::new(context))
    }
}
