//! Infrastructure client abstraction
//!
//! The deployment driver only talks to the cloud through [`InfraClient`].
//! [`OpenStackClient`] is the real implementation; tests substitute their own.

pub mod openstack;

pub use openstack::{OpenStackClient, OpenStackConnector};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::config::OpenStackParams;
use crate::placement::ComputeNode;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InfraError {
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Stack {} failed: {}", .stack_id.as_deref().unwrap_or("<unknown>"), .reason)]
    StackFailure {
        stack_id: Option<String>,
        reason: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Timed out after {0}s")]
    Timeout(u64),
}

// ============================================================================
// SBIO: Traits for abstraction (allows mocking in tests)
// ============================================================================

#[async_trait]
pub trait InfraClient: Send + Sync {
    /// Compute nodes able to host the flavor. Fails with
    /// [`InfraError::Forbidden`] when the caller may not list hosts.
    async fn list_compute_nodes(&self, flavor_name: &str) -> Result<Vec<ComputeNode>, InfraError>;

    /// Name of an external network to attach floating IPs from
    async fn choose_external_net(&self) -> Result<String, InfraError>;

    /// Submit a stack; returns its id as soon as the stack exists
    async fn create_stack(
        &self,
        name: &str,
        template: &str,
        parameters: &Map<String, Value>,
    ) -> Result<String, InfraError>;

    /// Wait until the stack is complete. A failed or timed out stack is
    /// reported as [`InfraError::StackFailure`].
    async fn wait_stack(&self, name: &str, stack_id: &str) -> Result<(), InfraError>;

    /// Stack outputs as strings, keyed by output name
    async fn get_stack_outputs(&self, stack_id: &str)
        -> Result<HashMap<String, String>, InfraError>;

    /// Opaque id of the host the named server runs on
    async fn get_server_host_id(&self, server_name: &str) -> Result<String, InfraError>;

    /// First address of the given type (`fixed`, `floating`) of the named server
    async fn get_server_ip(&self, server_name: &str, ip_type: &str) -> Result<String, InfraError>;
}

/// Opens infrastructure sessions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, params: &OpenStackParams) -> Result<Arc<dyn InfraClient>, InfraError>;
}

// ============================================================================
// SBIO: Mock implementation for testing (no I/O)
// ============================================================================


#[cfg(test)]
mod tests {
    use super::mock::MockInfraClient;
    use super::*;

    #[test]
    fn test_mock_forbidden_without_nodes() {
        let client = MockInfraClient::forbidden();
        let result = tokio_test::block_on(client.list_compute_nodes("m1.small"));
        assert!(matches!(result, Err(InfraError::Forbidden(_))));
    }

    #[test]
    fn test_mock_records_stacks() {
        let client = MockInfraClient::with_nodes(vec![ComputeNode::new("c1", "nova")]);
        let mut params = Map::new();
        params.insert("flavor".to_string(), Value::from("m1.small"));

        let first = tokio_test::block_on(client.create_stack("s", "tpl", &params)).unwrap();
        let second = tokio_test::block_on(client.create_stack("s", "tpl2", &params)).unwrap();

        assert_eq!((first.as_str(), second.as_str()), ("stack-0", "stack-1"));
        assert_eq!(client.last_template().as_deref(), Some("tpl2"));
        assert_eq!(client.last_parameters().unwrap()["flavor"], "m1.small");
    }

    #[test]
    fn test_mock_stack_fails_while_waiting() {
        let client = MockInfraClient {
            fail_stack: true,
            ..MockInfraClient::default()
        };
        let id = tokio_test::block_on(client.create_stack("s", "tpl", &Map::new())).unwrap();
        let result = tokio_test::block_on(client.wait_stack("s", &id));
        assert!(matches!(
            result,
            Err(InfraError::StackFailure { stack_id: Some(ref failed), .. }) if failed == &id
        ));
    }

    #[test]
    fn test_stack_failure_message() {
        let e = InfraError::StackFailure {
            stack_id: Some("abc".to_string()),
            reason: "CREATE_FAILED".to_string(),
        };
        assert_eq!(e.to_string(), "Stack abc failed: CREATE_FAILED");
    }
}
