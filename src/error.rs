use thiserror::Error;

/// Fatal failures of a compliance run.
///
/// Anything that lets the run continue (a failing inventory lookup, a
/// malformed model turn, an exhausted step budget) is not represented here.
#[derive(Debug, Error)]
pub enum CheckError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("could not connect to the MCP server: {0}")]
    Connection(String),

    #[error("MCP protocol error: {0}")]
    Protocol(String),

    #[error("{provider} rejected the credential: {message}")]
    Auth { provider: String, message: String },

    #[error("{provider} request failed: {message}")]
    Provider { provider: String, message: String },
}

impl CheckError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    pub fn auth(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Auth {
            provider: provider.into(),
            message: message.into(),
        }
    }
}
