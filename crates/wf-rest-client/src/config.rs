//! Connection settings for a workflow deployment

use url::Url;
use validator::Validate;

use crate::error::RestClientResult;

pub const DEFAULT_USER_AGENT: &str = concat!("wf-rest-client/", env!("CARGO_PKG_VERSION"));

/// Where the deployment lives and how to identify ourselves to it
#[derive(Debug, Clone, PartialEq, Eq, Validate)]
pub struct ClientConfig {
    pub base_url: Url,
    #[validate(length(min = 1, message = "Deployment name cannot be empty"))]
    pub deployment: String,
    #[validate(length(min = 1, message = "User agent cannot be empty"))]
    pub user_agent: String,
}

impl ClientConfig {
    pub fn new(base_url: Url, deployment: impl Into<String>) -> Self {
        Self {
            base_url,
            deployment: deployment.into(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Create a config from a base URL string
    pub fn from_url(base_url: &str, deployment: impl Into<String>) -> RestClientResult<Self> {
        Ok(Self::new(Url::parse(base_url)?, deployment))
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}
