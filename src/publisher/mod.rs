//! External platform capabilities
//!
//! The scheduling core never talks to a platform API directly. It goes
//! through two narrow capabilities:
//!
//! - [`PlatformPublisher`]: push content to a platform, get back an external id and URL
//! - [`MetricsProvider`]: read engagement numbers for an already-published post
//!
//! [`PublisherRegistry`] maps platform identifiers to implementations and
//! is itself a publisher, so the dispatcher holds a single `Arc<dyn PlatformPublisher>`
//! and never branches on platform name.

pub mod dry_run;

pub use dry_run::DryRunPublisher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::models::{EngagementMetrics, MediaRef, ScheduledPost};

// ============================================================================
// Errors
// ============================================================================

/// How a platform failure should be treated by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Timeouts on the platform side, 5xx, rate limits
    Transient,
    /// Content rejected, credentials revoked
    Permanent,
    /// The publish call exceeded its time budget
    Timeout,
    /// The collaborator did not say
    Unclassified,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Timeout => "timeout",
            Self::Unclassified => "unclassified",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a platform capability
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PublishError {
    pub kind: FailureKind,
    pub message: String,
}

impl PublishError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Permanent, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn unclassified(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unclassified, message)
    }
}

/// Result type for capability calls
pub type PublishResult<T> = Result<T, PublishError>;

// ============================================================================
// Request / response
// ============================================================================

/// Everything a publisher needs to push one post to one platform
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishRequest {
    pub platform: String,
    pub content: String,
    pub media: Vec<MediaRef>,
    pub options: serde_json::Map<String, serde_json::Value>,
}

impl PublishRequest {
    pub fn for_post(post: &ScheduledPost, platform: &str) -> Self {
        Self {
            platform: platform.to_string(),
            content: post.content.clone(),
            media: post.media.clone(),
            options: post.options.clone(),
        }
    }
}

/// Identifiers assigned by the platform to a published post
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub external_id: String,
    pub url: String,
}

// ============================================================================
// Capabilities
// ============================================================================

/// Pushes content to an external platform
#[async_trait]
pub trait PlatformPublisher: Send + Sync {
    async fn publish(&self, request: &PublishRequest) -> PublishResult<PublishReceipt>;
}

/// Reads engagement numbers for a published post
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn fetch_metrics(
        &self,
        platform: &str,
        external_post_id: &str,
    ) -> PublishResult<EngagementMetrics>;
}

// ============================================================================
// Registry
// ============================================================================

/// Platform-keyed lookup of capability implementations
#[derive(Default, Clone)]
pub struct PublisherRegistry {
    publishers: HashMap<String, Arc<dyn PlatformPublisher>>,
    metrics: HashMap<String, Arc<dyn MetricsProvider>>,
    fallback_publisher: Option<Arc<dyn PlatformPublisher>>,
    fallback_metrics: Option<Arc<dyn MetricsProvider>>,
}

impl PublisherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publisher for one platform identifier
    pub fn register(
        mut self,
        platform: impl Into<String>,
        publisher: Arc<dyn PlatformPublisher>,
    ) -> Self {
        self.publishers
            .insert(platform.into().to_lowercase(), publisher);
        self
    }

    /// Register a metrics provider for one platform identifier
    pub fn register_metrics(
        mut self,
        platform: impl Into<String>,
        provider: Arc<dyn MetricsProvider>,
    ) -> Self {
        self.metrics.insert(platform.into().to_lowercase(), provider);
        self
    }

    /// Publisher used for platforms with no explicit registration
    pub fn with_fallback_publisher(mut self, publisher: Arc<dyn PlatformPublisher>) -> Self {
        self.fallback_publisher = Some(publisher);
        self
    }

    /// Metrics provider used for platforms with no explicit registration
    pub fn with_fallback_metrics(mut self, provider: Arc<dyn MetricsProvider>) -> Self {
        self.fallback_metrics = Some(provider);
        self
    }

    pub fn publisher_for(&self, platform: &str) -> Option<Arc<dyn PlatformPublisher>> {
        self.publishers
            .get(platform)
            .or(self.fallback_publisher.as_ref())
            .cloned()
    }

    pub fn metrics_for(&self, platform: &str) -> Option<Arc<dyn MetricsProvider>> {
        self.metrics
            .get(platform)
            .or(self.fallback_metrics.as_ref())
            .cloned()
    }

    /// Platforms with an explicit publisher registration, sorted
    pub fn platforms(&self) -> Vec<String> {
        let mut platforms: Vec<String> = self.publishers.keys().cloned().collect();
        platforms.sort();
        platforms
    }
}

impl fmt::Debug for PublisherRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublisherRegistry")
            .field("platforms", &self.platforms())
            .field("has_fallback", &self.fallback_publisher.is_some())
            .finish()
    }
}

#[async_trait]
impl PlatformPublisher for PublisherRegistry {
    async fn publish(&self, request: &PublishRequest) -> PublishResult<PublishReceipt> {
        match self.publisher_for(&request.platform) {
            Some(publisher) => publisher.publish(request).await,
            None => Err(PublishError::permanent(format!(
                "no publisher registered for platform '{}'",
                request.platform
            ))),
        }
    }
}

#[async_trait]
impl MetricsProvider for PublisherRegistry {
    async fn fetch_metrics(
        &self,
        platform: &str,
        external_post_id: &str,
    ) -> PublishResult<EngagementMetrics> {
        match self.metrics_for(platform) {
            Some(provider) => provider.fetch_metrics(platform, external_post_id).await,
            None => Err(PublishError::permanent(format!(
                "no metrics provider registered for platform '{platform}'"
            ))),
        }
    }
}
