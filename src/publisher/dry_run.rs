//! Publisher that records intent without calling any platform

use async_trait::async_trait;

use super::{MetricsProvider, PlatformPublisher, PublishReceipt, PublishRequest, PublishResult};
use crate::models::EngagementMetrics;

/// Accepts every publish and reports zero engagement
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunPublisher;

#[async_trait]
impl PlatformPublisher for DryRunPublisher {
    async fn publish(&self, request: &PublishRequest) -> PublishResult<PublishReceipt> {
        let external_id = format!("dryrun-{}", uuid::Uuid::new_v4().simple());
        tracing::info!(
            platform = %request.platform,
            external_id = %external_id,
            content_len = request.content.len(),
            media = request.media.len(),
            "Dry run publish"
        );
        Ok(PublishReceipt {
            url: format!("dryrun://{}/{}", request.platform, external_id),
            external_id,
        })
    }
}

#[async_trait]
impl MetricsProvider for DryRunPublisher {
    async fn fetch_metrics(
        &self,
        platform: &str,
        external_post_id: &str,
    ) -> PublishResult<EngagementMetrics> {
        tracing::debug!(platform, external_post_id, "Dry run metrics fetch");
        Ok(EngagementMetrics::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dry_run_publish() {
        let request = PublishRequest {
            platform: "instagram".into(),
            content: "caption".into(),
            media: Vec::new(),
            options: serde_json::Map::new(),
        };
        let receipt = DryRunPublisher.publish(&request).await.unwrap();
        assert!(receipt.external_id.starts_with("dryrun-"));
        assert!(receipt.url.starts_with("dryrun://instagram/"));

        let metrics = DryRunPublisher.fetch_metrics("instagram", "x").await.unwrap();
        assert_eq!(metrics, EngagementMetrics::default());
    }
}
