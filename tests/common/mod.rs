//! Common test utilities

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use postqueue::clock::{Clock, ManualClock};
use postqueue::config::{Config, DispatcherConfig};
use postqueue::models::{EngagementMetrics, QueueItem};
use postqueue::publisher::{
    MetricsProvider, PlatformPublisher, PublishError, PublishReceipt, PublishRequest,
    PublishResult,
};
use postqueue::scheduler::{NewPost, QueueDispatcher, SchedulingCoordinator};
use postqueue::storage::{SchedulingStore, SqliteStore};

pub const TENANT: &str = "tenant-1";
pub const ACCOUNT: &str = "account-1";

/// Wednesday 2024-03-06 10:00 UTC
pub fn wednesday_10am() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 6, 10, 0, 0).unwrap()
}

/// Publisher whose failures are scripted per platform
#[derive(Default)]
pub struct ScriptedPublisher {
    failures: Mutex<HashMap<String, (u32, PublishError)>>,
    calls: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl ScriptedPublisher {
    /// Fail the next `times` calls for `platform` with a transient error
    pub fn failing(self, platform: &str, times: u32) -> Self {
        self.failing_with(platform, times, PublishError::transient("503 Service Unavailable"))
    }

    pub fn failing_with(self, platform: &str, times: u32, error: PublishError) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(platform.to_string(), (times, error));
        self
    }

    pub fn calls_for(&self, platform: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|p| *p == platform)
            .count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PlatformPublisher for ScriptedPublisher {
    async fn publish(&self, request: &PublishRequest) -> PublishResult<PublishReceipt> {
        self.calls.lock().unwrap().push(request.platform.clone());

        let mut failures = self.failures.lock().unwrap();
        if let Some((left, error)) = failures.get_mut(&request.platform) {
            if *left > 0 {
                *left -= 1;
                return Err(error.clone());
            }
        }

        Ok(PublishReceipt {
            external_id: format!("{}-123", request.platform),
            url: format!("https://{}.example/posts/123", request.platform),
        })
    }
}

#[async_trait]
impl MetricsProvider for ScriptedPublisher {
    async fn fetch_metrics(
        &self,
        _platform: &str,
        _external_post_id: &str,
    ) -> PublishResult<EngagementMetrics> {
        Ok(EngagementMetrics {
            likes: 500,
            comments: 50,
            shares: 30,
            reach: Some(20_000),
            ..Default::default()
        })
    }
}

/// In-memory store and pinned clock shared by the components under test
pub struct TestEnv {
    pub store: Arc<SqliteStore>,
    pub clock: Arc<ManualClock>,
    pub config: Config,
}

#[allow(dead_code)]
impl TestEnv {
    pub fn new() -> Self {
        Self::at(wednesday_10am())
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            store: Arc::new(SqliteStore::in_memory().unwrap()),
            clock: Arc::new(ManualClock::new(now)),
            config: Config::default(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn coordinator(&self) -> SchedulingCoordinator {
        SchedulingCoordinator::new(self.store.clone(), self.clock.clone(), &self.config).unwrap()
    }

    pub fn dispatcher(&self, publisher: Arc<ScriptedPublisher>) -> QueueDispatcher {
        self.dispatcher_with(publisher, &self.config.dispatcher)
    }

    pub fn dispatcher_with(
        &self,
        publisher: Arc<ScriptedPublisher>,
        config: &DispatcherConfig,
    ) -> QueueDispatcher {
        QueueDispatcher::new(
            self.store.clone(),
            publisher.clone(),
            publisher,
            self.clock.clone(),
            config,
        )
    }

    /// Create a post scheduled for `at` and return its id
    pub fn schedule_at(&self, platforms: &[&str], at: DateTime<Utc>) -> String {
        self.coordinator()
            .create_post(NewPost {
                tenant_id: TENANT.into(),
                account_id: ACCOUNT.into(),
                content: "Spring sale starts today".into(),
                platforms: platforms.iter().map(|p| p.to_string()).collect(),
                scheduled_at: Some(at),
                ..Default::default()
            })
            .unwrap()
            .post
            .id
    }

    pub fn queue_items(&self, post_id: &str) -> Vec<QueueItem> {
        self.store.queue_items_for(post_id).unwrap()
    }

    /// Create a post due right now
    pub fn schedule_now(&self, platforms: &[&str]) -> String {
        self.schedule_at(platforms, self.now())
    }
}
