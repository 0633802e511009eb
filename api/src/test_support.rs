//! In-memory stand-ins for the persistence ports and the publishing gateway

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

use crate::domain::accounts::NetworkSet;
use crate::domain::alert_state::AlertState;
use crate::domain::scheduled_posts::{NewScheduledPost, OverdueBacklog};
use crate::domain::{AccountDirectory, AlertStateStore, CronRunStore, ScheduledPostStore, StoreError};
use crate::models::Network;
use crate::services::gateway::{
    DraftRequest, DraftResponse, GatewayError, MediaState, MediaStatus, PublishingGateway,
    UploadSlot,
};

/// PNG filled with pseudo-random noise, so it barely compresses losslessly
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let mut seed: u32 = 0x2545_f491;
    let img = RgbImage::from_fn(width, height, |_, _| {
        seed ^= seed << 13;
        seed ^= seed >> 17;
        seed ^= seed << 5;
        let [r, g, b, _] = seed.to_le_bytes();
        Rgb([r, g, b])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgb8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn unavailable() -> StoreError {
    StoreError::Database(sqlx::Error::PoolTimedOut)
}

// Gateway

#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub file_name: String,
    pub content_type: String,
    pub size: usize,
}

#[derive(Default)]
pub struct FakeGateway {
    media_states: Mutex<VecDeque<MediaState>>,
    /// Per network: scripted draft outcomes, consumed in order; empty = success
    draft_script: Mutex<HashMap<String, VecDeque<Result<(), String>>>>,
    fail_slots: bool,
    uploads: Mutex<Vec<UploadRecord>>,
    drafts: Mutex<Vec<DraftRequest>>,
    slot_requests: AtomicUsize,
    polls: AtomicUsize,
    next_id: AtomicUsize,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Statuses returned by successive readiness polls; `ready` once exhausted
    pub fn with_media_states(self, states: Vec<MediaState>) -> Self {
        *self.media_states.lock().unwrap() = states.into();
        self
    }

    pub fn with_draft_outcomes(self, network: Network, outcomes: Vec<Result<(), &str>>) -> Self {
        self.draft_script.lock().unwrap().insert(
            network.as_str().to_string(),
            outcomes
                .into_iter()
                .map(|o| o.map_err(str::to_string))
                .collect(),
        );
        self
    }

    pub fn failing_uploads(mut self) -> Self {
        self.fail_slots = true;
        self
    }

    pub fn uploads(&self) -> Vec<UploadRecord> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn drafts(&self) -> Vec<DraftRequest> {
        self.drafts.lock().unwrap().clone()
    }

    pub fn drafts_for(&self, network: Network) -> Vec<DraftRequest> {
        self.drafts()
            .into_iter()
            .filter(|d| d.network() == Some(network.as_str()))
            .collect()
    }

    pub fn slot_requests(&self) -> usize {
        self.slot_requests.load(Ordering::SeqCst)
    }

    pub fn status_polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PublishingGateway for FakeGateway {
    async fn create_upload_slot(
        &self,
        _network_set_id: &str,
        file_name: &str,
    ) -> Result<UploadSlot, GatewayError> {
        self.slot_requests.fetch_add(1, Ordering::SeqCst);
        if self.fail_slots {
            return Err(GatewayError::Api {
                status: 503,
                body: "media storage unavailable".to_string(),
            });
        }
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(UploadSlot {
            media_id: format!("media-{}", n),
            upload_url: format!("memory://{}", file_name),
        })
    }

    async fn transfer(
        &self,
        slot: &UploadSlot,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), GatewayError> {
        self.uploads.lock().unwrap().push(UploadRecord {
            file_name: slot.upload_url.trim_start_matches("memory://").to_string(),
            content_type: content_type.to_string(),
            size: data.len(),
        });
        Ok(())
    }

    async fn media_status(
        &self,
        _network_set_id: &str,
        media_id: &str,
    ) -> Result<MediaStatus, GatewayError> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let status = self
            .media_states
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MediaState::Ready);
        Ok(MediaStatus {
            media_id: media_id.to_string(),
            status,
            error_reason: None,
        })
    }

    async fn create_draft(
        &self,
        _network_set_id: &str,
        draft: &DraftRequest,
    ) -> Result<DraftResponse, GatewayError> {
        self.drafts.lock().unwrap().push(draft.clone());

        let network = draft.network().unwrap_or_default().to_string();
        let outcome = self
            .draft_script
            .lock()
            .unwrap()
            .get_mut(&network)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Ok(()));

        match outcome {
            Ok(()) => {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                let body = serde_json::json!({ "id": format!("draft-{}", n) });
                Ok(serde_json::from_value(body).unwrap())
            }
            Err(body) => Err(GatewayError::Api { status: 422, body }),
        }
    }
}

// Persistence

#[derive(Default)]
pub struct FakeDirectory {
    sets: HashMap<String, NetworkSet>,
    fail: bool,
}

impl FakeDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_account(mut self, account_id: &str, set_id: &str, networks: &[Network]) -> Self {
        self.sets.insert(
            account_id.to_string(),
            NetworkSet {
                id: set_id.to_string(),
                networks: networks.to_vec(),
            },
        );
        self
    }

    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }
}

#[async_trait]
impl AccountDirectory for FakeDirectory {
    async fn network_set(
        &self,
        account_id: &str,
        target_set_id: Option<&str>,
    ) -> Result<Option<NetworkSet>, StoreError> {
        if self.fail {
            return Err(unavailable());
        }
        Ok(self
            .sets
            .get(account_id)
            .filter(|set| target_set_id.is_none_or(|id| id == set.id))
            .cloned())
    }
}

#[derive(Default)]
pub struct FakePostStore {
    inserted: Mutex<Vec<NewScheduledPost>>,
    fail_inserts: bool,
    backlog: OverdueBacklog,
    fail_backlog: bool,
    backlog_cutoffs: Mutex<Vec<DateTime<Utc>>>,
}

impl FakePostStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_inserts(mut self) -> Self {
        self.fail_inserts = true;
        self
    }

    pub fn with_backlog(mut self, backlog: OverdueBacklog) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn failing_backlog(mut self) -> Self {
        self.fail_backlog = true;
        self
    }

    pub fn inserted(&self) -> Vec<NewScheduledPost> {
        self.inserted.lock().unwrap().clone()
    }

    pub fn backlog_cutoffs(&self) -> Vec<DateTime<Utc>> {
        self.backlog_cutoffs.lock().unwrap().clone()
    }
}

#[async_trait]
impl ScheduledPostStore for FakePostStore {
    async fn insert_posts(&self, posts: &[NewScheduledPost]) -> Result<Vec<i64>, StoreError> {
        if self.fail_inserts {
            return Err(unavailable());
        }
        let mut inserted = self.inserted.lock().unwrap();
        let start = inserted.len() as i64 + 1;
        inserted.extend_from_slice(posts);
        Ok((start..start + posts.len() as i64).collect())
    }

    async fn overdue_backlog(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<OverdueBacklog, StoreError> {
        self.backlog_cutoffs.lock().unwrap().push(cutoff);
        if self.fail_backlog {
            return Err(unavailable());
        }
        let mut backlog = self.backlog.clone();
        backlog.oldest.truncate(limit as usize);
        Ok(backlog)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunRecord {
    pub id: i64,
    pub job_name: String,
    pub source: String,
    pub started_at: DateTime<Utc>,
    pub success: Option<bool>,
    pub error_message: Option<String>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct FakeCronRuns {
    runs: Mutex<Vec<RunRecord>>,
    last_success: Option<DateTime<Utc>>,
    next_id: AtomicI64,
}

impl FakeCronRuns {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_last_success(mut self, at: DateTime<Utc>) -> Self {
        self.last_success = Some(at);
        self
    }

    pub fn runs(&self) -> Vec<RunRecord> {
        self.runs.lock().unwrap().clone()
    }
}

#[async_trait]
impl CronRunStore for FakeCronRuns {
    async fn start_run(
        &self,
        job_name: &str,
        source: &str,
        started_at: DateTime<Utc>,
    ) -> Result<i64, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.runs.lock().unwrap().push(RunRecord {
            id,
            job_name: job_name.to_string(),
            source: source.to_string(),
            started_at,
            success: None,
            error_message: None,
            finished_at: None,
        });
        Ok(id)
    }

    async fn finish_run(
        &self,
        run_id: i64,
        success: bool,
        error_message: Option<&str>,
        finished_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut runs = self.runs.lock().unwrap();
        if let Some(run) = runs.iter_mut().find(|r| r.id == run_id) {
            run.success = Some(success);
            run.error_message = error_message.map(str::to_string);
            run.finished_at = Some(finished_at);
        }
        Ok(())
    }

    async fn last_success(&self, _job_name: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self.last_success)
    }
}

#[derive(Default)]
pub struct FakeAlertState {
    states: Mutex<HashMap<String, AlertState>>,
}

impl FakeAlertState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sent(self, fingerprint: &str, sent_at: DateTime<Utc>) -> Self {
        self.states.lock().unwrap().insert(
            fingerprint.to_string(),
            AlertState {
                fingerprint: fingerprint.to_string(),
                last_sent_at: sent_at,
                last_payload: String::new(),
            },
        );
        self
    }

    pub fn state(&self, fingerprint: &str) -> Option<AlertState> {
        self.states.lock().unwrap().get(fingerprint).cloned()
    }
}

#[async_trait]
impl AlertStateStore for FakeAlertState {
    async fn get(&self, fingerprint: &str) -> Result<Option<AlertState>, StoreError> {
        Ok(self.state(fingerprint))
    }

    async fn upsert(
        &self,
        fingerprint: &str,
        sent_at: DateTime<Utc>,
        payload: &str,
    ) -> Result<(), StoreError> {
        self.states.lock().unwrap().insert(
            fingerprint.to_string(),
            AlertState {
                fingerprint: fingerprint.to_string(),
                last_sent_at: sent_at,
                last_payload: payload.to_string(),
            },
        );
        Ok(())
    }
}
