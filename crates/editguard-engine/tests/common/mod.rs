use async_trait::async_trait;
use chrono::{DateTime, Utc};
use editguard_core::errors::{EditGuardError, Result};
use editguard_core::model::{Batch, Change, ProposedEdit};
use editguard_core::{ChangeSubmission, Clock, DocumentState, ManualClock, Session};
use editguard_engine::{
    ChangeProcessor, EngineConfig, FixedJitter, InMemoryPersistence, PassthroughProcessor,
    Persistence, PipelineBuilder, SubmissionPipeline, VirtualSleeper,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Pipeline wired to virtual time and jitter-free backoff
#[allow(dead_code)]
pub struct Harness {
    pub clock: ManualClock,
    pub sleeper: VirtualSleeper,
    pub builder: PipelineBuilder,
}

#[allow(dead_code)]
pub fn harness(config: EngineConfig) -> Harness {
    let clock = ManualClock::starting_now();
    let sleeper = VirtualSleeper::new(clock.clone());
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());
    let builder = SubmissionPipeline::builder(config)
        .clock(shared)
        .sleeper(Arc::new(sleeper.clone()))
        .jitter(Arc::new(FixedJitter(1.0)))
        .initial_state(seeded_state(clock.now()));
    Harness {
        clock,
        sleeper,
        builder,
    }
}

/// Open sessions `s1` (one batched change) and `s2` (empty)
#[allow(dead_code)]
pub fn seeded_state(now: DateTime<Utc>) -> DocumentState {
    let mut state = DocumentState::new();
    let mut s1 = Session::new("s1", "doc-1", now);
    let mut change = Change::from_edit(
        "c0".to_string(),
        "s1",
        "seed",
        &ProposedEdit::new("before", "after edit"),
        now,
    );
    change.batch_id = Some("b0".into());
    s1.changes.push(change);
    s1.batch_ids.push("b0".into());
    state.insert_session(s1);
    state.insert_session(Session::new("s2", "doc-2", now));
    state.batches.insert(
        "b0".into(),
        Batch::new("b0".into(), "s1", "seed", vec!["c0".into()], now),
    );
    state
}

#[allow(dead_code)]
pub fn submission(session_id: &str, edits: usize) -> ChangeSubmission {
    let edits = (0..edits)
        .map(|i| ProposedEdit::new(format!("old {}", i), format!("new {}", i)))
        .collect();
    ChangeSubmission::new("assistant", session_id, edits)
}

#[allow(dead_code)]
pub fn network_error() -> EditGuardError {
    EditGuardError::Network {
        message: "connection reset".into(),
    }
}

/// Fails the first `n` calls with a fixed error, then passes edits through
#[allow(dead_code)]
pub struct FlakyProcessor {
    remaining: AtomicU32,
    error: EditGuardError,
    calls: AtomicU32,
}

#[allow(dead_code)]
impl FlakyProcessor {
    pub fn failing(times: u32, error: EditGuardError) -> Self {
        Self {
            remaining: AtomicU32::new(times),
            error,
            calls: AtomicU32::new(0),
        }
    }

    pub fn always(error: EditGuardError) -> Self {
        Self::failing(u32::MAX, error)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChangeProcessor for FlakyProcessor {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn process(&self, submission: &ChangeSubmission, at: DateTime<Utc>) -> Result<Vec<Change>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(self.error.clone());
        }
        PassthroughProcessor.process(submission, at).await
    }
}

/// Blocks its first call until released
#[allow(dead_code)]
#[derive(Default)]
pub struct GatedProcessor {
    pub entered: Notify,
    pub release: Notify,
    armed: AtomicBool,
}

#[allow(dead_code)]
impl GatedProcessor {
    pub fn armed() -> Self {
        Self {
            armed: AtomicBool::new(true),
            ..Self::default()
        }
    }
}

#[async_trait]
impl ChangeProcessor for GatedProcessor {
    fn name(&self) -> &str {
        "gated"
    }

    async fn process(&self, submission: &ChangeSubmission, at: DateTime<Utc>) -> Result<Vec<Change>> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        PassthroughProcessor.process(submission, at).await
    }
}

/// In-memory persistence that fails with a storage error while switched on
///
/// The first `healthy_writes` calls go through even while failing.
#[allow(dead_code)]
#[derive(Default)]
pub struct FlakyPersistence {
    pub inner: InMemoryPersistence,
    failing: AtomicBool,
    healthy_writes: AtomicU32,
}

#[allow(dead_code)]
impl FlakyPersistence {
    pub fn failing() -> Self {
        Self {
            inner: InMemoryPersistence::new(),
            failing: AtomicBool::new(true),
            healthy_writes: AtomicU32::new(0),
        }
    }

    pub fn failing_after(writes: u32) -> Self {
        Self {
            inner: InMemoryPersistence::new(),
            failing: AtomicBool::new(true),
            healthy_writes: AtomicU32::new(writes),
        }
    }

    pub fn heal(&self) {
        self.failing.store(false, Ordering::SeqCst);
    }
}

#[async_trait]
impl Persistence for FlakyPersistence {
    async fn persist_session(&self, state: &DocumentState, session_id: &str) -> Result<()> {
        let healthy = self
            .healthy_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if self.failing.load(Ordering::SeqCst) && !healthy {
            return Err(EditGuardError::Storage {
                message: "disk unavailable".into(),
            });
        }
        self.inner.persist_session(state, session_id).await
    }
}

/// Blocks its first call until released; later calls go straight through
#[allow(dead_code)]
#[derive(Default)]
pub struct GatedPersistence {
    pub inner: InMemoryPersistence,
    pub entered: Notify,
    pub release: Notify,
    armed: AtomicBool,
}

#[allow(dead_code)]
impl GatedPersistence {
    pub fn armed() -> Self {
        Self {
            armed: AtomicBool::new(true),
            ..Self::default()
        }
    }
}

#[async_trait]
impl Persistence for GatedPersistence {
    async fn persist_session(&self, state: &DocumentState, session_id: &str) -> Result<()> {
        if self.armed.swap(false, Ordering::SeqCst) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.persist_session(state, session_id).await
    }
}
