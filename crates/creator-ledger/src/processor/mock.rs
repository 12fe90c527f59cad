//! Mock Payout Processor
//!
//! For testing and local development. Accepts every payout unless told
//! otherwise and hands out sequential payout ids.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{PayoutProcessor, PayoutSubmission, ProcessorReceipt, SubmissionError};

#[derive(Default)]
struct MockState {
    transient_failures: usize,
    reject_reason: Option<String>,
    next_id: u64,
    by_key: HashMap<String, String>,
    submissions: Vec<PayoutSubmission>,
}

/// Mock processor with scriptable failures
#[derive(Default)]
pub struct MockPayoutProcessor {
    state: Mutex<MockState>,
    latency: Duration,
}

impl MockPayoutProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` calls as unavailable
    pub fn with_transient_failures(count: usize) -> Self {
        Self::with_state(MockState {
            transient_failures: count,
            ..MockState::default()
        })
    }

    /// Reject every submission
    pub fn rejecting(reason: impl Into<String>) -> Self {
        Self::with_state(MockState {
            reject_reason: Some(reason.into()),
            ..MockState::default()
        })
    }

    fn with_state(state: MockState) -> Self {
        Self {
            state: Mutex::new(state),
            latency: Duration::ZERO,
        }
    }

    /// Sleep before answering (for exercising concurrent callers)
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every call received, including failed ones
    pub async fn submissions(&self) -> Vec<PayoutSubmission> {
        self.state.lock().await.submissions.clone()
    }
}

#[async_trait]
impl PayoutProcessor for MockPayoutProcessor {
    async fn submit_payout(
        &self,
        submission: &PayoutSubmission,
    ) -> Result<ProcessorReceipt, SubmissionError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut state = self.state.lock().await;
        state.submissions.push(submission.clone());

        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(SubmissionError::Unavailable("mock processor timeout".into()));
        }
        if let Some(reason) = &state.reject_reason {
            return Err(SubmissionError::Rejected(reason.clone()));
        }

        // Same idempotency key, same payout
        if let Some(id) = state.by_key.get(&submission.idempotency_key) {
            return Ok(ProcessorReceipt { external_payout_id: id.clone() });
        }

        state.next_id += 1;
        let id = format!("po_mock_{:06}", state.next_id);
        state.by_key.insert(submission.idempotency_key.clone(), id.clone());

        Ok(ProcessorReceipt { external_payout_id: id })
    }

    fn name(&self) -> &str {
        "MockProcessor"
    }
}
