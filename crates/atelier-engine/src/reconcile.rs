//! Request-level flow: hand the work to a delegate, then believe the store.

use std::sync::Arc;
use std::time::SystemTime;

use atelier_contracts::config::{PollBounds, PollRequest, CHAT_SETTLE_DELAY};
use atelier_contracts::error::StudioError;
use atelier_contracts::intent::expects_images;
use atelier_contracts::verdict::{self, Reconciliation, RequestKind, Verdict};
use serde_json::json;

use crate::delegate::{collect_message, Delegate, Instruction};
use crate::poller::await_artifacts;
use crate::studio::Studio;

pub struct Reconciler {
    studio: Arc<Studio>,
    delegate: Arc<dyn Delegate>,
    poll: PollBounds,
}

impl Reconciler {
    pub fn new(studio: Arc<Studio>, delegate: Arc<dyn Delegate>, poll: PollBounds) -> Self {
        Self {
            studio,
            delegate,
            poll,
        }
    }

    pub fn studio(&self) -> &Arc<Studio> {
        &self.studio
    }

    pub fn poll_bounds(&self) -> PollBounds {
        self.poll
    }

    pub async fn generate_request(&self, prompt: &str) -> Reconciliation {
        let message = collect_message(self.delegate.run(Instruction::generate(prompt))).await;
        let observed =
            await_artifacts(self.studio.store(), &PollRequest::generation(self.poll)).await;
        let mut outcome = verdict::reconcile(RequestKind::Generate, &observed, &message);

        if outcome.verdict.is_success() {
            self.studio.record_observed(&outcome.artifacts);
        } else {
            let others = self
                .studio
                .store()
                .entries("")
                .map(|entries| entries.len())
                .unwrap_or(0);
            if others > 0 {
                outcome.message = format!(
                    "{} Found {others} other image(s) in uploads directory.",
                    outcome.message
                );
            }
        }
        self.log(RequestKind::Generate, &outcome);
        outcome
    }

    /// Fails before anything is delegated: `NoTarget` when no image was named
    /// and none has been generated or edited yet, `SourceNotFound` when the
    /// target is not in the store.
    pub async fn edit_request(
        &self,
        edit_prompt: &str,
        image_filename: Option<&str>,
    ) -> Result<Reconciliation, StudioError> {
        let target = self.studio.resolve_target(image_filename)?;
        if !self.studio.store().exists(&target) {
            return Err(StudioError::SourceNotFound(target));
        }
        let message =
            collect_message(self.delegate.run(Instruction::edit(edit_prompt, &target))).await;
        let observed = await_artifacts(self.studio.store(), &PollRequest::edit(self.poll)).await;
        let outcome = verdict::reconcile(RequestKind::Edit, &observed, &message);
        if outcome.verdict.is_success() {
            self.studio.record_observed(&outcome.artifacts);
        }
        self.log(RequestKind::Edit, &outcome);
        Ok(outcome)
    }

    pub async fn chat_request(&self, message: &str) -> Reconciliation {
        let started = SystemTime::now();
        let reply = collect_message(self.delegate.run(Instruction::chat(message))).await;

        let outcome = if expects_images(message, &reply) {
            tokio::time::sleep(CHAT_SETTLE_DELAY).await;
            let observed =
                await_artifacts(self.studio.store(), &PollRequest::chat(started)).await;
            if observed.is_empty() {
                verdict::reply(&reply)
            } else {
                self.studio.record_observed(&observed);
                verdict::reconcile(RequestKind::Chat, &observed, &reply)
            }
        } else {
            verdict::reply(&reply)
        };
        self.log(RequestKind::Chat, &outcome);
        outcome
    }

    fn log(&self, kind: RequestKind, outcome: &Reconciliation) {
        match outcome.verdict {
            Verdict::Failure => tracing::warn!(
                kind = ?kind,
                message = %outcome.message,
                "request reconciled without artifacts"
            ),
            _ => tracing::info!(
                kind = ?kind,
                artifacts = outcome.artifacts.len(),
                "request reconciled"
            ),
        }
        self.studio.emit(
            "reconciled",
            json!({
                "kind": kind,
                "verdict": outcome.verdict,
                "artifacts": outcome.artifacts,
            }),
        );
    }
}
