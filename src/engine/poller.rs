//! Long-running video job poller.
//!
//! A job moves `Submitted -> Polling -> {Done | Failed}`. The submission
//! response counts as the first status check; every further check is
//! preceded by one fixed-interval sleep. There is no attempt or time bound:
//! only the cancellation token ends a job that never finishes.

use super::{GenerationBackend, GenerationError, VideoOperation};
use crate::model::SessionEvent;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub enum PollState {
    Submitted(VideoOperation),
    Polling(VideoOperation),
    Done { video_uri: String },
    Failed(GenerationError),
}

impl PollState {
    /// Classify a status snapshot. Unfinished jobs stay in `Polling`.
    pub fn observe(op: VideoOperation) -> PollState {
        if op.error.is_some() {
            return PollState::Failed(GenerationError::from_job(op.error));
        }
        if !op.done {
            return PollState::Polling(op);
        }
        match op.video_uri {
            Some(uri) if !uri.trim().is_empty() => PollState::Done { video_uri: uri },
            _ => PollState::Failed(GenerationError::MissingVideoUri),
        }
    }
}

/// Parameters for one polling loop.
pub struct PollParams<'a> {
    pub backend: &'a dyn GenerationBackend,
    pub interval: Duration,
    pub event_tx: Option<&'a UnboundedSender<SessionEvent>>,
    pub cancel: &'a CancellationToken,
}

/// Drive a submitted job to a terminal state and return its video URI.
pub async fn poll_until_done(
    submitted: VideoOperation,
    params: PollParams<'_>,
) -> Result<String, GenerationError> {
    let PollParams {
        backend,
        interval,
        event_tx,
        cancel,
    } = params;
    let start = Instant::now();
    let mut attempt = 0u32;
    let mut state = PollState::Submitted(submitted);

    loop {
        state = match state {
            PollState::Submitted(op) => PollState::observe(op),
            PollState::Polling(op) => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::info!(operation = %op.name, "video job polling cancelled");
                        return Err(GenerationError::Cancelled);
                    }
                    _ = tokio::time::sleep(interval) => {}
                }
                attempt += 1;
                let next = backend.get_operation(&op.name).await?;
                tracing::debug!(operation = %op.name, attempt, done = next.done, "polled video job");
                if let Some(tx) = event_tx {
                    let _ = tx.send(SessionEvent::PollTick {
                        attempt,
                        elapsed: start.elapsed(),
                    });
                }
                PollState::observe(next)
            }
            PollState::Done { video_uri } => return Ok(video_uri),
            PollState::Failed(e) => {
                tracing::warn!(attempt, "video job failed: {e}");
                return Err(e);
            }
        };
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;

    fn params<'a>(
        backend: &'a ScriptedBackend,
        cancel: &'a CancellationToken,
    ) -> PollParams<'a> {
        PollParams {
            backend,
            interval: Duration::from_secs(10),
            event_tx: None,
            cancel,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pending_pending_failed_ends_failed_after_two_delays() {
        let backend = ScriptedBackend::default();
        backend
            .poll_replies
            .lock()
            .unwrap()
            .extend([Ok(pending("op")), Ok(failed("op", "quota"))]);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let err = poll_until_done(pending("op"), params(&backend, &cancel))
            .await
            .unwrap_err();
        let elapsed = start.elapsed();

        match err {
            GenerationError::JobFailed(msg) => assert_eq!(msg, "quota"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(backend.polled.lock().unwrap().len(), 2);
        assert!(elapsed >= Duration::from_secs(20), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(30), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn done_without_uri_is_a_contract_violation() {
        let backend = ScriptedBackend::default();
        backend
            .poll_replies
            .lock()
            .unwrap()
            .push_back(Ok(finished("op", None)));
        let cancel = CancellationToken::new();

        let err = poll_until_done(pending("op"), params(&backend, &cancel))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::MissingVideoUri));
    }

    #[tokio::test(start_paused = true)]
    async fn already_finished_submission_needs_no_polling() {
        let backend = ScriptedBackend::default();
        let cancel = CancellationToken::new();
        let start = Instant::now();

        let uri = poll_until_done(finished("op", Some("https://v")), params(&backend, &cancel))
            .await
            .unwrap();
        assert_eq!(uri, "https://v");
        assert!(backend.polled.lock().unwrap().is_empty());
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn entity_not_found_surfaces_as_credential_error() {
        let backend = ScriptedBackend::default();
        backend
            .poll_replies
            .lock()
            .unwrap()
            .push_back(Ok(failed("op", "Requested entity was not found.")));
        let cancel = CancellationToken::new();

        let err = poll_until_done(pending("op"), params(&backend, &cancel))
            .await
            .unwrap_err();
        assert!(err.is_credential_missing());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_an_endless_job() {
        let backend = ScriptedBackend::default();
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(35)).await;
            canceller.cancel();
        });

        let err = poll_until_done(pending("op"), params(&backend, &cancel))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Cancelled));
        assert_eq!(backend.polled.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn emits_a_tick_per_status_check() {
        let backend = ScriptedBackend::default();
        backend
            .poll_replies
            .lock()
            .unwrap()
            .extend([Ok(pending("op")), Ok(finished("op", Some("https://v")))]);
        let cancel = CancellationToken::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let p = PollParams {
            event_tx: Some(&tx),
            ..params(&backend, &cancel)
        };
        poll_until_done(pending("op"), p).await.unwrap();
        drop(tx);

        let mut attempts = Vec::new();
        while let Some(ev) = rx.recv().await {
            if let SessionEvent::PollTick { attempt, .. } = ev {
                attempts.push(attempt);
            }
        }
        assert_eq!(attempts, vec![1, 2]);
    }

    #[test]
    fn observe_classifies_snapshots() {
        assert!(matches!(PollState::observe(pending("op")), PollState::Polling(_)));
        assert!(matches!(
            PollState::observe(finished("op", Some("u"))),
            PollState::Done { video_uri } if video_uri == "u"
        ));
        assert!(matches!(
            PollState::observe(finished("op", Some("  "))),
            PollState::Failed(GenerationError::MissingVideoUri)
        ));
    }
}
