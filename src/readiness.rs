// Copyright (c) 2023 Espresso Systems (espressosys.com)
// This file is part of the sequencer-example-l2 repository.

// You should have received a copy of the MIT License
// along with the sequencer-example-l2 repository. If not, see <https://mit-license.org/>.

//! Blocks until the backing service answers its status check.

use crate::cancel::CancelToken;
use crate::error::{GaveUpSnafu, ProbeCancelledSnafu, PxeError, ReadinessError};
use async_trait::async_trait;
use backoff::backoff::Backoff;

/// The status text a healthy service answers with.
pub const READY_STATUS: &str = "OK";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusReport {
    pub status_text: String,
}

impl StatusReport {
    pub fn is_ready(&self) -> bool {
        self.status_text == READY_STATUS
    }
}

#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn status(&self) -> Result<StatusReport, PxeError>;
}

/// Probes `source` until it reports [`READY_STATUS`].
///
/// Transport errors and any other status text are logged and retried after the delay chosen by
/// `policy`. With an unbounded policy this only returns early on cancellation.
pub async fn wait_until_ready<S, B>(
    source: &S,
    policy: &mut B,
    cancel: &CancelToken,
) -> Result<(), ReadinessError>
where
    S: StatusSource + ?Sized,
    B: Backoff,
{
    let mut attempts: usize = 0;
    loop {
        if cancel.is_cancelled() {
            return ProbeCancelledSnafu.fail();
        }
        attempts += 1;
        match source.status().await {
            Ok(report) if report.is_ready() => {
                tracing::info!(attempts, "backing service is ready");
                return Ok(());
            }
            Ok(report) => {
                tracing::warn!(attempts, status = %report.status_text, "backing service not ready");
            }
            Err(err) => {
                tracing::warn!(attempts, %err, "backing service not ready");
            }
        }
        let Some(delay) = policy.next_backoff() else {
            return GaveUpSnafu { attempts }.fail();
        };
        if !cancel.sleep(delay).await {
            return ProbeCancelledSnafu.fail();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::retry::FixedInterval;
    use std::collections::VecDeque;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };
    use std::time::Duration;

    /// Replays scripted responses, then keeps answering with the last one.
    pub(crate) struct ScriptedStatus {
        script: Mutex<VecDeque<Option<&'static str>>>,
        last: Option<&'static str>,
        pub probes: AtomicUsize,
    }

    impl ScriptedStatus {
        /// `None` entries are transport failures.
        pub(crate) fn new(script: &[Option<&'static str>]) -> Self {
            Self {
                script: Mutex::new(script.iter().copied().collect()),
                last: script.last().copied().flatten(),
                probes: AtomicUsize::new(0),
            }
        }

        pub(crate) fn always_ready() -> Self {
            Self::new(&[Some(READY_STATUS)])
        }

        pub(crate) fn probes(&self) -> usize {
            self.probes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedStatus {
        async fn status(&self) -> Result<StatusReport, PxeError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front().unwrap_or(self.last);
            match next {
                Some(text) => Ok(StatusReport {
                    status_text: text.to_string(),
                }),
                None => Err(PxeError::Http {
                    url: "http://localhost:8080/status".into(),
                    reason: "connection refused".into(),
                }),
            }
        }
    }

    fn fast() -> FixedInterval {
        FixedInterval::new(Duration::from_millis(5))
    }

    #[async_std::test]
    async fn ready_after_two_transport_failures() {
        let source = ScriptedStatus::new(&[None, None, Some("OK")]);
        wait_until_ready(&source, &mut fast(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(source.probes(), 3);
    }

    #[async_std::test]
    async fn other_status_text_is_not_ready() {
        let source = ScriptedStatus::new(&[
            Some("Service Unavailable"),
            Some("ok"),
            Some("OK "),
            Some("OK"),
        ]);
        wait_until_ready(&source, &mut fast(), &CancelToken::new())
            .await
            .unwrap();
        assert_eq!(source.probes(), 4);
    }

    #[async_std::test]
    async fn bounded_policy_gives_up() {
        let source = ScriptedStatus::new(&[None]);
        let mut policy = fast().with_max_retries(2);
        let err = wait_until_ready(&source, &mut policy, &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ReadinessError::GaveUp { attempts: 3 }));
        assert_eq!(source.probes(), 3);
    }

    #[async_std::test]
    async fn cancellation_interrupts_the_pause() {
        let source = ScriptedStatus::new(&[None]);
        let cancel = CancelToken::new();
        let canceller = cancel.clone();
        async_std::task::spawn(async move {
            async_std::task::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });
        let mut slow = FixedInterval::new(Duration::from_secs(60));
        let err = wait_until_ready(&source, &mut slow, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ReadinessError::ProbeCancelled));
        assert_eq!(source.probes(), 1);
    }
}
