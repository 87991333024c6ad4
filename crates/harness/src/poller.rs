//! 수렴 폴러 -- 마감이 있는 재시도 평가기
//!
//! [`ConvergencePoller`]는 주어진 [`Probe`]를 성공, 치명적 에러, 마감 중
//! 먼저 오는 조건까지 `interval` 간격으로 반복 호출합니다.
//!
//! # 동작 규칙
//!
//! - 첫 프로브는 즉시 호출됩니다 (한 간격을 기다리지 않음).
//! - [`ProbeError::Transient`]는 "아직 아님"으로 보고 재시도합니다.
//! - [`ProbeError::Fatal`]은 즉시 반환합니다.
//! - 마지막 대기는 남은 시간만큼만 자고 마감 시점에 한 번 더 확인하므로
//!   최악의 경우에도 `deadline + interval` 안에 반환합니다.
//! - 취소 토큰이 취소되면 진행 중인 대기/프로브를 즉시 중단합니다.
//!
//! # 사용 예시
//!
//! ```ignore
//! let poller = ConvergencePoller::new(cancel.child_token());
//! let policy = PollPolicy::new(Duration::from_secs(300), Duration::from_secs(5));
//! let found = poller
//!     .poll("precondition", &policy, || async { client.get(&binding).await.map_err(ProbeError::from) })
//!     .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use converge_core::metrics as m;

use crate::error::HarnessError;

/// 0 간격 정책이 바쁜 루프가 되지 않도록 하는 최소 대기
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// 폴링 정책: 마감과 간격
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// 첫 프로브부터 측정한 마감 시간
    pub deadline: Duration,
    /// 프로브 호출 간격
    pub interval: Duration,
}

impl PollPolicy {
    /// 새 폴링 정책을 생성합니다.
    pub fn new(deadline: Duration, interval: Duration) -> Self {
        Self { deadline, interval }
    }

    /// 초 단위 값으로 정책을 생성합니다.
    pub fn from_secs(deadline_secs: u64, interval_secs: u64) -> Self {
        Self::new(
            Duration::from_secs(deadline_secs),
            Duration::from_secs(interval_secs),
        )
    }

    /// `interval > 0`, `deadline >= interval`을 확인합니다.
    pub fn validate(&self, label: &str) -> Result<(), HarnessError> {
        if self.interval.is_zero() {
            return Err(HarnessError::Config {
                field: format!("{label}.interval"),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if self.deadline < self.interval {
            return Err(HarnessError::Config {
                field: format!("{label}.deadline"),
                reason: format!("must be at least the interval ({:?})", self.interval),
            });
        }
        Ok(())
    }
}

/// 프로브 실패 분류
#[derive(Debug)]
pub enum ProbeError {
    /// 일시적 실패, 재시도
    Transient(HarnessError),
    /// 복구 불가능한 실패, 즉시 중단
    Fatal(HarnessError),
}

impl ProbeError {
    /// 치명적 실패로 표시합니다.
    pub fn fatal(err: HarnessError) -> Self {
        Self::Fatal(err)
    }
}

impl From<HarnessError> for ProbeError {
    fn from(err: HarnessError) -> Self {
        Self::Transient(err)
    }
}

/// 외부 상태를 관측하는 재시도 가능한 확인
///
/// 반복 호출해도 안전해야 합니다 (관측은 멱등, 변경은 멱등이 아니어도 됨).
/// `FnMut() -> impl Future<Output = Result<T, ProbeError>>` 클로저는 자동으로 구현합니다.
pub trait Probe: Send {
    /// 성공 시 반환하는 관측값
    type Output: Send;

    /// 한 번 확인합니다.
    fn check(&mut self) -> impl Future<Output = Result<Self::Output, ProbeError>> + Send;
}

impl<F, Fut, T> Probe for F
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, ProbeError>> + Send,
    T: Send,
{
    type Output = T;

    fn check(&mut self) -> impl Future<Output = Result<T, ProbeError>> + Send {
        self()
    }
}

/// 수렴 결과
#[derive(Debug, Clone)]
pub struct Converged<T> {
    /// 마지막 프로브가 반환한 값
    pub value: T,
    /// 프로브 호출 횟수
    pub attempts: u32,
    /// 첫 호출부터 성공까지 걸린 시간
    pub elapsed: Duration,
}

/// 수렴 폴러
///
/// 내부 상태는 취소 토큰뿐이므로 같은 폴러를 여러 단계에서 재사용할 수 있습니다.
/// 백그라운드 작업을 만들지 않고 호출한 태스크 안에서만 실행됩니다.
#[derive(Debug, Clone)]
pub struct ConvergencePoller {
    cancel: CancellationToken,
}

impl ConvergencePoller {
    /// 취소 토큰을 받아 폴러를 생성합니다.
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// 프로브가 성공할 때까지 폴링합니다.
    ///
    /// # Errors
    ///
    /// - `HarnessError::DeadlineExceeded`: 마감까지 성공하지 못함 (마지막 에러 포함)
    /// - `HarnessError::Cancelled`: 취소 토큰이 취소됨
    /// - 프로브가 `ProbeError::Fatal`로 반환한 에러
    pub async fn poll<P: Probe>(
        &self,
        label: &str,
        policy: &PollPolicy,
        mut probe: P,
    ) -> Result<Converged<P::Output>, HarnessError> {
        let start = Instant::now();
        let interval = policy.interval.max(MIN_INTERVAL);
        let mut attempts: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled(label, start, attempts));
            }

            attempts = attempts.saturating_add(1);
            metrics::counter!(m::PROBE_ATTEMPTS_TOTAL, m::LABEL_STAGE => label.to_owned())
                .increment(1);

            // 프로브 한 번이 남은 시간(최소 한 간격)을 넘지 않도록 제한
            let remaining = policy.deadline.saturating_sub(start.elapsed());
            let budget = remaining.max(interval);

            let outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return Err(self.cancelled(label, start, attempts));
                }
                res = tokio::time::timeout(budget, probe.check()) => res,
            };

            let last_error = match outcome {
                Ok(Ok(value)) => {
                    let elapsed = start.elapsed();
                    debug!(label, attempts, elapsed_ms = millis(elapsed), "converged");
                    record(label, "success", elapsed);
                    return Ok(Converged {
                        value,
                        attempts,
                        elapsed,
                    });
                }
                Ok(Err(ProbeError::Fatal(e))) => {
                    warn!(label, attempts, error = %e, "probe reported fatal error");
                    record(label, "fatal", start.elapsed());
                    return Err(e);
                }
                Ok(Err(ProbeError::Transient(e))) => {
                    debug!(label, attempts, error = %e, "not yet converged");
                    e
                }
                Err(_elapsed) => {
                    debug!(label, attempts, budget_ms = millis(budget), "probe timed out");
                    HarnessError::NotConverged(format!("probe did not answer within {budget:?}"))
                }
            };

            let elapsed = start.elapsed();
            if elapsed >= policy.deadline {
                warn!(
                    label,
                    attempts,
                    deadline_ms = millis(policy.deadline),
                    "deadline exceeded"
                );
                record(label, "deadline_exceeded", elapsed);
                return Err(HarnessError::DeadlineExceeded {
                    label: label.to_owned(),
                    deadline: policy.deadline,
                    attempts,
                    last_error: Some(Box::new(last_error)),
                });
            }

            let pause = interval.min(policy.deadline - elapsed);
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    return Err(self.cancelled(label, start, attempts));
                }
                () = tokio::time::sleep(pause) => {}
            }
        }
    }

    fn cancelled(&self, label: &str, start: Instant, attempts: u32) -> HarnessError {
        debug!(label, attempts, "poll cancelled");
        record(label, "cancelled", start.elapsed());
        HarnessError::Cancelled(format!("'{label}' after {attempts} attempt(s)"))
    }
}

fn record(label: &str, result: &'static str, elapsed: Duration) {
    metrics::counter!(
        m::POLLS_COMPLETED_TOTAL,
        m::LABEL_STAGE => label.to_owned(),
        m::LABEL_RESULT => result
    )
    .increment(1);
    metrics::histogram!(m::POLL_DURATION_SECONDS, m::LABEL_STAGE => label.to_owned())
        .record(elapsed.as_secs_f64());
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn poller() -> ConvergencePoller {
        ConvergencePoller::new(CancellationToken::new())
    }

    /// N번째 호출에서 성공하는 프로브
    fn succeed_on(
        n: u32,
        calls: Arc<AtomicU32>,
    ) -> impl FnMut() -> std::future::Ready<Result<u32, ProbeError>> + Send {
        move || {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= n {
                std::future::ready(Ok(call))
            } else {
                std::future::ready(Err(ProbeError::from(HarnessError::NotFound(format!(
                    "call {call}"
                )))))
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_probe_fires_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();
        let result = poller()
            .poll("now", &PollPolicy::from_secs(10, 5), succeed_on(1, calls.clone()))
            .await
            .unwrap();
        assert_eq!(result.attempts, 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_nth_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();
        let policy = PollPolicy::from_secs(60, 2);
        let result = poller()
            .poll("nth", &policy, succeed_on(5, calls.clone()))
            .await
            .unwrap();
        assert_eq!(result.value, 5);
        assert_eq!(result.attempts, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(start.elapsed(), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn never_succeeding_probe_hits_deadline_with_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();
        let policy = PollPolicy::from_secs(10, 3);
        let err = poller()
            .poll("never", &policy, succeed_on(u32::MAX, calls.clone()))
            .await
            .unwrap_err();

        let elapsed = start.elapsed();
        assert!(elapsed >= policy.deadline);
        assert!(elapsed <= policy.deadline + policy.interval);
        match err {
            HarnessError::DeadlineExceeded {
                attempts,
                last_error,
                ..
            } => {
                // t = 0, 3, 6, 9, 10
                assert_eq!(attempts, 5);
                assert!(matches!(last_error.as_deref(), Some(HarnessError::NotFound(_))));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_error_stops_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let probe = move || {
            let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if call == 2 {
                    Err::<(), _>(ProbeError::fatal(HarnessError::ShapeAssertion {
                        object: "root".to_owned(),
                        path: "spec".to_owned(),
                        reason: "missing".to_owned(),
                    }))
                } else {
                    Err(ProbeError::from(HarnessError::NotFound("root".to_owned())))
                }
            }
        };
        let err = poller()
            .poll("fatal", &PollPolicy::from_secs(60, 1), probe)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::ShapeAssertion { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_probe_is_bounded_by_deadline() {
        let start = Instant::now();
        let policy = PollPolicy::from_secs(10, 1);
        let err = poller()
            .poll("hang", &policy, || std::future::pending::<Result<(), ProbeError>>())
            .await
            .unwrap_err();
        assert!(start.elapsed() <= policy.deadline + policy.interval);
        match err {
            HarnessError::DeadlineExceeded { last_error, .. } => {
                assert!(matches!(
                    last_error.as_deref(),
                    Some(HarnessError::NotConverged(_))
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_still_probes() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = PollPolicy::new(Duration::from_millis(50), Duration::ZERO);
        let _ = poller()
            .poll("zero", &policy, succeed_on(u32::MAX, calls.clone()))
            .await;
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_returns_within_one_interval() {
        let cancel = CancellationToken::new();
        let poller = ConvergencePoller::new(cancel.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            trigger.cancel();
        });

        let policy = PollPolicy::from_secs(300, 5);
        let err = poller
            .poll("cancel", &policy, succeed_on(u32::MAX, calls.clone()))
            .await
            .unwrap_err();

        assert!(matches!(err, HarnessError::Cancelled(_)));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(12));
        assert!(elapsed < Duration::from_secs(12) + policy.interval);
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_token_skips_probe() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let calls = Arc::new(AtomicU32::new(0));
        let err = ConvergencePoller::new(cancel)
            .poll("pre", &PollPolicy::from_secs(10, 1), succeed_on(1, calls.clone()))
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Cancelled(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn policy_validation() {
        assert!(PollPolicy::from_secs(10, 1).validate("ok").is_ok());
        assert!(matches!(
            PollPolicy::from_secs(10, 0).validate("zero"),
            Err(HarnessError::Config { .. })
        ));
        let err = PollPolicy::from_secs(2, 5).validate("short").unwrap_err();
        assert!(err.to_string().contains("short.deadline"));
    }
}
