//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 하네스는 이 상수를 사용하여 `metrics::counter!()`, `metrics::histogram!()`
//! 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `converge_`
//! - 접미어: `_total` (counter), `_seconds` (histogram)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(converge_core::metrics::PROBE_ATTEMPTS_TOTAL, "stage" => "root-policy").increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 폴링 대상 레이블 키 (precondition, session, 검증 단계 이름 등)
pub const LABEL_STAGE: &str = "stage";

/// 결과 레이블 키 (success, deadline_exceeded, fatal, cancelled)
pub const LABEL_RESULT: &str = "result";

// ─── 폴러 메트릭 ───────────────────────────────────────────────────

/// Poller: 프로브 호출 수 (counter, label: stage)
pub const PROBE_ATTEMPTS_TOTAL: &str = "converge_probe_attempts_total";

/// Poller: 폴링 종료 수 (counter, labels: stage, result)
pub const POLLS_COMPLETED_TOTAL: &str = "converge_polls_completed_total";

/// Poller: 수렴까지 걸린 시간 (histogram, 초, label: stage)
pub const POLL_DURATION_SECONDS: &str = "converge_poll_duration_seconds";

// ─── 시나리오 메트릭 ───────────────────────────────────────────────

/// Scenario: 실행 수 (counter, label: result)
pub const SCENARIO_RUNS_TOTAL: &str = "converge_scenario_runs_total";

/// Scenario: 전체 소요 시간 (histogram, 초)
pub const SCENARIO_DURATION_SECONDS: &str = "converge_scenario_duration_seconds";

/// Scenario: 정리 단계 실패 수 (counter)
pub const CLEANUP_FAILURES_TOTAL: &str = "converge_cleanup_failures_total";

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_histogram};

    describe_counter!(
        PROBE_ATTEMPTS_TOTAL,
        "Total number of probe invocations per polling stage"
    );
    describe_counter!(
        POLLS_COMPLETED_TOTAL,
        "Completed polls per stage and terminal result"
    );
    describe_histogram!(
        POLL_DURATION_SECONDS,
        "Time from first probe to terminal result in seconds"
    );
    describe_counter!(SCENARIO_RUNS_TOTAL, "Scenario runs per terminal result");
    describe_histogram!(
        SCENARIO_DURATION_SECONDS,
        "End-to-end scenario duration including cleanup in seconds"
    );
    describe_counter!(
        CLEANUP_FAILURES_TOTAL,
        "Number of scenario cleanups that did not complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_share_prefix() {
        for name in [
            PROBE_ATTEMPTS_TOTAL,
            POLLS_COMPLETED_TOTAL,
            POLL_DURATION_SECONDS,
            SCENARIO_RUNS_TOTAL,
            SCENARIO_DURATION_SECONDS,
            CLEANUP_FAILURES_TOTAL,
        ] {
            assert!(name.starts_with("converge_"), "{name} missing prefix");
        }
    }

    #[test]
    fn describe_all_without_recorder_is_noop() {
        describe_all();
    }
}
