//! 하네스 에러 타입
//!
//! [`HarnessError`]는 하네스 내부에서 발생하는 모든 에러를 표현합니다.
//! [`HarnessError::kind_name`]은 메트릭의 `result` 레이블로 사용됩니다.

use std::time::Duration;

/// 하네스 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// 난수 소스가 바이트를 공급하지 못함
    #[error("entropy source error: {0}")]
    EntropySource(String),

    /// 스코프가 이미 존재하며 정리할 수 없음
    #[error("provision conflict in scope '{scope}': {reason}")]
    ProvisionConflict {
        /// 대상 스코프
        scope: String,
        /// 정리 실패 사유
        reason: String,
    },

    /// 삭제 요청 자체가 실패함 (not-found 제외)
    #[error("deprovision of '{resource}' failed: {reason}")]
    Deprovision {
        /// 삭제 대상 리소스
        resource: String,
        /// 실패 사유
        reason: String,
    },

    /// 삭제 요청은 수락되었으나 마감 안에 완료가 관측되지 않음
    #[error("deletion of scope '{scope}' not confirmed within {deadline:?}")]
    ConfirmationTimeout {
        /// 대상 스코프
        scope: String,
        /// 확인 마감
        deadline: Duration,
    },

    /// 수렴 단계가 마감 안에 성공하지 못함
    #[error(
        "'{label}' did not converge within {deadline:?} after {attempts} attempt(s){}",
        last_error_suffix(.last_error)
    )]
    DeadlineExceeded {
        /// 폴링 대상 이름
        label: String,
        /// 마감
        deadline: Duration,
        /// 프로브 호출 횟수
        attempts: u32,
        /// 마지막으로 관측된 프로브 에러
        last_error: Option<Box<HarnessError>>,
    },

    /// 객체를 찾았으나 구조가 기대와 다름
    #[error("shape assertion failed on '{object}' at '{path}': {reason}")]
    ShapeAssertion {
        /// 검사한 객체
        object: String,
        /// JSON 경로 (점 구분)
        path: String,
        /// 불일치 내용
        reason: String,
    },

    /// 리소스가 존재하지 않음
    #[error("not found: {0}")]
    NotFound(String),

    /// 리소스가 이미 존재함
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// 컨트롤 플레인 호출 실패
    #[error("control plane error: {0}")]
    ControlPlane(String),

    /// 세션 교환 실패
    #[error("session exchange error: {0}")]
    Session(String),

    /// 프로브가 아직 기대 상태를 관측하지 못함
    #[error("not converged: {0}")]
    NotConverged(String),

    /// 외부 취소 신호
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// 매니페스트 로딩 실패
    #[error("manifest error: {path}: {reason}")]
    Manifest {
        /// 매니페스트 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 허용되지 않는 상태 전이
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// 본 실패 이후 정리 단계도 실패함
    #[error("{primary} (cleanup also failed: {})", join_errors(.cleanup))]
    CleanupFailed {
        /// 먼저 발생한 에러
        primary: Box<HarnessError>,
        /// 정리 중 발생한 에러 목록
        cleanup: Vec<HarnessError>,
    },
}

impl HarnessError {
    /// not-found 계열 에러인지 확인합니다.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// 메트릭/리포트 레이블용 고정된 에러 분류명을 반환합니다.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::EntropySource(_) => "entropy_source",
            Self::ProvisionConflict { .. } => "provision_conflict",
            Self::Deprovision { .. } => "deprovision",
            Self::ConfirmationTimeout { .. } => "confirmation_timeout",
            Self::DeadlineExceeded { .. } => "deadline_exceeded",
            Self::ShapeAssertion { .. } => "shape_assertion",
            Self::NotFound(_) => "not_found",
            Self::AlreadyExists(_) => "already_exists",
            Self::ControlPlane(_) => "control_plane",
            Self::Session(_) => "session",
            Self::NotConverged(_) => "not_converged",
            Self::Cancelled(_) => "cancelled",
            Self::Manifest { .. } => "manifest",
            Self::Config { .. } => "config",
            Self::InvalidState(_) => "invalid_state",
            Self::CleanupFailed { .. } => "cleanup_failed",
        }
    }
}

fn last_error_suffix(last_error: &Option<Box<HarnessError>>) -> String {
    match last_error {
        Some(e) => format!(" (last error: {e})"),
        None => String::new(),
    }
}

fn join_errors(errors: &[HarnessError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
