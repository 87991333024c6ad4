//! 설정 관리 — converge.toml 파싱 및 런타임 설정
//!
//! [`ConvergeConfig`]는 하네스 실행에 필요한 모든 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`CONVERGE_SCENARIO_SCOPE=my-scope` 형식)
//! 3. 설정 파일 (`converge.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), converge_core::error::ConvergeError> {
//! use converge_core::config::ConvergeConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = ConvergeConfig::load("converge.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = ConvergeConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, ConvergeError};

/// 비밀번호 바이트 길이 상한
const MAX_PASSWORD_BYTES: usize = 256;

/// Converge 통합 설정
///
/// `converge.toml` 파일의 최상위 구조를 나타냅니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvergeConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 컨트롤 플레인 접속 설정
    #[serde(default)]
    pub control_plane: ControlPlaneConfig,
    /// 시나리오 설정
    #[serde(default)]
    pub scenario: ScenarioSection,
    /// 단계별 폴링 정책
    #[serde(default)]
    pub polling: PollingConfig,
    /// 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl ConvergeConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConvergeError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConvergeError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConvergeError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                ConvergeError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, ConvergeError> {
        toml::from_str(toml_str).map_err(|e| {
            ConvergeError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `CONVERGE_{SECTION}_{FIELD}`
    /// 예: `CONVERGE_SCENARIO_SCOPE=grc-e2e-policy-generator`
    ///
    /// `[[scenario.verify]]` 단계 목록은 파일에서만 설정할 수 있습니다.
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "CONVERGE_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "CONVERGE_GENERAL_LOG_FORMAT");

        // Control plane
        override_string(
            &mut self.control_plane.cli_binary,
            "CONVERGE_CONTROL_PLANE_CLI_BINARY",
        );
        override_string(
            &mut self.control_plane.kubeconfig,
            "CONVERGE_CONTROL_PLANE_KUBECONFIG",
        );
        override_string(
            &mut self.control_plane.server_url,
            "CONVERGE_CONTROL_PLANE_SERVER_URL",
        );
        override_u64(
            &mut self.control_plane.command_timeout_secs,
            "CONVERGE_CONTROL_PLANE_COMMAND_TIMEOUT_SECS",
        );
        override_bool(
            &mut self.control_plane.insecure_skip_tls_verify,
            "CONVERGE_CONTROL_PLANE_INSECURE_SKIP_TLS_VERIFY",
        );

        // Scenario
        override_string(&mut self.scenario.scope, "CONVERGE_SCENARIO_SCOPE");
        override_string(&mut self.scenario.secret_name, "CONVERGE_SCENARIO_SECRET_NAME");
        override_string(&mut self.scenario.username, "CONVERGE_SCENARIO_USERNAME");
        override_string(
            &mut self.scenario.required_grant,
            "CONVERGE_SCENARIO_REQUIRED_GRANT",
        );
        override_csv(
            &mut self.scenario.cluster_roles,
            "CONVERGE_SCENARIO_CLUSTER_ROLES",
        );
        override_string(
            &mut self.scenario.manifest_path,
            "CONVERGE_SCENARIO_MANIFEST_PATH",
        );
        override_usize(
            &mut self.scenario.password_min_bytes,
            "CONVERGE_SCENARIO_PASSWORD_MIN_BYTES",
        );
        override_usize(
            &mut self.scenario.password_max_bytes,
            "CONVERGE_SCENARIO_PASSWORD_MAX_BYTES",
        );

        // Polling
        override_u64(
            &mut self.polling.precondition_timeout_secs,
            "CONVERGE_POLLING_PRECONDITION_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.polling.precondition_interval_secs,
            "CONVERGE_POLLING_PRECONDITION_INTERVAL_SECS",
        );
        override_u64(
            &mut self.polling.session_timeout_secs,
            "CONVERGE_POLLING_SESSION_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.polling.session_interval_secs,
            "CONVERGE_POLLING_SESSION_INTERVAL_SECS",
        );
        override_u64(
            &mut self.polling.cleanup_timeout_secs,
            "CONVERGE_POLLING_CLEANUP_TIMEOUT_SECS",
        );
        override_u64(
            &mut self.polling.cleanup_interval_secs,
            "CONVERGE_POLLING_CLEANUP_INTERVAL_SECS",
        );
        override_u64(
            &mut self.polling.verify_interval_secs,
            "CONVERGE_POLLING_VERIFY_INTERVAL_SECS",
        );

        // Metrics
        override_bool(&mut self.metrics.enabled, "CONVERGE_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "CONVERGE_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "CONVERGE_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ConvergeError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.control_plane.cli_binary.is_empty() {
            return Err(invalid("control_plane.cli_binary", "must not be empty"));
        }
        if self.control_plane.command_timeout_secs == 0 {
            return Err(invalid(
                "control_plane.command_timeout_secs",
                "must be greater than 0",
            ));
        }

        self.scenario.validate()?;
        self.polling.validate()?;

        for (idx, stage) in self.scenario.verify.iter().enumerate() {
            let interval = stage
                .interval_secs
                .unwrap_or(self.polling.verify_interval_secs);
            validate_window(
                &format!("scenario.verify[{idx}]"),
                stage.timeout_secs,
                interval,
            )?;
        }

        if self.metrics.enabled && self.metrics.listen_addr.is_empty() {
            return Err(invalid(
                "metrics.listen_addr",
                "must not be empty when metrics are enabled",
            ));
        }

        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "pretty".to_owned(),
        }
    }
}

/// 컨트롤 플레인 접속 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlPlaneConfig {
    /// 리소스 조작에 사용할 CLI 바이너리 (oc, kubectl)
    pub cli_binary: String,
    /// 관리자 kubeconfig 경로 (비어 있으면 CLI 기본값 사용)
    pub kubeconfig: String,
    /// API 서버 URL (비어 있으면 현재 컨텍스트에서 조회)
    pub server_url: String,
    /// CLI 호출 1회당 타임아웃 (초)
    pub command_timeout_secs: u64,
    /// 세션 로그인 시 TLS 검증 생략 여부
    pub insecure_skip_tls_verify: bool,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            cli_binary: "oc".to_owned(),
            kubeconfig: String::new(),
            server_url: String::new(),
            command_timeout_secs: 30,
            insecure_skip_tls_verify: true,
        }
    }
}

/// 시나리오 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioSection {
    /// 시나리오 전용 스코프(네임스페이스) 이름
    pub scope: String,
    /// 자격 증명 시크릿 이름
    pub secret_name: String,
    /// 임시 사용자 이름
    pub username: String,
    /// 사전에 존재해야 하며 사용자가 합류할 바인딩 이름
    pub required_grant: String,
    /// 전용 바인딩으로 부여할 클러스터 역할 목록
    pub cluster_roles: Vec<String>,
    /// 트리거 매니페스트 경로
    pub manifest_path: String,
    /// 비밀번호 최소 바이트 수
    pub password_min_bytes: usize,
    /// 비밀번호 최대 바이트 수
    pub password_max_bytes: usize,
    /// 순서대로 실행되는 검증 단계
    pub verify: Vec<VerifyStageConfig>,
}

impl Default for ScenarioSection {
    fn default() -> Self {
        Self {
            scope: "grc-e2e-policy-generator".to_owned(),
            secret_name: "grc-e2e-subscription-admin-user".to_owned(),
            username: "grc-e2e-subscription-admin".to_owned(),
            required_grant: "open-cluster-management:subscription-admin".to_owned(),
            cluster_roles: vec!["open-cluster-management:admin:local-cluster".to_owned()],
            manifest_path: "resources/policy_generator/subscription.yaml".to_owned(),
            password_min_bytes: 15,
            password_max_bytes: 30,
            verify: default_verify_stages(),
        }
    }
}

impl ScenarioSection {
    fn validate(&self) -> Result<(), ConvergeError> {
        for (field, value) in [
            ("scenario.scope", &self.scope),
            ("scenario.secret_name", &self.secret_name),
            ("scenario.username", &self.username),
            ("scenario.required_grant", &self.required_grant),
            ("scenario.manifest_path", &self.manifest_path),
        ] {
            if value.trim().is_empty() {
                return Err(invalid(field, "must not be empty"));
            }
        }

        if self.password_min_bytes == 0 || self.password_min_bytes > MAX_PASSWORD_BYTES {
            return Err(invalid(
                "scenario.password_min_bytes",
                format!("must be 1-{MAX_PASSWORD_BYTES}"),
            ));
        }
        if self.password_max_bytes < self.password_min_bytes
            || self.password_max_bytes > MAX_PASSWORD_BYTES
        {
            return Err(invalid(
                "scenario.password_max_bytes",
                format!("must be {}-{MAX_PASSWORD_BYTES}", self.password_min_bytes),
            ));
        }

        if self.verify.is_empty() {
            return Err(invalid(
                "scenario.verify",
                "at least one verify stage is required",
            ));
        }

        let mut names = HashSet::new();
        for (idx, stage) in self.verify.iter().enumerate() {
            if stage.name.is_empty() || stage.resource.is_empty() || stage.object_name.is_empty() {
                return Err(invalid(
                    &format!("scenario.verify[{idx}]"),
                    "name, resource and object_name must not be empty",
                ));
            }
            if !names.insert(stage.name.as_str()) {
                return Err(invalid(
                    &format!("scenario.verify[{idx}].name"),
                    format!("duplicate stage name '{}'", stage.name),
                ));
            }
            if stage.shape.iter().any(|s| s.path.is_empty()) {
                return Err(invalid(
                    &format!("scenario.verify[{idx}].shape"),
                    "shape path must not be empty",
                ));
            }
        }

        Ok(())
    }
}

/// 검증 단계 설정
///
/// `namespace`와 `object_name`에는 `{scope}` 자리표시자를 사용할 수 있습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyStageConfig {
    /// 단계 이름 (로그, 리포트용)
    pub name: String,
    /// API 리소스 이름 (예: policies.policy.open-cluster-management.io)
    pub resource: String,
    /// 대상 네임스페이스 (비어 있으면 클러스터 범위)
    #[serde(default)]
    pub namespace: String,
    /// 대상 객체 이름
    pub object_name: String,
    /// 단계 마감 시간 (초)
    pub timeout_secs: u64,
    /// 폴링 간격 (초), 생략 시 `polling.verify_interval_secs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,
    /// 객체를 찾은 뒤 확인할 구조 조건
    #[serde(default)]
    pub shape: Vec<ShapeConfig>,
}

/// 구조 조건: `path` 끝의 값이 정확히 `count`개 원소를 가진 배열이어야 합니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShapeConfig {
    /// JSON 경로 (숫자 세그먼트는 배열 인덱스)
    pub path: Vec<String>,
    /// 기대 원소 수
    pub count: usize,
}

const POLICY_RESOURCE: &str = "policies.policy.open-cluster-management.io";
const CONFIG_POLICY_RESOURCE: &str = "configurationpolicies.policy.open-cluster-management.io";
const ROOT_POLICY_NAME: &str = "e2e-grc-policy-app";

fn default_verify_stages() -> Vec<VerifyStageConfig> {
    let path = |segments: &[&str]| segments.iter().map(|s| (*s).to_owned()).collect();
    vec![
        VerifyStageConfig {
            name: "root-policy".to_owned(),
            resource: POLICY_RESOURCE.to_owned(),
            namespace: "{scope}".to_owned(),
            object_name: ROOT_POLICY_NAME.to_owned(),
            timeout_secs: 120,
            interval_secs: None,
            shape: vec![
                ShapeConfig {
                    path: path(&["spec", "policy-templates"]),
                    count: 1,
                },
                ShapeConfig {
                    path: path(&[
                        "spec",
                        "policy-templates",
                        "0",
                        "objectDefinition",
                        "spec",
                        "object-templates",
                    ]),
                    count: 3,
                },
            ],
        },
        VerifyStageConfig {
            name: "replicated-policy".to_owned(),
            resource: POLICY_RESOURCE.to_owned(),
            namespace: "local-cluster".to_owned(),
            object_name: format!("{{scope}}.{ROOT_POLICY_NAME}"),
            timeout_secs: 60,
            interval_secs: None,
            shape: Vec::new(),
        },
        VerifyStageConfig {
            name: "configuration-policy".to_owned(),
            resource: CONFIG_POLICY_RESOURCE.to_owned(),
            namespace: "local-cluster".to_owned(),
            object_name: ROOT_POLICY_NAME.to_owned(),
            timeout_secs: 60,
            interval_secs: None,
            shape: Vec::new(),
        },
    ]
}

/// 단계별 폴링 정책 설정 (초 단위)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// 사전 조건 대기 마감
    pub precondition_timeout_secs: u64,
    /// 사전 조건 폴링 간격
    pub precondition_interval_secs: u64,
    /// 세션 발급 대기 마감
    pub session_timeout_secs: u64,
    /// 세션 발급 재시도 간격
    pub session_interval_secs: u64,
    /// 스코프 삭제 확인 마감
    pub cleanup_timeout_secs: u64,
    /// 스코프 삭제 확인 간격
    pub cleanup_interval_secs: u64,
    /// 검증 단계 기본 폴링 간격
    pub verify_interval_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            precondition_timeout_secs: 300,
            precondition_interval_secs: 5,
            session_timeout_secs: 300,
            session_interval_secs: 1,
            cleanup_timeout_secs: 120,
            cleanup_interval_secs: 1,
            verify_interval_secs: 1,
        }
    }
}

impl PollingConfig {
    fn validate(&self) -> Result<(), ConvergeError> {
        validate_window(
            "polling.precondition",
            self.precondition_timeout_secs,
            self.precondition_interval_secs,
        )?;
        validate_window(
            "polling.session",
            self.session_timeout_secs,
            self.session_interval_secs,
        )?;
        validate_window(
            "polling.cleanup",
            self.cleanup_timeout_secs,
            self.cleanup_interval_secs,
        )?;
        if self.verify_interval_secs == 0 {
            return Err(invalid(
                "polling.verify_interval_secs",
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

/// 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 수신 주소
    pub listen_addr: String,
    /// 수신 포트
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9464,
        }
    }
}

/// 마감/간격 쌍을 검증합니다: interval > 0, timeout >= interval
fn validate_window(
    prefix: &str,
    timeout_secs: u64,
    interval_secs: u64,
) -> Result<(), ConvergeError> {
    if interval_secs == 0 {
        return Err(invalid(
            &format!("{prefix}.interval_secs"),
            "must be greater than 0",
        ));
    }
    if timeout_secs < interval_secs {
        return Err(invalid(
            &format!("{prefix}.timeout_secs"),
            format!("must be at least the interval ({interval_secs}s)"),
        ));
    }
    Ok(())
}

fn invalid(field: &str, reason: impl Into<String>) -> ConvergeError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
