//! 시나리오 설정
//!
//! [`ScenarioConfig`]는 core의 [`ConvergeConfig`]를 기반으로 오케스트레이터가
//! 사용하는 타입화된 설정(기간, [`PollPolicy`], 검증 단계 목록)을 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use converge_core::config::ConvergeConfig;
//! use converge_harness::config::ScenarioConfig;
//!
//! let core_config = ConvergeConfig::default();
//! let config = ScenarioConfig::from_core(&core_config)?;
//! ```

use std::path::PathBuf;

use converge_core::config::{ConvergeConfig, VerifyStageConfig};
use converge_core::types::ResourceRef;

use crate::error::HarnessError;
use crate::poller::PollPolicy;
use crate::principal::{Grant, Principal};
use crate::shape::ShapeAssertion;

/// 스코프 이름 자리표시자
pub const SCOPE_PLACEHOLDER: &str = "{scope}";

/// 검증 단계: 찾을 객체, 폴링 정책, 구조 조건
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyStage {
    /// 단계 이름
    pub name: String,
    /// 조회 대상
    pub target: ResourceRef,
    /// 폴링 정책
    pub policy: PollPolicy,
    /// 객체를 찾은 뒤 확인할 구조 조건
    pub shape: Vec<ShapeAssertion>,
}

impl VerifyStage {
    /// core 설정 항목에서 단계를 만듭니다. 자리표시자는 치환하지 않습니다.
    fn from_core(config: &VerifyStageConfig, default_interval_secs: u64) -> Self {
        let target = if config.namespace.is_empty() {
            ResourceRef::cluster(config.resource.clone(), config.object_name.clone())
        } else {
            ResourceRef::namespaced(
                config.resource.clone(),
                config.namespace.clone(),
                config.object_name.clone(),
            )
        };
        Self {
            name: config.name.clone(),
            target,
            policy: PollPolicy::from_secs(
                config.timeout_secs,
                config.interval_secs.unwrap_or(default_interval_secs),
            ),
            shape: config.shape.iter().map(ShapeAssertion::from).collect(),
        }
    }

    fn expand_scope(mut self, scope: &str) -> Self {
        if let Some(ns) = self.target.namespace.as_mut() {
            *ns = ns.replace(SCOPE_PLACEHOLDER, scope);
        }
        self.target.name = self.target.name.replace(SCOPE_PLACEHOLDER, scope);
        self
    }
}

/// 오케스트레이터 설정
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// 시나리오 전용 스코프
    pub scope: String,
    /// 자격 증명 시크릿 이름
    pub secret_name: String,
    /// 임시 사용자 이름
    pub username: String,
    /// 사전에 존재해야 하며 사용자가 합류할 바인딩
    pub required_grant: String,
    /// 전용 바인딩으로 부여할 클러스터 역할
    pub cluster_roles: Vec<String>,
    /// 트리거 매니페스트 경로
    pub manifest_path: PathBuf,
    /// 비밀번호 최소 바이트 수
    pub password_min_bytes: usize,
    /// 비밀번호 최대 바이트 수
    pub password_max_bytes: usize,
    /// 사전 조건 대기 정책
    pub precondition: PollPolicy,
    /// 세션 발급 재시도 정책
    pub session: PollPolicy,
    /// 스코프 삭제 확인 정책
    pub cleanup: PollPolicy,
    /// 순서대로 실행할 검증 단계 (자리표시자 치환 완료)
    pub verify: Vec<VerifyStage>,
}

impl ScenarioConfig {
    /// core 설정에서 시나리오 설정을 생성합니다.
    pub fn from_core(core: &ConvergeConfig) -> Result<Self, HarnessError> {
        let scenario = &core.scenario;
        let polling = &core.polling;
        if scenario.verify.is_empty() {
            return Err(config_error("verify", "at least one verify stage is required"));
        }

        let mut builder = ScenarioConfigBuilder::new()
            .scope(scenario.scope.clone())
            .secret_name(scenario.secret_name.clone())
            .username(scenario.username.clone())
            .required_grant(scenario.required_grant.clone())
            .cluster_roles(scenario.cluster_roles.clone())
            .manifest_path(scenario.manifest_path.clone())
            .password_bytes(scenario.password_min_bytes, scenario.password_max_bytes)
            .precondition(PollPolicy::from_secs(
                polling.precondition_timeout_secs,
                polling.precondition_interval_secs,
            ))
            .session(PollPolicy::from_secs(
                polling.session_timeout_secs,
                polling.session_interval_secs,
            ))
            .cleanup(PollPolicy::from_secs(
                polling.cleanup_timeout_secs,
                polling.cleanup_interval_secs,
            ));

        for stage in &scenario.verify {
            builder = builder.verify_stage(VerifyStage::from_core(stage, polling.verify_interval_secs));
        }

        builder.build()
    }

    /// 이 설정으로 임시 주체를 만듭니다 (비밀번호 미설정).
    ///
    /// 역할별 전용 바인딩을 먼저, 필수 바인딩 합류를 마지막에 둡니다.
    pub fn principal(&self) -> Principal {
        let principal = self
            .cluster_roles
            .iter()
            .fold(
                Principal::new(&self.username, &self.scope, &self.secret_name),
                |p, role| p.with_grant(Grant::Role { role: role.clone() }),
            );
        principal.with_grant(Grant::Membership {
            binding: self.required_grant.clone(),
        })
    }

    /// 사전 조건으로 기다릴 바인딩 참조
    pub fn required_grant_ref(&self) -> ResourceRef {
        ResourceRef::cluster_role_binding(self.required_grant.clone())
    }

    /// 설정 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), HarnessError> {
        for (field, value) in [
            ("scope", &self.scope),
            ("secret_name", &self.secret_name),
            ("username", &self.username),
            ("required_grant", &self.required_grant),
        ] {
            if value.trim().is_empty() {
                return Err(config_error(field, "must not be empty"));
            }
        }
        if self.manifest_path.as_os_str().is_empty() {
            return Err(config_error("manifest_path", "must not be empty"));
        }
        if self.password_min_bytes == 0 || self.password_max_bytes < self.password_min_bytes {
            return Err(config_error(
                "password_bytes",
                format!(
                    "invalid range {}..={}",
                    self.password_min_bytes, self.password_max_bytes
                ),
            ));
        }

        self.precondition.validate("precondition")?;
        self.session.validate("session")?;
        self.cleanup.validate("cleanup")?;

        if self.verify.is_empty() {
            return Err(config_error("verify", "at least one verify stage is required"));
        }
        for stage in &self.verify {
            stage.policy.validate(&format!("verify.{}", stage.name))?;
        }
        Ok(())
    }
}

/// [`ScenarioConfig`] 빌더
///
/// 지정하지 않은 값은 `ConvergeConfig::default()`에서 가져옵니다.
/// 검증 단계를 하나라도 추가하면 기본 단계 목록을 대체합니다.
pub struct ScenarioConfigBuilder {
    config: ScenarioConfig,
    custom_stages: bool,
}

impl ScenarioConfigBuilder {
    /// 기본값으로 빌더를 생성합니다.
    pub fn new() -> Self {
        let core = ConvergeConfig::default();
        let scenario = core.scenario;
        let polling = core.polling;
        Self {
            config: ScenarioConfig {
                scope: scenario.scope,
                secret_name: scenario.secret_name,
                username: scenario.username,
                required_grant: scenario.required_grant,
                cluster_roles: scenario.cluster_roles,
                manifest_path: PathBuf::from(scenario.manifest_path),
                password_min_bytes: scenario.password_min_bytes,
                password_max_bytes: scenario.password_max_bytes,
                precondition: PollPolicy::from_secs(
                    polling.precondition_timeout_secs,
                    polling.precondition_interval_secs,
                ),
                session: PollPolicy::from_secs(
                    polling.session_timeout_secs,
                    polling.session_interval_secs,
                ),
                cleanup: PollPolicy::from_secs(
                    polling.cleanup_timeout_secs,
                    polling.cleanup_interval_secs,
                ),
                verify: scenario
                    .verify
                    .iter()
                    .map(|s| VerifyStage::from_core(s, polling.verify_interval_secs))
                    .collect(),
            },
            custom_stages: false,
        }
    }

    /// 스코프 이름
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.config.scope = scope.into();
        self
    }

    /// 자격 증명 시크릿 이름
    pub fn secret_name(mut self, name: impl Into<String>) -> Self {
        self.config.secret_name = name.into();
        self
    }

    /// 임시 사용자 이름
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.config.username = username.into();
        self
    }

    /// 필수 바인딩 이름
    pub fn required_grant(mut self, grant: impl Into<String>) -> Self {
        self.config.required_grant = grant.into();
        self
    }

    /// 전용 바인딩으로 부여할 클러스터 역할
    pub fn cluster_roles(mut self, roles: Vec<String>) -> Self {
        self.config.cluster_roles = roles;
        self
    }

    /// 트리거 매니페스트 경로
    pub fn manifest_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.manifest_path = path.into();
        self
    }

    /// 비밀번호 바이트 범위
    pub fn password_bytes(mut self, min: usize, max: usize) -> Self {
        self.config.password_min_bytes = min;
        self.config.password_max_bytes = max;
        self
    }

    /// 사전 조건 대기 정책
    pub fn precondition(mut self, policy: PollPolicy) -> Self {
        self.config.precondition = policy;
        self
    }

    /// 세션 발급 재시도 정책
    pub fn session(mut self, policy: PollPolicy) -> Self {
        self.config.session = policy;
        self
    }

    /// 스코프 삭제 확인 정책
    pub fn cleanup(mut self, policy: PollPolicy) -> Self {
        self.config.cleanup = policy;
        self
    }

    /// 검증 단계를 추가합니다.
    pub fn verify_stage(mut self, stage: VerifyStage) -> Self {
        if !self.custom_stages {
            self.config.verify.clear();
            self.custom_stages = true;
        }
        self.config.verify.push(stage);
        self
    }

    /// 자리표시자를 치환하고 검증한 뒤 설정을 반환합니다.
    pub fn build(self) -> Result<ScenarioConfig, HarnessError> {
        let mut config = self.config;
        let scope = config.scope.clone();
        config.verify = config
            .verify
            .into_iter()
            .map(|stage| stage.expand_scope(&scope))
            .collect();
        config.validate()?;
        Ok(config)
    }
}

impl Default for ScenarioConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn config_error(field: &str, reason: impl Into<String>) -> HarnessError {
    HarnessError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}
