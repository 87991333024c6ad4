//! 시나리오 오케스트레이터 -- 전체 검증 흐름 관리
//!
//! [`ScenarioOrchestrator`]는 비밀번호 생성기, 주체 라이프사이클, 수렴 폴러를
//! 순서가 있는 워크플로로 조합합니다.
//!
//! # 상태 전이
//! ```text
//! Init ─> PreconditionWait ─> CleanPrior ─> Provision ─> AcquireSession
//!      ─> Trigger ─> Verify(0..n) ─> Cleanup ─> Done
//!
//! (어느 단계에서든 실패) ─────────────> Cleanup ─> Failed
//! ```
//!
//! 정리(Cleanup)는 `Init`을 지난 모든 실행에서 정확히 한 번 실행됩니다.
//! 정리 동작은 명시적인 스택에 쌓였다가 역순으로 실행되며, 본문과 별개의
//! 취소 토큰을 사용하므로 취소된 실행도 정리 마감 안에서 정리됩니다.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use converge_core::metrics as m;

use crate::client::ControlPlaneClient;
use crate::config::{ScenarioConfig, VerifyStage};
use crate::error::HarnessError;
use crate::poller::{Converged, ConvergencePoller, ProbeError};
use crate::principal::{Principal, PrincipalLifecycle};
use crate::secret::SecretGenerator;
use crate::session::{SessionArtifact, SessionExchange};

/// 주입 가능한 난수 소스
pub type EntropySource = Box<dyn RngCore + Send + Sync>;

/// 시나리오 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioState {
    /// 초기화됨
    Init,
    /// 외부 권한 객체 대기
    PreconditionWait,
    /// 이전 실행 잔여물 정리
    CleanPrior,
    /// 비밀번호 생성 및 주체 프로비저닝
    Provision,
    /// 세션 발급
    AcquireSession,
    /// 전파 트리거
    Trigger,
    /// n번째 검증 단계
    Verify(usize),
    /// 정리
    Cleanup,
    /// 성공 종료
    Done,
    /// 실패 종료
    Failed,
}

impl ScenarioState {
    /// 메트릭/로그용 고정된 상태명을 반환합니다.
    pub fn state_name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::PreconditionWait => "precondition_wait",
            Self::CleanPrior => "clean_prior",
            Self::Provision => "provision",
            Self::AcquireSession => "acquire_session",
            Self::Trigger => "trigger",
            Self::Verify(_) => "verify",
            Self::Cleanup => "cleanup",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Verify(n) => write!(f, "verify({n})"),
            other => f.write_str(other.state_name()),
        }
    }
}

/// 폴링 단계 하나의 결과
#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    /// 단계 이름
    pub name: String,
    /// 프로브 호출 횟수
    pub attempts: u32,
    /// 수렴까지 걸린 시간 (밀리초)
    pub elapsed_ms: u64,
}

/// 성공한 시나리오 실행 결과
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    /// 실행 ID
    pub run_id: String,
    /// 스코프
    pub scope: String,
    /// 폴링 단계별 결과
    pub stages: Vec<StageReport>,
    /// 거쳐 간 상태 목록
    pub transitions: Vec<String>,
    /// 정리 포함 전체 소요 시간 (밀리초)
    pub elapsed_ms: u64,
}

/// 정리 스택 항목
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    DeprovisionPrincipal,
    DiscardSession,
}

/// 한 번의 실행이 독점하는 컨텍스트
struct ScenarioContext {
    principal: Principal,
    session: Option<SessionArtifact>,
    teardown: Vec<Teardown>,
    stages: Vec<StageReport>,
}

/// 시나리오 오케스트레이터
///
/// 한 인스턴스는 한 번만 실행할 수 있습니다 ([`run`](Self::run)이 `self`를 소비).
/// 같은 스코프를 대상으로 하는 실행을 동시에 돌리지 않는 것은 호출자의 책임입니다.
///
/// # 사용 예시
/// ```ignore
/// let report = ScenarioOrchestratorBuilder::new()
///     .config(ScenarioConfig::from_core(&core)?)
///     .client(Arc::new(KubectlClient::new("oc", Duration::from_secs(30))))
///     .session_exchange(Arc::new(KubectlSessionExchange::new("oc", true, Duration::from_secs(30))))
///     .cancel_token(shutdown.clone())
///     .build()?
///     .run()
///     .await?;
/// ```
pub struct ScenarioOrchestrator<C: ControlPlaneClient, S: SessionExchange> {
    config: ScenarioConfig,
    client: Arc<C>,
    exchange: Arc<S>,
    generator: SecretGenerator<EntropySource>,
    cancel: CancellationToken,
    run_id: Uuid,
    state: ScenarioState,
    history: Vec<ScenarioState>,
}

impl<C: ControlPlaneClient, S: SessionExchange> ScenarioOrchestrator<C, S> {
    /// 실행 ID
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// 현재 상태명을 반환합니다.
    pub fn state_name(&self) -> &'static str {
        self.state.state_name()
    }

    /// 시나리오를 실행합니다.
    ///
    /// 성공하면 [`ScenarioReport`]를, 실패하면 정리가 끝난 뒤 첫 번째 에러를
    /// 반환합니다. 정리도 실패하면 `HarnessError::CleanupFailed`로 함께 보고합니다.
    pub async fn run(mut self) -> Result<ScenarioReport, HarnessError> {
        let span = tracing::info_span!(
            "scenario",
            run_id = %self.run_id,
            scope = %self.config.scope
        );
        async move { self.run_inner().await }.instrument(span).await
    }

    async fn run_inner(&mut self) -> Result<ScenarioReport, HarnessError> {
        let start = Instant::now();
        info!("scenario started");

        let mut ctx = ScenarioContext {
            principal: self.config.principal(),
            session: None,
            // Init 이후의 모든 실행은 주체 정리를 거침
            teardown: vec![Teardown::DeprovisionPrincipal],
            stages: Vec::new(),
        };

        let cancel = self.cancel.clone();
        let body = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = self.execute(&mut ctx) => Some(result),
        };
        let body = body.unwrap_or_else(|| {
            Err(HarnessError::Cancelled(format!(
                "scenario cancelled during {}",
                self.state
            )))
        });

        let failed_at = self.state;
        if let Err(e) = &body {
            error!(state = %failed_at, error = %e, "scenario stage failed");
        }

        let cleanup_errors = self.cleanup(&mut ctx).await;
        if !cleanup_errors.is_empty() {
            metrics::counter!(m::CLEANUP_FAILURES_TOTAL).increment(1);
        }

        let elapsed = start.elapsed();
        let result = match body {
            Ok(()) => match first_of(cleanup_errors) {
                None => Ok(()),
                Some(e) => Err(e),
            },
            Err(primary) if cleanup_errors.is_empty() => Err(primary),
            Err(primary) => Err(HarnessError::CleanupFailed {
                primary: Box::new(primary),
                cleanup: cleanup_errors,
            }),
        };

        let label = match &result {
            Ok(()) => {
                self.enter(ScenarioState::Done);
                info!(elapsed_ms = millis(elapsed), "scenario passed");
                "success"
            }
            Err(e) => {
                self.enter(ScenarioState::Failed);
                error!(elapsed_ms = millis(elapsed), error = %e, "scenario failed");
                e.kind_name()
            }
        };
        metrics::counter!(m::SCENARIO_RUNS_TOTAL, m::LABEL_RESULT => label).increment(1);
        metrics::histogram!(m::SCENARIO_DURATION_SECONDS).record(elapsed.as_secs_f64());

        result.map(|()| ScenarioReport {
            run_id: self.run_id.to_string(),
            scope: self.config.scope.clone(),
            stages: std::mem::take(&mut ctx.stages),
            transitions: self.history.iter().map(ToString::to_string).collect(),
            elapsed_ms: millis(elapsed),
        })
    }

    /// 정리 직전까지의 본문
    async fn execute(&mut self, ctx: &mut ScenarioContext) -> Result<(), HarnessError> {
        let poller = ConvergencePoller::new(self.cancel.clone());
        let lifecycle = PrincipalLifecycle::new(
            Arc::clone(&self.client),
            poller.clone(),
            self.config.cleanup,
        );

        // PreconditionWait
        self.enter(ScenarioState::PreconditionWait);
        let grant_ref = self.config.required_grant_ref();
        let client = &self.client;
        let grant = &grant_ref;
        let converged = poller
            .poll("precondition", &self.config.precondition, move || async move {
                client.get(grant).await.map(|_| ()).map_err(ProbeError::from)
            })
            .await?;
        ctx.stages.push(stage_report("precondition", &converged));

        // CleanPrior
        self.enter(ScenarioState::CleanPrior);
        lifecycle.deprovision(&ctx.principal).await?;

        // Provision
        self.enter(ScenarioState::Provision);
        let password = self.generator.generate()?;
        ctx.principal.set_password(password)?;
        lifecycle.provision(&ctx.principal).await?;

        // AcquireSession
        self.enter(ScenarioState::AcquireSession);
        let server_url = self.client.server_url().await?;
        let artifact = {
            let exchange = &self.exchange;
            let url = server_url.as_str();
            let username = ctx.principal.username();
            let password = ctx.principal.password().ok_or_else(|| {
                HarnessError::InvalidState("password missing after provisioning".to_owned())
            })?;
            let converged = poller
                .poll("session", &self.config.session, move || async move {
                    exchange
                        .exchange(url, username, password)
                        .await
                        .map_err(ProbeError::from)
                })
                .await?;
            ctx.stages.push(stage_report("session", &converged));
            converged.value
        };
        ctx.session = Some(artifact);
        ctx.teardown.push(Teardown::DiscardSession);

        // Trigger
        self.enter(ScenarioState::Trigger);
        let manifest_path = self.config.manifest_path.clone();
        let manifest = tokio::fs::read_to_string(&manifest_path)
            .await
            .map_err(|e| HarnessError::Manifest {
                path: manifest_path.display().to_string(),
                reason: e.to_string(),
            })?;
        let session = ctx
            .session
            .as_ref()
            .ok_or_else(|| HarnessError::InvalidState("session missing at trigger".to_owned()))?;
        self.client
            .apply_manifest(&manifest, &self.config.scope, session)
            .await?;
        info!(manifest = %manifest_path.display(), "propagation triggered");

        // Verify(n)
        let stages = self.config.verify.clone();
        for (idx, stage) in stages.iter().enumerate() {
            self.enter(ScenarioState::Verify(idx));
            let converged = verify_stage(&poller, &self.client, stage).await?;
            info!(
                stage = %stage.name,
                attempts = converged.attempts,
                elapsed_ms = millis(converged.elapsed),
                "stage converged"
            );
            ctx.stages.push(stage_report(&stage.name, &converged));
        }

        Ok(())
    }

    /// 정리 스택을 역순으로 실행합니다. 에러는 모아서 반환합니다.
    async fn cleanup(&mut self, ctx: &mut ScenarioContext) -> Vec<HarnessError> {
        self.enter(ScenarioState::Cleanup);
        // 본문 취소와 무관하게 정리 마감까지 진행
        let lifecycle = PrincipalLifecycle::new(
            Arc::clone(&self.client),
            ConvergencePoller::new(CancellationToken::new()),
            self.config.cleanup,
        );

        let mut errors = Vec::new();
        while let Some(action) = ctx.teardown.pop() {
            let result = match action {
                Teardown::DiscardSession => match ctx.session.take() {
                    Some(session) => session.discard(),
                    None => Ok(()),
                },
                Teardown::DeprovisionPrincipal => lifecycle.deprovision(&ctx.principal).await,
            };
            if let Err(e) = result {
                warn!(action = ?action, error = %e, "cleanup step failed");
                errors.push(e);
            }
        }
        errors
    }

    fn enter(&mut self, next: ScenarioState) {
        info!(from = %self.state, to = %next, "state transition");
        self.state = next;
        self.history.push(next);
    }
}

/// 검증 단계 하나: 객체가 나타날 때까지 폴링하고 구조를 확인합니다.
///
/// 구조 불일치는 재시도하지 않습니다.
async fn verify_stage<C: ControlPlaneClient>(
    poller: &ConvergencePoller,
    client: &Arc<C>,
    stage: &VerifyStage,
) -> Result<Converged<()>, HarnessError> {
    let target = &stage.target;
    let shape = &stage.shape;
    poller
        .poll(&stage.name, &stage.policy, move || async move {
            let object = client.get(target).await?;
            for assertion in shape {
                assertion
                    .check(&target.to_string(), &object)
                    .map_err(ProbeError::fatal)?;
            }
            Ok(())
        })
        .await
}

fn stage_report<T>(name: &str, converged: &Converged<T>) -> StageReport {
    StageReport {
        name: name.to_owned(),
        attempts: converged.attempts,
        elapsed_ms: millis(converged.elapsed),
    }
}

fn first_of(errors: Vec<HarnessError>) -> Option<HarnessError> {
    errors.into_iter().next()
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// [`ScenarioOrchestrator`] 빌더
pub struct ScenarioOrchestratorBuilder<C: ControlPlaneClient, S: SessionExchange> {
    config: Option<ScenarioConfig>,
    client: Option<Arc<C>>,
    exchange: Option<Arc<S>>,
    entropy: Option<EntropySource>,
    cancel: Option<CancellationToken>,
}

impl<C: ControlPlaneClient, S: SessionExchange> ScenarioOrchestratorBuilder<C, S> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: None,
            client: None,
            exchange: None,
            entropy: None,
            cancel: None,
        }
    }

    /// 시나리오 설정을 지정합니다.
    pub fn config(mut self, config: ScenarioConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// 컨트롤 플레인 클라이언트를 설정합니다.
    pub fn client(mut self, client: Arc<C>) -> Self {
        self.client = Some(client);
        self
    }

    /// 세션 교환기를 설정합니다.
    pub fn session_exchange(mut self, exchange: Arc<S>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    /// 비밀번호 생성에 사용할 난수 소스를 주입합니다 (기본: `OsRng`).
    pub fn entropy_source(mut self, source: impl RngCore + Send + Sync + 'static) -> Self {
        self.entropy = Some(Box::new(source));
        self
    }

    /// 외부 취소 토큰을 설정합니다.
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// 오케스트레이터를 빌드합니다.
    pub fn build(self) -> Result<ScenarioOrchestrator<C, S>, HarnessError> {
        let config = self.config.ok_or_else(|| HarnessError::Config {
            field: "config".to_owned(),
            reason: "scenario config must be provided".to_owned(),
        })?;
        config.validate()?;

        let client = self.client.ok_or_else(|| HarnessError::Config {
            field: "client".to_owned(),
            reason: "control plane client must be provided".to_owned(),
        })?;
        let exchange = self.exchange.ok_or_else(|| HarnessError::Config {
            field: "session_exchange".to_owned(),
            reason: "session exchange must be provided".to_owned(),
        })?;

        let entropy: EntropySource = self
            .entropy
            .unwrap_or_else(|| Box::new(rand::rngs::OsRng));
        let generator = SecretGenerator::with_source(
            entropy,
            config.password_min_bytes,
            config.password_max_bytes,
        )?;

        Ok(ScenarioOrchestrator {
            config,
            client,
            exchange,
            generator,
            cancel: self.cancel.unwrap_or_default(),
            run_id: Uuid::new_v4(),
            state: ScenarioState::Init,
            history: vec![ScenarioState::Init],
        })
    }
}

impl<C: ControlPlaneClient, S: SessionExchange> Default for ScenarioOrchestratorBuilder<C, S> {
    fn default() -> Self {
        Self::new()
    }
}
