//! Converge 하네스 -- 수렴 폴링과 임시 주체 라이프사이클
//!
//! 비동기적으로 수렴하는 컨트롤 플레인을 상대로, 임시 주체를 만들고
//! 전파를 트리거한 뒤 파생 객체가 나타날 때까지 기다려 구조를 확인하고,
//! 성공/실패와 무관하게 정확히 한 번 정리합니다.
//!
//! # Module Structure
//!
//! - [`error`]: 도메인 에러 타입 (`HarnessError`)
//! - [`secret`]: 비밀번호 생성 (`SecretGenerator`, `Password`)
//! - [`poller`]: 마감 기반 수렴 폴링 (`ConvergencePoller`, `PollPolicy`, `Probe`)
//! - [`client`]: 컨트롤 플레인 추상화 (`ControlPlaneClient` trait)
//! - [`kubectl`]: CLI 기반 구현 (`KubectlClient`)
//! - [`session`]: 자격 증명 → 세션 교환 (`SessionExchange`, `SessionArtifact`)
//! - [`principal`]: 임시 주체 (`Principal`, `PrincipalLifecycle`)
//! - [`shape`]: 객체 구조 검사 (`ShapeAssertion`)
//! - [`config`]: 실행 설정 (`ScenarioConfig`, builder)
//! - [`scenario`]: 오케스트레이터 (`ScenarioOrchestrator`, builder)
//!
//! # Architecture
//!
//! ```text
//! ScenarioOrchestrator
//!     |-- PreconditionWait --> ConvergencePoller --> ControlPlaneClient.get()
//!     |-- CleanPrior/Provision --> PrincipalLifecycle
//!     |-- AcquireSession --> ConvergencePoller --> SessionExchange
//!     |-- Trigger --> ControlPlaneClient.apply_manifest()
//!     |-- Verify(n) --> ConvergencePoller --> get() + ShapeAssertion
//!     `-- Cleanup (teardown stack, reverse order)
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod kubectl;
pub mod poller;
pub mod principal;
pub mod scenario;
pub mod secret;
pub mod session;
pub mod shape;

// --- Public API Re-exports ---

// Orchestrator
pub use scenario::{
    ScenarioOrchestrator, ScenarioOrchestratorBuilder, ScenarioReport, ScenarioState, StageReport,
};

// Configuration
pub use config::{ScenarioConfig, ScenarioConfigBuilder, VerifyStage};

// Error
pub use error::HarnessError;

// Control plane
pub use client::ControlPlaneClient;
pub use kubectl::KubectlClient;

// Session
pub use session::{KubectlSessionExchange, SessionArtifact, SessionExchange};

// Principal
pub use principal::{Grant, Principal, PrincipalLifecycle};

// Polling
pub use poller::{Converged, ConvergencePoller, PollPolicy, Probe, ProbeError};

// Secrets / shape
pub use secret::{Password, SecretGenerator};
pub use shape::ShapeAssertion;
