//! Converge 공통 크레이트
//!
//! 하네스(`converge-harness`)와 CLI(`converge-cli`)가 공유하는
//! 에러 타입, 설정, 메트릭 이름, 리소스 참조 타입을 제공합니다.

pub mod config;
pub mod error;
pub mod metrics;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{ConfigError, ConvergeError};

// 설정
pub use config::ConvergeConfig;

// 도메인 타입
pub use types::ResourceRef;
