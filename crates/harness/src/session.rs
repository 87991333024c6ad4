//! 세션 교환 -- 임시 주체의 자격 증명을 세션 아티팩트로 바꿉니다.
//!
//! [`SessionExchange`]는 `(server_url, username, password)`를 받아
//! 트리거 단계에서 사용할 [`SessionArtifact`](kubeconfig 파일)를 반환합니다.
//! 신원 제공자가 새 사용자를 늦게 인식할 수 있으므로 호출자는 이 교환을
//! 폴러로 재시도합니다.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempPath;
use tracing::debug;

use crate::error::HarnessError;
use crate::kubectl::run_cli;
use crate::secret::Password;

/// 세션 아티팩트 (kubeconfig 경로)
///
/// 임시 파일로 만들어진 경우 [`discard`](Self::discard) 또는 drop 시 파일이 삭제됩니다.
#[derive(Debug)]
pub struct SessionArtifact {
    path: PathBuf,
    temp: Option<TempPath>,
}

impl SessionArtifact {
    /// 임시 파일을 소유하는 아티팩트를 만듭니다.
    pub fn from_temp_path(temp: TempPath) -> Self {
        Self {
            path: temp.to_path_buf(),
            temp: Some(temp),
        }
    }

    /// 하네스가 소유하지 않는 기존 경로를 가리키는 아티팩트를 만듭니다.
    pub fn external(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            temp: None,
        }
    }

    /// kubeconfig 경로
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 아티팩트를 폐기합니다. 소유한 임시 파일은 삭제합니다.
    pub fn discard(self) -> Result<(), HarnessError> {
        if let Some(temp) = self.temp {
            temp.close().map_err(|e| {
                HarnessError::Session(format!(
                    "failed to remove kubeconfig {}: {e}",
                    self.path.display()
                ))
            })?;
        }
        Ok(())
    }
}

/// 자격 증명 → 세션 교환 추상화
pub trait SessionExchange: Send + Sync + 'static {
    /// 사용자 이름/비밀번호로 로그인하여 세션 아티팩트를 반환합니다.
    ///
    /// # Errors
    ///
    /// 로그인 거부, 타임아웃 등은 `HarnessError::Session`으로 반환합니다.
    fn exchange(
        &self,
        server_url: &str,
        username: &str,
        password: &Password,
    ) -> impl Future<Output = Result<SessionArtifact, HarnessError>> + Send;
}

/// `oc login`으로 새 임시 kubeconfig를 만드는 세션 교환
#[derive(Debug, Clone)]
pub struct KubectlSessionExchange {
    binary: String,
    insecure_skip_tls_verify: bool,
    timeout: Duration,
}

impl KubectlSessionExchange {
    /// 새 세션 교환기를 생성합니다.
    pub fn new(binary: impl Into<String>, insecure_skip_tls_verify: bool, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            insecure_skip_tls_verify,
            timeout,
        }
    }
}

impl SessionExchange for KubectlSessionExchange {
    async fn exchange(
        &self,
        server_url: &str,
        username: &str,
        password: &Password,
    ) -> Result<SessionArtifact, HarnessError> {
        let temp = tempfile::Builder::new()
            .prefix("converge-kubeconfig-")
            .tempfile()
            .map_err(|e| HarnessError::Session(format!("failed to create kubeconfig: {e}")))?
            .into_temp_path();

        let mut args = vec![
            "login".to_owned(),
            server_url.to_owned(),
            format!("--username={username}"),
            format!("--password={}", password.expose()),
            format!("--kubeconfig={}", temp.display()),
        ];
        if self.insecure_skip_tls_verify {
            args.push("--insecure-skip-tls-verify=true".to_owned());
        }

        debug!(server_url, username, "exchanging credentials for session");
        let output = run_cli(&self.binary, &args, None, self.timeout)
            .await
            .map_err(|e| HarnessError::Session(e.to_string()))?;

        if !output.success {
            // 비밀번호가 인자에 있으므로 인자 목록은 에러 메시지에 넣지 않음
            return Err(HarnessError::Session(format!(
                "login as '{username}' rejected: {}",
                output.stderr.trim()
            )));
        }

        Ok(SessionArtifact::from_temp_path(temp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discard_removes_owned_temp_file() {
        let temp = tempfile::NamedTempFile::new().unwrap().into_temp_path();
        let artifact = SessionArtifact::from_temp_path(temp);
        let path = artifact.path().to_path_buf();
        assert!(path.exists());
        artifact.discard().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn drop_removes_owned_temp_file() {
        let temp = tempfile::NamedTempFile::new().unwrap().into_temp_path();
        let artifact = SessionArtifact::from_temp_path(temp);
        let path = artifact.path().to_path_buf();
        drop(artifact);
        assert!(!path.exists());
    }

    #[test]
    fn discard_keeps_external_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let artifact = SessionArtifact::external(file.path());
        artifact.discard().unwrap();
        assert!(file.path().exists());
    }

    #[tokio::test]
    async fn missing_binary_reports_session_error() {
        let exchange = KubectlSessionExchange::new(
            "converge-test-no-such-binary",
            true,
            Duration::from_secs(5),
        );
        let mut generator = crate::secret::SecretGenerator::new(15, 15).unwrap();
        let password = generator.generate().unwrap();
        let err = exchange
            .exchange("https://api.example:6443", "sec-a", &password)
            .await
            .unwrap_err();
        assert!(matches!(err, HarnessError::Session(_)));
        assert!(!err.to_string().contains(password.expose()));
    }
}
