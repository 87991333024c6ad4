//! `oc`/`kubectl` 바이너리 기반 컨트롤 플레인 클라이언트
//!
//! [`KubectlClient`]는 [`ControlPlaneClient`]의 프로덕션 구현입니다.
//! 모든 호출은 `tokio::process`로 CLI를 실행하며, 요청 본문은 JSON으로
//! stdin에 전달하고 응답은 `-o json` 출력을 파싱합니다.
//!
//! # 에러 매핑
//!
//! API 서버가 보낸 응답만 분류합니다. 클라이언트 측 실패(없는 context 등)는
//! 메시지에 "not found"가 있어도 `ControlPlane`으로 남습니다.
//!
//! - stderr에 `Error from server (NotFound)` → `HarnessError::NotFound`
//! - stderr에 `Error from server (AlreadyExists)` → `HarnessError::AlreadyExists`
//! - 그 외 실패, 타임아웃, 실행 불가 → `HarnessError::ControlPlane`
//!
//! # 이름 검증
//!
//! 리소스/네임스페이스/객체 이름은 CLI 인자로 전달되므로 호출 전에 검증합니다.
//! `-`로 시작하는 이름이나 허용되지 않은 문자는 거부합니다.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use converge_core::types::ResourceRef;

use crate::client::ControlPlaneClient;
use crate::error::HarnessError;
use crate::session::SessionArtifact;

/// 쿠버네티스 이름 최대 길이
const MAX_NAME_LEN: usize = 253;

const SERVER_NOT_FOUND: &str = "Error from server (NotFound)";
const SERVER_ALREADY_EXISTS: &str = "Error from server (AlreadyExists)";

/// CLI 실행 결과
#[derive(Debug)]
pub(crate) struct CliOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// CLI를 한 번 실행합니다. `stdin`이 있으면 파이프로 전달합니다.
pub(crate) async fn run_cli(
    binary: &str,
    args: &[String],
    stdin: Option<&[u8]>,
    timeout: Duration,
) -> Result<CliOutput, HarnessError> {
    let mut command = Command::new(binary);
    command
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| HarnessError::ControlPlane(format!("failed to spawn '{binary}': {e}")))?;
    let pipe = child.stdin.take();

    // stdin 쓰기와 종료 대기를 같은 마감 안에서 수행
    let exchange = async move {
        if let (Some(body), Some(mut pipe)) = (stdin, pipe) {
            match pipe.write_all(body).await {
                // 입력을 다 읽기 전에 종료한 경우에도 stderr는 수집
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {}
                result => result?,
            }
            // drop으로 EOF 전달
        }
        child.wait_with_output().await
    };

    let output = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| {
            HarnessError::ControlPlane(format!("'{binary}' did not finish within {timeout:?}"))
        })?
        .map_err(|e| HarnessError::ControlPlane(format!("'{binary}' failed: {e}")))?;

    Ok(CliOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// 이름이 CLI 인자로 안전한지 검증합니다.
fn validate_name(kind: &str, name: &str) -> Result<(), HarnessError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(HarnessError::ControlPlane(format!(
            "invalid {kind} name: length {} (must be 1-{MAX_NAME_LEN})",
            name.len()
        )));
    }
    if name.starts_with('-') {
        return Err(HarnessError::ControlPlane(format!(
            "invalid {kind} name '{name}': must not start with '-'"
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | ':' | '_'))
    {
        return Err(HarnessError::ControlPlane(format!(
            "invalid {kind} name '{name}': contains unsupported characters"
        )));
    }
    Ok(())
}

fn validate_ref(target: &ResourceRef) -> Result<(), HarnessError> {
    validate_name("resource", &target.resource)?;
    if let Some(ns) = &target.namespace {
        validate_name("namespace", ns)?;
    }
    validate_name("object", &target.name)
}

/// stderr 내용을 에러 분류로 변환합니다.
fn classify_failure(target: &ResourceRef, verb: &str, stderr: &str) -> HarnessError {
    let stderr = stderr.trim();
    if stderr.contains(SERVER_NOT_FOUND) {
        HarnessError::NotFound(target.to_string())
    } else if stderr.contains(SERVER_ALREADY_EXISTS) {
        HarnessError::AlreadyExists(target.to_string())
    } else {
        HarnessError::ControlPlane(format!("{verb} {target} failed: {stderr}"))
    }
}

/// `oc`/`kubectl` 기반 컨트롤 플레인 클라이언트
#[derive(Debug, Clone)]
pub struct KubectlClient {
    binary: String,
    kubeconfig: Option<PathBuf>,
    server_url: Option<String>,
    timeout: Duration,
}

impl KubectlClient {
    /// 새 클라이언트를 생성합니다.
    ///
    /// `kubeconfig`가 `None`이면 바이너리의 기본 해석 규칙을 따릅니다.
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            kubeconfig: None,
            server_url: None,
            timeout,
        }
    }

    /// 관리자 kubeconfig 경로를 지정합니다.
    pub fn with_kubeconfig(mut self, path: impl Into<PathBuf>) -> Self {
        self.kubeconfig = Some(path.into());
        self
    }

    /// API 서버 URL을 고정합니다 (조회 생략).
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = Some(url.into());
        self
    }

    /// 공통 인자 (`--kubeconfig`) 뒤에 동사별 인자를 붙입니다.
    fn args(&self, verb_args: impl IntoIterator<Item = String>) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(path) = &self.kubeconfig {
            args.push(format!("--kubeconfig={}", path.display()));
        }
        args.extend(verb_args);
        args
    }

    fn target_args(target: &ResourceRef) -> Vec<String> {
        let mut args = vec![target.resource.clone(), target.name.clone()];
        if let Some(ns) = &target.namespace {
            args.push(format!("--namespace={ns}"));
        }
        args
    }

    async fn submit(&self, verb: &str, target: &ResourceRef, body: &Value) -> Result<(), HarnessError> {
        validate_ref(target)?;
        let payload = serde_json::to_vec(body)
            .map_err(|e| HarnessError::ControlPlane(format!("failed to encode {target}: {e}")))?;

        let mut verb_args = vec![verb.to_owned(), "-f".to_owned(), "-".to_owned()];
        if let Some(ns) = &target.namespace {
            verb_args.push(format!("--namespace={ns}"));
        }

        debug!(verb, target = %target, "submitting object");
        let output = run_cli(&self.binary, &self.args(verb_args), Some(&payload), self.timeout).await?;
        if output.success {
            Ok(())
        } else {
            Err(classify_failure(target, verb, &output.stderr))
        }
    }
}

impl ControlPlaneClient for KubectlClient {
    async fn get(&self, target: &ResourceRef) -> Result<Value, HarnessError> {
        validate_ref(target)?;
        let mut verb_args = vec!["get".to_owned()];
        verb_args.extend(Self::target_args(target));
        verb_args.push("--output=json".to_owned());

        let output = run_cli(&self.binary, &self.args(verb_args), None, self.timeout).await?;
        if !output.success {
            return Err(classify_failure(target, "get", &output.stderr));
        }
        serde_json::from_str(&output.stdout).map_err(|e| {
            HarnessError::ControlPlane(format!("invalid JSON for {target}: {e}"))
        })
    }

    async fn create(&self, target: &ResourceRef, body: &Value) -> Result<(), HarnessError> {
        self.submit("create", target, body).await
    }

    async fn replace(&self, target: &ResourceRef, body: &Value) -> Result<(), HarnessError> {
        self.submit("replace", target, body).await
    }

    async fn delete(&self, target: &ResourceRef) -> Result<(), HarnessError> {
        validate_ref(target)?;
        let mut verb_args = vec!["delete".to_owned()];
        verb_args.extend(Self::target_args(target));
        // 삭제 완료 확인은 호출자가 폴링으로 수행
        verb_args.push("--wait=false".to_owned());

        debug!(target = %target, "deleting object");
        let output = run_cli(&self.binary, &self.args(verb_args), None, self.timeout).await?;
        if output.success {
            Ok(())
        } else {
            Err(classify_failure(target, "delete", &output.stderr))
        }
    }

    async fn apply_manifest(
        &self,
        manifest: &str,
        scope: &str,
        session: &SessionArtifact,
    ) -> Result<(), HarnessError> {
        validate_name("namespace", scope)?;
        // 세션 kubeconfig로 실행하므로 관리자 kubeconfig는 붙이지 않음
        let args = vec![
            "apply".to_owned(),
            "-f".to_owned(),
            "-".to_owned(),
            format!("--namespace={scope}"),
            format!("--kubeconfig={}", session.path().display()),
        ];

        debug!(scope, bytes = manifest.len(), "applying manifest with session");
        let output = run_cli(&self.binary, &args, Some(manifest.as_bytes()), self.timeout).await?;
        if output.success {
            Ok(())
        } else {
            Err(HarnessError::ControlPlane(format!(
                "apply in '{scope}' rejected: {}",
                output.stderr.trim()
            )))
        }
    }

    async fn server_url(&self) -> Result<String, HarnessError> {
        if let Some(url) = &self.server_url {
            return Ok(url.clone());
        }

        let args = self.args([
            "config".to_owned(),
            "view".to_owned(),
            "--minify".to_owned(),
            "--output=jsonpath={.clusters[0].cluster.server}".to_owned(),
        ]);
        let output = run_cli(&self.binary, &args, None, self.timeout).await?;
        let url = output.stdout.trim();
        if !output.success || url.is_empty() {
            return Err(HarnessError::ControlPlane(format!(
                "failed to resolve API server URL: {}",
                output.stderr.trim()
            )));
        }
        Ok(url.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_name_accepts_binding_names() {
        assert!(validate_name("object", "grc-e2e-subscription-admin:open-cluster-management:admin").is_ok());
        assert!(validate_name("object", "grc-e2e-policy-generator.e2e-grc-policy-app").is_ok());
    }

    #[test]
    fn validate_name_rejects_flag_like_names() {
        let err = validate_name("object", "--all").unwrap_err();
        assert!(err.to_string().contains("must not start with '-'"));
    }

    #[test]
    fn validate_name_rejects_bad_characters_and_length() {
        assert!(validate_name("object", "a b").is_err());
        assert!(validate_name("object", "a;rm").is_err());
        assert!(validate_name("object", "").is_err());
        assert!(validate_name("object", &"a".repeat(254)).is_err());
    }

    #[test]
    fn classify_failure_maps_not_found_and_conflict() {
        let target = ResourceRef::scope("test-a");
        assert!(matches!(
            classify_failure(&target, "get", "Error from server (NotFound): namespaces \"test-a\" not found"),
            HarnessError::NotFound(_)
        ));
        assert!(matches!(
            classify_failure(&target, "create", "Error from server (AlreadyExists): namespaces \"test-a\" already exists"),
            HarnessError::AlreadyExists(_)
        ));
        assert!(matches!(
            classify_failure(&target, "delete", "Unable to connect to the server"),
            HarnessError::ControlPlane(_)
        ));
    }

    #[test]
    fn classify_failure_keeps_client_side_not_found_as_control_plane() {
        let target = ResourceRef::scope("test-a");
        let err = classify_failure(&target, "delete", "error: context \"admin\" not found");
        assert!(!err.is_not_found());
        assert!(matches!(err, HarnessError::ControlPlane(_)));

        let err = classify_failure(
            &target,
            "get",
            "error: cluster \"api-example\" not found in kubeconfig",
        );
        assert!(matches!(err, HarnessError::ControlPlane(_)));

        let err = classify_failure(&target, "create", "error: file already exists");
        assert!(matches!(err, HarnessError::ControlPlane(_)));
    }

    #[test]
    fn args_prefix_admin_kubeconfig() {
        let client = KubectlClient::new("oc", Duration::from_secs(5)).with_kubeconfig("/tmp/admin");
        let mut verb = vec!["get".to_owned()];
        verb.extend(KubectlClient::target_args(&ResourceRef::secret("test-a", "sec-a")));
        let args = client.args(verb);
        assert_eq!(
            args,
            vec![
                "--kubeconfig=/tmp/admin",
                "get",
                "secrets",
                "sec-a",
                "--namespace=test-a"
            ]
        );
    }

    #[tokio::test]
    async fn configured_server_url_skips_lookup() {
        let client = KubectlClient::new("converge-test-no-such-binary", Duration::from_secs(5))
            .with_server_url("https://api.example:6443");
        assert_eq!(client.server_url().await.unwrap(), "https://api.example:6443");
    }

    #[tokio::test]
    async fn missing_binary_is_control_plane_error() {
        let client = KubectlClient::new("converge-test-no-such-binary", Duration::from_secs(5));
        let err = client.get(&ResourceRef::scope("test-a")).await.unwrap_err();
        assert!(matches!(err, HarnessError::ControlPlane(_)));
    }

    #[tokio::test]
    async fn invalid_ref_rejected_before_spawn() {
        let client = KubectlClient::new("converge-test-no-such-binary", Duration::from_secs(5));
        let err = client.delete(&ResourceRef::scope("-n")).await.unwrap_err();
        assert!(err.to_string().contains("must not start with '-'"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_cli_pipes_stdin() {
        let output = run_cli("cat", &[], Some(b"{\"kind\":\"Namespace\"}"), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "{\"kind\":\"Namespace\"}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn run_cli_bounds_stdin_write_by_timeout() {
        // 자식이 stdin을 읽지 않으므로 파이프 버퍼를 넘는 쓰기는 막힘
        let body = vec![b'x'; 4 * 1024 * 1024];
        let err = run_cli(
            "sleep",
            &["30".to_owned()],
            Some(&body),
            Duration::from_millis(200),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("did not finish within"));
    }
}
