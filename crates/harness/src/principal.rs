//! 임시 주체(Principal) 라이프사이클
//!
//! [`Principal`]은 시나리오 동안만 존재하는 사용자와 그 자격 증명, 권한 부여를
//! 나타냅니다. [`PrincipalLifecycle`]은 이를 컨트롤 플레인에 만들고 지웁니다.
//!
//! # 프로비저닝 순서
//!
//! 1. 스코프가 이미 있으면 전체 정리 후 재생성 (이전 실패 실행의 잔여물 제거)
//! 2. 스코프(네임스페이스) 생성
//! 3. 자격 증명 시크릿 생성 (`kubernetes.io/basic-auth`)
//! 4. 권한 부여: 역할별 전용 바인딩 생성, 또는 기존 바인딩에 subject 추가
//!
//! # 정리 순서
//!
//! 권한 부여 → 시크릿 → 스코프 순으로 삭제하고, 스코프가 실제로 사라질 때까지
//! 폴링합니다. 이미 없는 리소스 삭제는 성공으로 취급합니다.

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, warn};

use converge_core::types::ResourceRef;

use crate::client::ControlPlaneClient;
use crate::error::HarnessError;
use crate::poller::{ConvergencePoller, PollPolicy, ProbeError};
use crate::secret::Password;

const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";
const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
const MANAGED_BY_VALUE: &str = "converge";

/// 권한 부여
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Grant {
    /// 전용 클러스터 역할 바인딩 `"{username}:{role}"`을 생성
    Role {
        /// 클러스터 역할 이름
        role: String,
    },
    /// 기존 바인딩의 subject로 합류
    Membership {
        /// 기존 클러스터 역할 바인딩 이름
        binding: String,
    },
}

impl Grant {
    /// 이 권한 부여가 사용하는 바인딩 참조
    pub fn binding_ref(&self, username: &str) -> ResourceRef {
        match self {
            Self::Role { role } => ResourceRef::cluster_role_binding(format!("{username}:{role}")),
            Self::Membership { binding } => ResourceRef::cluster_role_binding(binding.clone()),
        }
    }
}

/// 임시 주체
#[derive(Debug, Clone)]
pub struct Principal {
    username: String,
    password: Option<Password>,
    grants: Vec<Grant>,
    credential_secret: ResourceRef,
}

impl Principal {
    /// 스코프 안의 `secret_name` 시크릿에 자격 증명을 저장하는 주체를 만듭니다.
    pub fn new(
        username: impl Into<String>,
        scope: impl Into<String>,
        secret_name: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: None,
            grants: Vec::new(),
            credential_secret: ResourceRef::secret(scope, secret_name),
        }
    }

    /// 권한 부여를 추가합니다.
    pub fn with_grant(mut self, grant: Grant) -> Self {
        self.grants.push(grant);
        self
    }

    /// 사용자 이름
    pub fn username(&self) -> &str {
        &self.username
    }

    /// 생성된 비밀번호 (설정 전이면 `None`)
    pub fn password(&self) -> Option<&Password> {
        self.password.as_ref()
    }

    /// 권한 부여 목록
    pub fn grants(&self) -> &[Grant] {
        &self.grants
    }

    /// 자격 증명 시크릿 참조
    pub fn credential_secret(&self) -> &ResourceRef {
        &self.credential_secret
    }

    /// 주체가 속한 스코프 이름
    pub fn scope(&self) -> &str {
        self.credential_secret.namespace.as_deref().unwrap_or_default()
    }

    /// 비밀번호를 설정합니다. 한 번만 가능합니다.
    ///
    /// # Errors
    ///
    /// 이미 설정되어 있으면 `HarnessError::InvalidState`를 반환합니다.
    pub fn set_password(&mut self, password: Password) -> Result<(), HarnessError> {
        if self.password.is_some() {
            return Err(HarnessError::InvalidState(format!(
                "password for '{}' is already set",
                self.username
            )));
        }
        self.password = Some(password);
        Ok(())
    }
}

/// 주체 프로비저닝/정리 서비스
///
/// 상태를 갖지 않으며 같은 인스턴스로 여러 주체를 다룰 수 있습니다.
pub struct PrincipalLifecycle<C: ControlPlaneClient> {
    client: Arc<C>,
    poller: ConvergencePoller,
    confirm: PollPolicy,
}

impl<C: ControlPlaneClient> PrincipalLifecycle<C> {
    /// 새 라이프사이클 서비스를 생성합니다.
    ///
    /// `confirm`은 스코프 삭제 확인 폴링 정책입니다.
    pub fn new(client: Arc<C>, poller: ConvergencePoller, confirm: PollPolicy) -> Self {
        Self {
            client,
            poller,
            confirm,
        }
    }

    /// 주체를 프로비저닝합니다.
    ///
    /// 스코프가 이미 존재하면 먼저 [`deprovision`](Self::deprovision)으로 완전히
    /// 제거한 뒤 다시 만듭니다.
    ///
    /// # Errors
    ///
    /// - `HarnessError::InvalidState`: 비밀번호가 설정되지 않음
    /// - `HarnessError::ProvisionConflict`: 기존 스코프를 정리할 수 없음
    /// - 컨트롤 플레인 호출 에러
    pub async fn provision(&self, principal: &Principal) -> Result<(), HarnessError> {
        let password = principal.password().ok_or_else(|| {
            HarnessError::InvalidState(format!(
                "password for '{}' must be set before provisioning",
                principal.username()
            ))
        })?;
        let scope = principal.scope().to_owned();
        let scope_ref = ResourceRef::scope(scope.clone());

        match self.client.get(&scope_ref).await {
            Ok(_) => {
                info!(scope = %scope, "scope left over from a previous run, clearing");
                self.deprovision(principal).await.map_err(|e| {
                    HarnessError::ProvisionConflict {
                        scope: scope.clone(),
                        reason: e.to_string(),
                    }
                })?;
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        let namespace = json!({
            "apiVersion": "v1",
            "kind": "Namespace",
            "metadata": {
                "name": scope,
                "labels": { MANAGED_BY_LABEL: MANAGED_BY_VALUE },
            },
        });
        self.client
            .create(&scope_ref, &namespace)
            .await
            .map_err(|e| match e {
                HarnessError::AlreadyExists(_) => HarnessError::ProvisionConflict {
                    scope: scope.clone(),
                    reason: "scope reappeared during provisioning".to_owned(),
                },
                other => other,
            })?;
        debug!(scope = %scope, "scope created");

        let secret_ref = principal.credential_secret();
        let secret = json!({
            "apiVersion": "v1",
            "kind": "Secret",
            "type": "kubernetes.io/basic-auth",
            "metadata": {
                "name": secret_ref.name,
                "namespace": scope,
                "labels": { MANAGED_BY_LABEL: MANAGED_BY_VALUE },
            },
            "stringData": {
                "username": principal.username(),
                "password": password.expose(),
            },
        });
        self.client.create(secret_ref, &secret).await?;
        debug!(secret = %secret_ref, "credential secret created");

        for grant in principal.grants() {
            self.apply_grant(principal.username(), grant).await?;
        }

        info!(
            scope = %scope,
            username = principal.username(),
            grants = principal.grants().len(),
            "principal provisioned"
        );
        Ok(())
    }

    /// 주체와 스코프를 제거하고 스코프 삭제 완료를 확인합니다.
    ///
    /// 모든 삭제 단계를 시도하며, 실패가 있으면 첫 번째 실패를 반환합니다.
    /// 이미 없는 리소스는 성공으로 취급합니다.
    ///
    /// # Errors
    ///
    /// - `HarnessError::Deprovision`: 삭제 요청 실패 (not-found 제외)
    /// - `HarnessError::ConfirmationTimeout`: 마감 안에 스코프 삭제가 관측되지 않음
    /// - `HarnessError::Cancelled`: 확인 폴링 중 취소됨
    pub async fn deprovision(&self, principal: &Principal) -> Result<(), HarnessError> {
        let mut first_error: Option<HarnessError> = None;

        for grant in principal.grants().iter().rev() {
            if let Err(e) = self.revoke_grant(principal.username(), grant).await {
                warn!(error = %e, "failed to revoke grant");
                first_error.get_or_insert(e);
            }
        }

        if let Err(e) = self.delete_ignoring_absent(principal.credential_secret()).await {
            warn!(error = %e, "failed to delete credential secret");
            first_error.get_or_insert(e);
        }

        let scope = principal.scope();
        let scope_ref = ResourceRef::scope(scope);
        match self.delete_ignoring_absent(&scope_ref).await {
            Ok(()) => {
                if let Err(e) = self.confirm_absent(&scope_ref, scope).await {
                    first_error.get_or_insert(e);
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to delete scope");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!(scope, "principal deprovisioned");
                Ok(())
            }
        }
    }

    async fn apply_grant(&self, username: &str, grant: &Grant) -> Result<(), HarnessError> {
        let binding_ref = grant.binding_ref(username);
        match grant {
            Grant::Role { role } => {
                let body = json!({
                    "apiVersion": format!("{RBAC_API_GROUP}/v1"),
                    "kind": "ClusterRoleBinding",
                    "metadata": {
                        "name": binding_ref.name,
                        "labels": { MANAGED_BY_LABEL: MANAGED_BY_VALUE },
                    },
                    "roleRef": {
                        "apiGroup": RBAC_API_GROUP,
                        "kind": "ClusterRole",
                        "name": role,
                    },
                    "subjects": [user_subject(username)],
                });
                match self.client.create(&binding_ref, &body).await {
                    Ok(()) => {}
                    Err(HarnessError::AlreadyExists(_)) => {
                        debug!(binding = %binding_ref, "binding exists, replacing");
                        self.client.replace(&binding_ref, &body).await?;
                    }
                    Err(e) => return Err(e),
                }
            }
            Grant::Membership { .. } => {
                let mut binding = self.client.get(&binding_ref).await?;
                if add_subject(&mut binding, username) {
                    self.client.replace(&binding_ref, &binding).await?;
                }
            }
        }
        debug!(binding = %binding_ref, "grant applied");
        Ok(())
    }

    async fn revoke_grant(&self, username: &str, grant: &Grant) -> Result<(), HarnessError> {
        let binding_ref = grant.binding_ref(username);
        match grant {
            Grant::Role { .. } => self.delete_ignoring_absent(&binding_ref).await,
            Grant::Membership { .. } => {
                let mut binding = match self.client.get(&binding_ref).await {
                    Ok(binding) => binding,
                    Err(e) if e.is_not_found() => return Ok(()),
                    Err(e) => return Err(deprovision_error(&binding_ref, e)),
                };
                if remove_subject(&mut binding, username) {
                    match self.client.replace(&binding_ref, &binding).await {
                        Ok(()) => {}
                        Err(e) if e.is_not_found() => {}
                        Err(e) => return Err(deprovision_error(&binding_ref, e)),
                    }
                }
                Ok(())
            }
        }
    }

    async fn delete_ignoring_absent(&self, target: &ResourceRef) -> Result<(), HarnessError> {
        match self.client.delete(target).await {
            Ok(()) => {
                debug!(target = %target, "delete requested");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(target = %target, "already absent");
                Ok(())
            }
            Err(e) => Err(deprovision_error(target, e)),
        }
    }

    async fn confirm_absent(&self, scope_ref: &ResourceRef, scope: &str) -> Result<(), HarnessError> {
        let client = &self.client;
        let probe = move || async move {
            match client.get(scope_ref).await {
                Ok(_) => Err(ProbeError::from(HarnessError::NotConverged(format!(
                    "{scope_ref} still terminating"
                )))),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(ProbeError::from(e)),
            }
        };

        match self.poller.poll("scope-deletion", &self.confirm, probe).await {
            Ok(_) => Ok(()),
            Err(HarnessError::DeadlineExceeded { deadline, .. }) => {
                Err(HarnessError::ConfirmationTimeout {
                    scope: scope.to_owned(),
                    deadline,
                })
            }
            Err(e) => Err(e),
        }
    }
}

fn deprovision_error(target: &ResourceRef, err: HarnessError) -> HarnessError {
    HarnessError::Deprovision {
        resource: target.to_string(),
        reason: err.to_string(),
    }
}

fn user_subject(username: &str) -> Value {
    json!({
        "apiGroup": RBAC_API_GROUP,
        "kind": "User",
        "name": username,
    })
}

fn is_user_subject(subject: &Value, username: &str) -> bool {
    subject.get("kind").and_then(Value::as_str) == Some("User")
        && subject.get("name").and_then(Value::as_str) == Some(username)
}

/// 바인딩에 사용자 subject를 추가합니다. 변경이 있으면 `true`.
fn add_subject(binding: &mut Value, username: &str) -> bool {
    let Some(obj) = binding.as_object_mut() else {
        return false;
    };
    let subjects = obj
        .entry("subjects")
        .or_insert_with(|| Value::Array(Vec::new()));
    if subjects.is_null() {
        *subjects = Value::Array(Vec::new());
    }
    let Some(list) = subjects.as_array_mut() else {
        return false;
    };
    if list.iter().any(|s| is_user_subject(s, username)) {
        return false;
    }
    list.push(user_subject(username));
    true
}

/// 바인딩에서 사용자 subject를 제거합니다. 변경이 있으면 `true`.
fn remove_subject(binding: &mut Value, username: &str) -> bool {
    let Some(list) = binding.get_mut("subjects").and_then(Value::as_array_mut) else {
        return false;
    };
    let before = list.len();
    list.retain(|s| !is_user_subject(s, username));
    list.len() != before
}
