//! 도메인 타입 — 컨트롤 플레인 리소스 식별자
//!
//! 하네스와 CLI가 공유하는 리소스 참조 타입을 정의합니다.

use std::fmt;

use serde::{Deserialize, Serialize};

/// 네임스페이스(스코프) 리소스 이름
pub const NAMESPACES: &str = "namespaces";

/// 시크릿 리소스 이름
pub const SECRETS: &str = "secrets";

/// 클러스터 역할 바인딩 리소스 이름
pub const CLUSTER_ROLE_BINDINGS: &str = "clusterrolebindings.rbac.authorization.k8s.io";

/// 컨트롤 플레인 리소스 참조
///
/// `resource`는 복수형 API 리소스 이름(필요하면 그룹 포함)입니다.
/// `namespace`가 `None`이면 클러스터 범위 리소스입니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    /// API 리소스 이름 (예: `secrets`, `policies.policy.open-cluster-management.io`)
    pub resource: String,
    /// 네임스페이스
    pub namespace: Option<String>,
    /// 객체 이름
    pub name: String,
}

impl ResourceRef {
    /// 네임스페이스 범위 리소스 참조를 생성합니다.
    pub fn namespaced(
        resource: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            resource: resource.into(),
            namespace: Some(namespace.into()),
            name: name.into(),
        }
    }

    /// 클러스터 범위 리소스 참조를 생성합니다.
    pub fn cluster(resource: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            namespace: None,
            name: name.into(),
        }
    }

    /// 스코프(네임스페이스) 자체를 가리키는 참조
    pub fn scope(name: impl Into<String>) -> Self {
        Self::cluster(NAMESPACES, name)
    }

    /// 스코프 안의 시크릿을 가리키는 참조
    pub fn secret(scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self::namespaced(SECRETS, scope, name)
    }

    /// 클러스터 역할 바인딩을 가리키는 참조
    pub fn cluster_role_binding(name: impl Into<String>) -> Self {
        Self::cluster(CLUSTER_ROLE_BINDINGS, name)
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}/{}", self.resource, ns, self.name),
            None => write!(f, "{}/{}", self.resource, self.name),
        }
    }
}
