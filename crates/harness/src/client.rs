//! 컨트롤 플레인 API 추상화
//!
//! [`ControlPlaneClient`] 트레이트는 하네스가 사용하는 리소스 연산을 추상화합니다.
//! 프로덕션 코드는 [`KubectlClient`](crate::kubectl::KubectlClient)를,
//! 테스트는 `MockControlPlane`을 사용합니다.
//!
//! ```text
//! ┌──────────────────────┐
//! │ ScenarioOrchestrator │
//! └──────────┬───────────┘
//!            │
//!            ▼
//!  ┌────────────────────┐
//!  │ControlPlaneClient  │ (trait)
//!  └────────────────────┘
//!        │        │
//!        ▼        ▼
//!   ┌────────┐ ┌──────┐
//!   │Kubectl │ │ Mock │
//!   └───┬────┘ └──────┘
//!       │
//!       ▼
//!   API server
//! ```

use std::future::Future;

use serde_json::Value;

use converge_core::types::ResourceRef;

use crate::error::HarnessError;
use crate::session::SessionArtifact;

/// 컨트롤 플레인 리소스 연산 추상화
///
/// # Error Handling
///
/// - 대상이 없으면 `HarnessError::NotFound`
/// - 생성 시 이미 있으면 `HarnessError::AlreadyExists`
/// - 그 외는 `HarnessError::ControlPlane`
pub trait ControlPlaneClient: Send + Sync + 'static {
    /// 객체를 조회합니다.
    fn get(
        &self,
        target: &ResourceRef,
    ) -> impl Future<Output = Result<Value, HarnessError>> + Send;

    /// 객체를 생성합니다. `body`는 `apiVersion`/`kind`/`metadata`를 포함한 전체 객체입니다.
    fn create(
        &self,
        target: &ResourceRef,
        body: &Value,
    ) -> impl Future<Output = Result<(), HarnessError>> + Send;

    /// 기존 객체를 교체합니다.
    fn replace(
        &self,
        target: &ResourceRef,
        body: &Value,
    ) -> impl Future<Output = Result<(), HarnessError>> + Send;

    /// 객체 삭제를 요청합니다. 완료를 기다리지 않습니다.
    fn delete(&self, target: &ResourceRef)
    -> impl Future<Output = Result<(), HarnessError>> + Send;

    /// 세션 자격 증명으로 매니페스트를 스코프에 적용합니다 (fire-and-forget).
    fn apply_manifest(
        &self,
        manifest: &str,
        scope: &str,
        session: &SessionArtifact,
    ) -> impl Future<Output = Result<(), HarnessError>> + Send;

    /// 세션 교환에 사용할 API 서버 URL
    fn server_url(&self) -> impl Future<Output = Result<String, HarnessError>> + Send;
}

/// 테스트용 인메모리 컨트롤 플레인
///
/// - 네임스페이스 삭제는 `deletion_delay` 동안 Terminating 상태로 남습니다.
/// - 네임스페이스를 삭제하면 그 안의 객체도 함께 사라집니다.
/// - `apply_manifest`는 `with_propagation`으로 등록한 객체를 지연 후 나타나게 합니다.
#[cfg(test)]
pub mod mock {
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::time::Duration;

    use serde_json::Value;
    use tokio::time::Instant;

    use converge_core::types::{NAMESPACES, ResourceRef};

    use super::ControlPlaneClient;
    use crate::error::HarnessError;
    use crate::session::SessionArtifact;

    #[derive(Default)]
    struct State {
        objects: HashMap<ResourceRef, Value>,
        terminating: HashMap<ResourceRef, Option<Instant>>,
        pending: Vec<(Instant, ResourceRef, Value)>,
        calls: Vec<String>,
        applied: Vec<String>,
    }

    /// 테스트용 Mock 컨트롤 플레인
    #[derive(Default)]
    pub struct MockControlPlane {
        state: Mutex<State>,
        deletion_delay: Duration,
        stuck_deletion: bool,
        failing_deletes: HashSet<String>,
        fail_apply: bool,
        propagation: Vec<(Duration, ResourceRef, Value)>,
    }

    impl MockControlPlane {
        /// 빈 클러스터를 생성합니다.
        pub fn new() -> Self {
            Self::default()
        }

        /// 객체를 미리 넣어 둡니다.
        pub fn with_object(self, target: ResourceRef, body: Value) -> Self {
            self.state
                .lock()
                .unwrap()
                .objects
                .insert(target, body);
            self
        }

        /// 네임스페이스 삭제 완료까지의 지연을 설정합니다.
        pub fn with_deletion_delay(mut self, delay: Duration) -> Self {
            self.deletion_delay = delay;
            self
        }

        /// 네임스페이스 삭제가 끝나지 않도록 설정합니다.
        pub fn with_stuck_deletion(mut self) -> Self {
            self.stuck_deletion = true;
            self
        }

        /// 해당 리소스 종류의 삭제가 실패하도록 설정합니다.
        pub fn with_failing_deletes(mut self, resource: &str) -> Self {
            self.failing_deletes.insert(resource.to_owned());
            self
        }

        /// 매니페스트 적용이 거부되도록 설정합니다.
        pub fn with_failing_apply(mut self) -> Self {
            self.fail_apply = true;
            self
        }

        /// 매니페스트 적용 후 `delay`가 지나면 나타날 객체를 등록합니다.
        pub fn with_propagation(mut self, delay: Duration, target: ResourceRef, body: Value) -> Self {
            self.propagation.push((delay, target, body));
            self
        }

        /// 객체가 (Terminating 포함) 존재하는지 확인합니다.
        pub fn contains(&self, target: &ResourceRef) -> bool {
            let mut state = self.state.lock().unwrap();
            Self::settle(&mut state);
            state.objects.contains_key(target)
        }

        /// 저장된 객체를 반환합니다.
        pub fn object(&self, target: &ResourceRef) -> Option<Value> {
            let mut state = self.state.lock().unwrap();
            Self::settle(&mut state);
            state.objects.get(target).cloned()
        }

        /// 해당 리소스 종류 객체 수
        pub fn count(&self, resource: &str, namespace: Option<&str>) -> usize {
            let mut state = self.state.lock().unwrap();
            Self::settle(&mut state);
            state
                .objects
                .keys()
                .filter(|r| r.resource == resource && r.namespace.as_deref() == namespace)
                .count()
        }

        /// 호출 기록 (`"verb target"` 형식)
        pub fn calls(&self) -> Vec<String> {
            self.state.lock().unwrap().calls.clone()
        }

        /// 적용된 매니페스트 목록
        pub fn applied(&self) -> Vec<String> {
            self.state.lock().unwrap().applied.clone()
        }

        /// 시간이 지난 삭제/전파를 반영합니다.
        fn settle(state: &mut State) {
            let now = Instant::now();
            let finished: Vec<ResourceRef> = state
                .terminating
                .iter()
                .filter(|(_, until)| until.is_some_and(|t| t <= now))
                .map(|(r, _)| r.clone())
                .collect();
            for target in finished {
                state.terminating.remove(&target);
                state.objects.remove(&target);
            }

            let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(|(at, _, _)| *at <= now);
            state.pending = waiting;
            for (_, target, body) in ready {
                state.objects.insert(target, body);
            }
        }
    }

    impl ControlPlaneClient for MockControlPlane {
        async fn get(&self, target: &ResourceRef) -> Result<Value, HarnessError> {
            let mut state = self.state.lock().unwrap();
            Self::settle(&mut state);
            state.calls.push(format!("get {target}"));
            state
                .objects
                .get(target)
                .cloned()
                .ok_or_else(|| HarnessError::NotFound(target.to_string()))
        }

        async fn create(&self, target: &ResourceRef, body: &Value) -> Result<(), HarnessError> {
            let mut state = self.state.lock().unwrap();
            Self::settle(&mut state);
            state.calls.push(format!("create {target}"));
            if let Some(ns) = &target.namespace {
                let scope = ResourceRef::scope(ns.clone());
                if state.terminating.contains_key(&scope) {
                    return Err(HarnessError::ControlPlane(format!(
                        "namespace {ns} is being terminated"
                    )));
                }
            }
            if state.objects.contains_key(target) {
                return Err(HarnessError::AlreadyExists(target.to_string()));
            }
            state.objects.insert(target.clone(), body.clone());
            Ok(())
        }

        async fn replace(&self, target: &ResourceRef, body: &Value) -> Result<(), HarnessError> {
            let mut state = self.state.lock().unwrap();
            Self::settle(&mut state);
            state.calls.push(format!("replace {target}"));
            match state.objects.get_mut(target) {
                Some(existing) => {
                    *existing = body.clone();
                    Ok(())
                }
                None => Err(HarnessError::NotFound(target.to_string())),
            }
        }

        async fn delete(&self, target: &ResourceRef) -> Result<(), HarnessError> {
            let mut state = self.state.lock().unwrap();
            Self::settle(&mut state);
            state.calls.push(format!("delete {target}"));
            if self.failing_deletes.contains(&target.resource) {
                return Err(HarnessError::ControlPlane(format!(
                    "delete {target} refused"
                )));
            }
            if !state.objects.contains_key(target) {
                return Err(HarnessError::NotFound(target.to_string()));
            }

            if target.resource == NAMESPACES {
                state
                    .objects
                    .retain(|r, _| r.namespace.as_deref() != Some(target.name.as_str()));
                let until = if self.stuck_deletion {
                    None
                } else {
                    Some(Instant::now() + self.deletion_delay)
                };
                state.terminating.entry(target.clone()).or_insert(until);
                Self::settle(&mut state);
            } else {
                state.objects.remove(target);
            }
            Ok(())
        }

        async fn apply_manifest(
            &self,
            manifest: &str,
            scope: &str,
            _session: &SessionArtifact,
        ) -> Result<(), HarnessError> {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("apply {scope}"));
            if self.fail_apply {
                return Err(HarnessError::ControlPlane("apply rejected".to_owned()));
            }
            state.applied.push(manifest.to_owned());
            let now = Instant::now();
            for (delay, target, body) in &self.propagation {
                state.pending.push((now + *delay, target.clone(), body.clone()));
            }
            Self::settle(&mut state);
            Ok(())
        }

        async fn server_url(&self) -> Result<String, HarnessError> {
            Ok("https://api.mock:6443".to_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::ControlPlaneClient;
    use super::mock::MockControlPlane;
    use crate::error::HarnessError;
    use converge_core::types::ResourceRef;

    #[tokio::test]
    async fn mock_get_missing_is_not_found() {
        let client = MockControlPlane::new();
        let err = client.get(&ResourceRef::scope("test-a")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn mock_create_twice_conflicts() {
        let client = MockControlPlane::new();
        let scope = ResourceRef::scope("test-a");
        client.create(&scope, &json!({})).await.unwrap();
        let err = client.create(&scope, &json!({})).await.unwrap_err();
        assert!(matches!(err, HarnessError::AlreadyExists(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn mock_namespace_deletion_is_delayed_and_cascades() {
        let client = MockControlPlane::new().with_deletion_delay(Duration::from_secs(3));
        let scope = ResourceRef::scope("test-a");
        let secret = ResourceRef::secret("test-a", "sec-a");
        client.create(&scope, &json!({})).await.unwrap();
        client.create(&secret, &json!({})).await.unwrap();

        client.delete(&scope).await.unwrap();
        assert!(!client.contains(&secret));
        assert!(client.get(&scope).await.is_ok());
        assert!(client.create(&secret, &json!({})).await.is_err());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(client.get(&scope).await.unwrap_err().is_not_found());
    }

    #[tokio::test(start_paused = true)]
    async fn mock_propagation_appears_after_delay() {
        let target = ResourceRef::namespaced("widgets.example.io", "test-a", "w1");
        let client = MockControlPlane::new().with_propagation(
            Duration::from_secs(2),
            target.clone(),
            json!({"spec": {}}),
        );
        let session = crate::session::SessionArtifact::external("/dev/null");
        client.apply_manifest("kind: Widget", "test-a", &session).await.unwrap();
        assert!(client.get(&target).await.is_err());
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(client.get(&target).await.is_ok());
        assert_eq!(client.applied(), vec!["kind: Widget"]);
    }
}
