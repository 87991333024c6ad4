//! 구조 검사 -- 찾은 객체의 중첩 배열 길이 확인

use serde::{Deserialize, Serialize};
use serde_json::Value;

use converge_core::config::ShapeConfig;

use crate::error::HarnessError;

/// `path` 끝의 값이 정확히 `count`개 원소를 가진 배열이어야 한다는 조건
///
/// 객체는 키로, 배열은 숫자 세그먼트(인덱스)로 따라갑니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShapeAssertion {
    /// JSON 경로
    pub path: Vec<String>,
    /// 기대 원소 수
    pub count: usize,
}

impl ShapeAssertion {
    /// 새 구조 조건을 생성합니다.
    pub fn new<S: Into<String>>(path: impl IntoIterator<Item = S>, count: usize) -> Self {
        Self {
            path: path.into_iter().map(Into::into).collect(),
            count,
        }
    }

    /// 점으로 이은 경로 (에러 메시지용)
    pub fn dotted_path(&self) -> String {
        self.path.join(".")
    }

    /// 객체가 조건을 만족하는지 검사합니다.
    ///
    /// # Errors
    ///
    /// 경로가 없거나, 배열이 아니거나, 길이가 다르면 `HarnessError::ShapeAssertion`.
    pub fn check(&self, object_name: &str, object: &Value) -> Result<(), HarnessError> {
        let mut current = object;
        for (depth, segment) in self.path.iter().enumerate() {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            current = next.ok_or_else(|| {
                self.failure(
                    object_name,
                    format!("missing segment '{segment}' at depth {depth}"),
                )
            })?;
        }

        let items = current.as_array().ok_or_else(|| {
            self.failure(object_name, format!("expected an array, found {}", kind(current)))
        })?;
        if items.len() != self.count {
            return Err(self.failure(
                object_name,
                format!("expected {} element(s), found {}", self.count, items.len()),
            ));
        }
        Ok(())
    }

    fn failure(&self, object_name: &str, reason: String) -> HarnessError {
        HarnessError::ShapeAssertion {
            object: object_name.to_owned(),
            path: self.dotted_path(),
            reason,
        }
    }
}

impl From<&ShapeConfig> for ShapeAssertion {
    fn from(config: &ShapeConfig) -> Self {
        Self {
            path: config.path.clone(),
            count: config.count,
        }
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
