//! 비밀번호 생성기
//!
//! [`SecretGenerator`]는 주입된 난수 소스에서 `[min_bytes, max_bytes]` 범위의
//! 균등한 길이를 고른 뒤 그만큼의 바이트를 읽어 16진수 문자열로 인코딩합니다.
//! 기본 소스는 운영체제 CSPRNG(`OsRng`)이며, 테스트에서는 결정적인 소스를
//! 주입할 수 있습니다.

use std::fmt;

use rand::RngCore;
use rand::rngs::OsRng;

use crate::error::HarnessError;

/// 길이 선택 시 거부 샘플링 최대 반복 횟수
const MAX_LENGTH_DRAWS: u32 = 32;

/// 생성된 비밀번호
///
/// `Debug`/`Display` 출력은 항상 가려집니다. 실제 값은 [`Password::expose`]로만
/// 꺼낼 수 있습니다.
#[derive(Clone, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    /// 평문 값을 반환합니다. 로그 필드로 넘기지 마십시오.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// 인코딩 전 바이트 수
    pub fn byte_len(&self) -> usize {
        self.0.len() / 2
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

impl fmt::Display for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// 비밀번호 생성기
pub struct SecretGenerator<R: RngCore = OsRng> {
    source: R,
    min_bytes: usize,
    max_bytes: usize,
}

impl SecretGenerator<OsRng> {
    /// 운영체제 난수 소스를 사용하는 생성기를 만듭니다.
    pub fn new(min_bytes: usize, max_bytes: usize) -> Result<Self, HarnessError> {
        Self::with_source(OsRng, min_bytes, max_bytes)
    }
}

impl<R: RngCore> SecretGenerator<R> {
    /// 지정한 난수 소스를 사용하는 생성기를 만듭니다.
    pub fn with_source(source: R, min_bytes: usize, max_bytes: usize) -> Result<Self, HarnessError> {
        if min_bytes == 0 {
            return Err(HarnessError::Config {
                field: "password_min_bytes".to_owned(),
                reason: "must be greater than 0".to_owned(),
            });
        }
        if max_bytes < min_bytes {
            return Err(HarnessError::Config {
                field: "password_max_bytes".to_owned(),
                reason: format!("must be at least {min_bytes}"),
            });
        }
        Ok(Self {
            source,
            min_bytes,
            max_bytes,
        })
    }

    /// 새 비밀번호를 생성합니다.
    ///
    /// # Errors
    ///
    /// 난수 소스가 바이트를 공급하지 못하면 `HarnessError::EntropySource`를 반환합니다.
    pub fn generate(&mut self) -> Result<Password, HarnessError> {
        let len = self.pick_length()?;
        let mut buf = vec![0u8; len];
        self.source
            .try_fill_bytes(&mut buf)
            .map_err(|e| HarnessError::EntropySource(e.to_string()))?;
        Ok(Password(hex::encode(buf)))
    }

    /// `[min_bytes, max_bytes]`에서 균등하게 길이를 고릅니다.
    ///
    /// `rand`의 `gen_range`/`Uniform`은 소스 실패 시 panic하므로 `try_fill_bytes`
    /// 위에서 직접 거부 샘플링을 합니다.
    fn pick_length(&mut self) -> Result<usize, HarnessError> {
        let span = (self.max_bytes - self.min_bytes) as u64 + 1;
        // 2^32 이하에서 span의 가장 큰 배수; 이 값 이상은 버려야 편향이 없음
        let zone = ((u64::from(u32::MAX) + 1) / span) * span;

        for _ in 0..MAX_LENGTH_DRAWS {
            let mut raw = [0u8; 4];
            self.source
                .try_fill_bytes(&mut raw)
                .map_err(|e| HarnessError::EntropySource(e.to_string()))?;
            let value = u64::from(u32::from_le_bytes(raw));
            if value < zone {
                let offset = usize::try_from(value % span).unwrap_or(0);
                return Ok(self.min_bytes + offset);
            }
        }

        Err(HarnessError::EntropySource(format!(
            "no unbiased length after {MAX_LENGTH_DRAWS} draws"
        )))
    }
}
