//! 옵션 협상 (RFC 2347 / 2348 / 2349 / 7440)
//!
//! - 요청측: 요청한 옵션만 협상, OACK 값은 줄일 수만 있음
//! - 응답측: 블록 크기 상한 적용, tsize 채움/검증, 모르는 키는 버림

use std::time::Duration;

use crate::error::{Error, Result};
use crate::message::{ErrorCode, OptionMap};
use crate::{DEFAULT_BLOCK_SIZE, DEFAULT_WINDOW_SIZE, MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

pub const OPT_BLKSIZE: &str = "blksize";
pub const OPT_TSIZE: &str = "tsize";
pub const OPT_TIMEOUT: &str = "timeout";
pub const OPT_WINDOWSIZE: &str = "windowsize";

/// 옵션 맵의 타입 뷰
///
/// `None`은 "요청하지 않음/확인되지 않음"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferOptions {
    pub blksize: Option<u16>,
    pub tsize: Option<u64>,
    /// 재전송 간격 (초 단위, 1..=255)
    pub timeout: Option<u8>,
    pub windowsize: Option<u16>,
}

impl TransferOptions {
    pub fn is_empty(&self) -> bool {
        self.blksize.is_none()
            && self.tsize.is_none()
            && self.timeout.is_none()
            && self.windowsize.is_none()
    }

    /// 요청 맵 해석: 모르는 키와 형식이 잘못된 값은 조용히 버림
    pub fn from_request(map: &OptionMap) -> Self {
        let mut opts = Self::default();

        for (key, value) in map {
            let value = value.trim();
            match key.to_ascii_lowercase().as_str() {
                OPT_BLKSIZE => {
                    opts.blksize = value
                        .parse::<u16>()
                        .ok()
                        .filter(|&v| v as usize >= MIN_BLOCK_SIZE);
                }
                OPT_TSIZE => opts.tsize = value.parse().ok(),
                OPT_TIMEOUT => opts.timeout = value.parse().ok().filter(|&v| v >= 1),
                OPT_WINDOWSIZE => {
                    opts.windowsize = value.parse().ok().filter(|&v| v >= 1);
                }
                _ => {}
            }
        }

        opts
    }

    pub fn to_map(&self) -> OptionMap {
        let mut map = OptionMap::new();
        if let Some(v) = self.blksize {
            map.insert(OPT_BLKSIZE.to_string(), v.to_string());
        }
        if let Some(v) = self.tsize {
            map.insert(OPT_TSIZE.to_string(), v.to_string());
        }
        if let Some(v) = self.timeout {
            map.insert(OPT_TIMEOUT.to_string(), v.to_string());
        }
        if let Some(v) = self.windowsize {
            map.insert(OPT_WINDOWSIZE.to_string(), v.to_string());
        }
        map
    }
}

/// 서버측 협상 상한
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerLimits {
    pub blksize_max: Option<u16>,
    pub tsize_max: Option<u64>,
}

/// 세션이 실제로 사용하는 값
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub block_size: usize,
    pub window_size: u16,
    pub interval: Duration,
    /// 알려진/선언된 전체 크기 (완료 시 권고 검사용)
    pub tsize: Option<u64>,
}

impl Negotiated {
    pub fn defaults(interval: Duration) -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            window_size: DEFAULT_WINDOW_SIZE,
            interval,
            tsize: None,
        }
    }

    /// 확인된 옵션을 기본값 위에 적용
    pub fn apply(mut self, acked: &TransferOptions) -> Self {
        if let Some(v) = acked.blksize {
            self.block_size = v as usize;
        }
        if let Some(v) = acked.windowsize {
            self.window_size = v;
        }
        if let Some(v) = acked.timeout {
            self.interval = Duration::from_secs(v as u64);
        }
        if acked.tsize.is_some() {
            self.tsize = acked.tsize;
        }
        self
    }
}

/// 서버측 협상: 요청 옵션 중 받아들일 것을 결정
///
/// `file_len`은 읽기 요청일 때 실제 파일 길이. 쓰기 요청이면 `None`이며
/// 선언된 tsize를 `tsize_max`로 검증함
pub fn negotiate_request(
    requested: &TransferOptions,
    file_len: Option<u64>,
    limits: &ServerLimits,
) -> Result<TransferOptions> {
    let mut acked = TransferOptions::default();

    if let Some(req) = requested.blksize {
        let cap = limits.blksize_max.unwrap_or(u16::MAX).min(MAX_BLOCK_SIZE as u16);
        let value = req.min(cap);
        if value as usize >= MIN_BLOCK_SIZE {
            acked.blksize = Some(value);
        }
    }

    if let Some(declared) = requested.tsize {
        match file_len {
            Some(len) => acked.tsize = Some(len),
            None => {
                if let Some(max) = limits.tsize_max {
                    if declared > max {
                        return Err(Error::Rejected {
                            code: ErrorCode::DiskFull,
                            message: format!("File size {} exceeds limit {}", declared, max),
                        });
                    }
                }
                acked.tsize = Some(declared);
            }
        }
    }

    acked.timeout = requested.timeout;
    acked.windowsize = requested.windowsize;

    Ok(acked)
}

/// 클라이언트측: 서버 OACK 적용
///
/// 요청하지 않은 옵션은 제거, 요청보다 큰 값은 프로토콜 위반
pub fn apply_option_ack(
    requested: &TransferOptions,
    oack: &OptionMap,
    base: Negotiated,
) -> Result<Negotiated> {
    let mut acked = TransferOptions::default();

    for (key, value) in oack {
        let key = key.to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            OPT_BLKSIZE => {
                if let Some(req) = requested.blksize {
                    let v: u16 = parse_acked(&key, value)?;
                    if v > req || (v as usize) < MIN_BLOCK_SIZE {
                        return Err(enlarged(&key, v as u64, req as u64));
                    }
                    acked.blksize = Some(v);
                }
            }
            OPT_WINDOWSIZE => {
                if let Some(req) = requested.windowsize {
                    let v: u16 = parse_acked(&key, value)?;
                    if v > req || v == 0 {
                        return Err(enlarged(&key, v as u64, req as u64));
                    }
                    acked.windowsize = Some(v);
                }
            }
            OPT_TIMEOUT => {
                if let Some(req) = requested.timeout {
                    let v: u8 = parse_acked(&key, value)?;
                    if v > req || v == 0 {
                        return Err(enlarged(&key, v as u64, req as u64));
                    }
                    acked.timeout = Some(v);
                }
            }
            OPT_TSIZE => {
                if requested.tsize.is_some() {
                    acked.tsize = Some(parse_acked(&key, value)?);
                }
            }
            _ => {}
        }
    }

    Ok(base.apply(&acked))
}

fn parse_acked<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| Error::ProtocolViolation(format!("잘못된 옵션 값: {}={}", key, value)))
}

fn enlarged(key: &str, got: u64, requested: u64) -> Error {
    Error::ProtocolViolation(format!(
        "옵션 {} 값 {}이 요청값 {} 범위를 벗어남",
        key, got, requested
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> OptionMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_request_parsing_drops_unknown() {
        let opts = TransferOptions::from_request(&map(&[
            ("BLKSIZE", "1024"),
            ("multicast", ""),
            ("windowsize", "0"),
            ("tsize", "abc"),
        ]));

        assert_eq!(opts.blksize, Some(1024));
        assert_eq!(opts.windowsize, None);
        assert_eq!(opts.tsize, None);
        assert_eq!(opts.timeout, None);
    }

    #[test]
    fn test_server_caps_block_size() {
        let requested = TransferOptions {
            blksize: Some(1024),
            ..Default::default()
        };
        let limits = ServerLimits {
            blksize_max: Some(512),
            tsize_max: None,
        };

        let acked = negotiate_request(&requested, Some(0), &limits).unwrap();
        assert_eq!(acked.blksize, Some(512));

        // MTU 상한
        let requested = TransferOptions {
            blksize: Some(65464),
            ..Default::default()
        };
        let acked = negotiate_request(&requested, None, &ServerLimits::default()).unwrap();
        assert_eq!(acked.blksize, Some(MAX_BLOCK_SIZE as u16));
    }

    #[test]
    fn test_server_fills_tsize_on_read() {
        let requested = TransferOptions {
            tsize: Some(0),
            ..Default::default()
        };
        let acked = negotiate_request(&requested, Some(10_000), &ServerLimits::default()).unwrap();
        assert_eq!(acked.tsize, Some(10_000));
    }

    #[test]
    fn test_server_rejects_oversized_write() {
        let requested = TransferOptions {
            tsize: Some(4096),
            ..Default::default()
        };
        let limits = ServerLimits {
            blksize_max: None,
            tsize_max: Some(1024),
        };

        match negotiate_request(&requested, None, &limits) {
            Err(Error::Rejected { code, .. }) => assert_eq!(code, ErrorCode::DiskFull),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_client_strips_unrequested() {
        let requested = TransferOptions {
            blksize: Some(1024),
            ..Default::default()
        };
        let base = Negotiated::defaults(Duration::from_millis(2000));
        let negotiated = apply_option_ack(
            &requested,
            &map(&[("blksize", "512"), ("windowsize", "16"), ("foo", "bar")]),
            base,
        )
        .unwrap();

        assert_eq!(negotiated.block_size, 512);
        assert_eq!(negotiated.window_size, 1);
        assert_eq!(negotiated.interval, Duration::from_millis(2000));
    }

    #[test]
    fn test_client_rejects_enlarged_value() {
        let requested = TransferOptions {
            windowsize: Some(4),
            ..Default::default()
        };
        let base = Negotiated::defaults(Duration::from_secs(2));

        assert!(matches!(
            apply_option_ack(&requested, &map(&[("windowsize", "8")]), base),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_client_applies_timeout_and_tsize() {
        let requested = TransferOptions {
            timeout: Some(5),
            tsize: Some(0),
            ..Default::default()
        };
        let base = Negotiated::defaults(Duration::from_secs(2));
        let negotiated = apply_option_ack(
            &requested,
            &map(&[("timeout", "3"), ("tsize", "777")]),
            base,
        )
        .unwrap();

        assert_eq!(negotiated.interval, Duration::from_secs(3));
        assert_eq!(negotiated.tsize, Some(777));
    }
}
