//! 클라이언트/서버 설정

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use crate::message::TransferMode;
use crate::options::ServerLimits;
use crate::{DEFAULT_MAX_RETRIES, DEFAULT_PORT, DEFAULT_RETRANSMIT_INTERVAL_MS, MAX_BLOCK_SIZE};

/// 클라이언트 전송 설정
///
/// `None`인 옵션은 요청하지 않음 (서버 기본값 사용)
#[derive(Debug, Clone)]
pub struct Config {
    /// 전송 모드
    pub mode: TransferMode,

    /// 요청할 블록 크기 (MTU 상한 1496으로 잘림)
    pub block_size: Option<u16>,

    /// 요청할 윈도우 크기
    pub window_size: Option<u16>,

    /// 요청할 재전송 간격 (초, 1..=255)
    pub timeout: Option<u8>,

    /// tsize 옵션 요청 여부
    /// 읽기면 0, 쓰기면 로컬 길이를 보냄
    pub request_tsize: bool,

    /// 재전송 간격 (밀리초)
    /// timeout 옵션이 확인되면 그 값으로 대체됨
    pub retransmit_interval_ms: u64,

    /// 최대 재전송 횟수
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: TransferMode::Octet,
            block_size: None,
            window_size: None,
            timeout: None,
            request_tsize: false,
            retransmit_interval_ms: DEFAULT_RETRANSMIT_INTERVAL_MS, // 2초
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retransmit_interval(&self) -> Duration {
        Duration::from_millis(self.retransmit_interval_ms)
    }

    /// 요청에 실을 블록 크기
    pub fn requested_block_size(&self) -> Option<u16> {
        self.block_size.map(|size| size.min(MAX_BLOCK_SIZE as u16))
    }

    /// 대용량/저지연 링크용 설정
    pub fn high_throughput() -> Self {
        Self {
            mode: TransferMode::Octet,
            block_size: Some(MAX_BLOCK_SIZE as u16), // MTU에 맞춤
            window_size: Some(16),
            timeout: Some(1),
            request_tsize: true,
            retransmit_interval_ms: 1000,
            max_retries: 5,
        }
    }

    /// 손실이 잦은 네트워크용 설정
    pub fn unreliable_network() -> Self {
        Self {
            mode: TransferMode::Octet,
            block_size: Some(512),
            window_size: Some(2),               // 손실 시 재전송 범위 최소화
            timeout: Some(3),
            request_tsize: true,
            retransmit_interval_ms: 3000,
            max_retries: 8,
        }
    }
}

/// 서버 설정
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// 요청 대기 주소
    pub bind_addr: SocketAddr,

    /// 서비스 루트 디렉토리
    pub root: PathBuf,

    /// 최대 재전송 횟수
    pub max_retries: u32,

    /// 기본 재전송 간격 (밀리초)
    pub retransmit_interval_ms: u64,

    /// 허용할 최대 블록 크기
    pub blksize_max: Option<u16>,

    /// 쓰기 요청의 최대 파일 크기
    pub tsize_max: Option<u64>,

    /// 쓰기 요청으로 기존 파일 덮어쓰기 허용
    pub allow_overwrite: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            root: PathBuf::from("."),
            max_retries: DEFAULT_MAX_RETRIES,
            retransmit_interval_ms: DEFAULT_RETRANSMIT_INTERVAL_MS,
            blksize_max: None,
            tsize_max: None,
            allow_overwrite: true,
        }
    }
}

impl ServerConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn retransmit_interval(&self) -> Duration {
        Duration::from_millis(self.retransmit_interval_ms)
    }

    /// 협상 상한
    pub fn limits(&self) -> ServerLimits {
        ServerLimits {
            blksize_max: self.blksize_max,
            tsize_max: self.tsize_max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.retransmit_interval(), Duration::from_millis(2000));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.requested_block_size(), None);

        let server = ServerConfig::default();
        assert_eq!(server.bind_addr.port(), 69);
    }

    #[test]
    fn test_block_size_clamped_to_mtu() {
        let config = Config {
            block_size: Some(8192),
            ..Config::default()
        };
        assert_eq!(config.requested_block_size(), Some(1496));
    }
}
