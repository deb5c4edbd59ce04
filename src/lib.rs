//! # wtftp
//!
//! 윈도우 기반 TFTP 엔진 (RFC 1350 + 옵션 확장 2347/2348/2349/7440)
//!
//! ## 핵심 특징
//! - **옵션 협상**: blksize, tsize, timeout, windowsize
//! - **윈도우 전송**: ACK 하나로 여러 블록 확인, 손실 시 go-back 재전송
//! - **재전송 타이머**: 세션당 하나의 대상, 한도 초과 시 세션 실패
//! - **netascii**: 블록 경계에 안전한 줄바꿈 변환
//! - **블록 번호 롤오버**: 65535 블록을 넘는 파일 지원
//!
//! ## 구성
//! - `message`: 와이어 코덱
//! - `channel`: UDP 채널과 수신 루프
//! - `timer`: 재전송 타이머
//! - `transfer`: 전송 상태 머신 (IO 없음)
//! - `session`: 상태 머신 + 채널 + 타이머 구동
//! - `server` / `client`: 디스패처와 클라이언트

pub mod channel;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod netascii;
pub mod options;
pub mod server;
pub mod session;
pub mod stats;
pub mod storage;
pub mod timer;
pub mod transfer;

pub use channel::{Channel, Flow, MessageHandler};
pub use client::Client;
pub use config::{Config, ServerConfig};
pub use error::{DecodeError, Error, Result};
pub use message::{ErrorCode, Message, Request, TransferMode};
pub use options::{Negotiated, TransferOptions};
pub use server::Server;
pub use session::Session;
pub use stats::TransferStats;
pub use storage::{FileStorage, MemoryStorage, Storage};
pub use timer::RetransmitTimer;
pub use transfer::{Direction, State, Transfer};

/// 기본 서버 포트
pub const DEFAULT_PORT: u16 = 69;

/// 수신 버퍼 크기 (이더넷 MTU)
pub const MTU: usize = 1500;

/// MTU에 들어가는 최대 블록 크기 (opcode + 블록 번호 4바이트 제외)
pub const MAX_BLOCK_SIZE: usize = MTU - 4;

/// RFC 2348 최소 블록 크기
pub const MIN_BLOCK_SIZE: usize = 8;

/// 기본 블록 크기 (바이트)
pub const DEFAULT_BLOCK_SIZE: usize = 512;

/// 기본 윈도우 크기 (lock-step)
pub const DEFAULT_WINDOW_SIZE: u16 = 1;

/// 기본 최대 재전송 횟수
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// 기본 재전송 간격 (밀리초)
pub const DEFAULT_RETRANSMIT_INTERVAL_MS: u64 = 2000;
