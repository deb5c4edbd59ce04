//! 에러 타입 정의

use thiserror::Error;

use crate::message::ErrorCode;

/// 데이터그램 디코딩 에러
///
/// 수신 루프에서 조용히 버려지며 상태 머신까지 올라가지 않음
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("잘린 데이터그램: 종결자 또는 고정 필드 누락")]
    Truncated,

    #[error("알 수 없는 opcode: {0}")]
    UnknownOpcode(u16),
}

/// TFTP 엔진 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("디코딩 에러: {0}")]
    Decode(#[from] DecodeError),

    #[error("저장소 에러: {0}")]
    Storage(std::io::Error),

    #[error("프로토콜 위반: {0}")]
    ProtocolViolation(String),

    #[error("상대측 에러 ({code}): {message}")]
    Peer { code: ErrorCode, message: String },

    #[error("전송 거부 ({code}): {message}")]
    Rejected { code: ErrorCode, message: String },

    #[error("재전송 한도 초과: {retries}회 재전송 후 응답 없음")]
    Timeout { retries: u32 },

    #[error("연결 종료")]
    ConnectionClosed,
}

impl Error {
    /// 상대측에 보낼 에러 코드 (해당되는 경우)
    pub fn wire_code(&self) -> Option<ErrorCode> {
        match self {
            Error::Storage(e) => Some(ErrorCode::from_io(e)),
            Error::ProtocolViolation(_) => Some(ErrorCode::IllegalOperation),
            Error::Rejected { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
