//! TFTP 메시지 정의 및 와이어 코덱
//!
//! 모든 정수 필드는 빅엔디언, 문자열은 NUL 종결

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::DecodeError;

/// 옵션 맵 (키 → 값, 모두 ASCII 문자열)
pub type OptionMap = BTreeMap<String, String>;

/// 메시지 타입 (opcode)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Opcode {
    /// 읽기 요청
    ReadRequest = 1,

    /// 쓰기 요청
    WriteRequest = 2,

    /// 데이터 블록
    Data = 3,

    /// 수신 확인
    Acknowledge = 4,

    /// 에러
    Error = 5,

    /// 옵션 확인 (RFC 2347)
    OptionAck = 6,
}

impl Opcode {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            1 => Some(Opcode::ReadRequest),
            2 => Some(Opcode::WriteRequest),
            3 => Some(Opcode::Data),
            4 => Some(Opcode::Acknowledge),
            5 => Some(Opcode::Error),
            6 => Some(Opcode::OptionAck),
            _ => None,
        }
    }
}

/// 에러 코드 (RFC 1350 고정 테이블)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotDefined,
    FileNotFound,
    AccessViolation,
    DiskFull,
    IllegalOperation,
    UnknownTransferId,
    FileAlreadyExists,
    NoSuchUser,
    /// 테이블 밖의 코드 (예: RFC 2347의 8번)
    Other(u16),
}

impl ErrorCode {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => ErrorCode::NotDefined,
            1 => ErrorCode::FileNotFound,
            2 => ErrorCode::AccessViolation,
            3 => ErrorCode::DiskFull,
            4 => ErrorCode::IllegalOperation,
            5 => ErrorCode::UnknownTransferId,
            6 => ErrorCode::FileAlreadyExists,
            7 => ErrorCode::NoSuchUser,
            other => ErrorCode::Other(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            ErrorCode::NotDefined => 0,
            ErrorCode::FileNotFound => 1,
            ErrorCode::AccessViolation => 2,
            ErrorCode::DiskFull => 3,
            ErrorCode::IllegalOperation => 4,
            ErrorCode::UnknownTransferId => 5,
            ErrorCode::FileAlreadyExists => 6,
            ErrorCode::NoSuchUser => 7,
            ErrorCode::Other(code) => code,
        }
    }

    /// 표준 에러 문구
    pub fn description(self) -> &'static str {
        match self {
            ErrorCode::NotDefined | ErrorCode::Other(_) => "Not defined",
            ErrorCode::FileNotFound => "File not found",
            ErrorCode::AccessViolation => "Access violation",
            ErrorCode::DiskFull => "Disk full or allocation exceeded",
            ErrorCode::IllegalOperation => "Illegal TFTP operation",
            ErrorCode::UnknownTransferId => "Unknown transfer ID",
            ErrorCode::FileAlreadyExists => "File already exists",
            ErrorCode::NoSuchUser => "No such user",
        }
    }

    /// 저장소 IO 에러를 와이어 에러 코드로 변환
    pub fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => ErrorCode::FileNotFound,
            io::ErrorKind::AlreadyExists => ErrorCode::FileAlreadyExists,
            _ => ErrorCode::AccessViolation,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.as_u16(), self.description())
    }
}

/// 전송 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferMode {
    /// 바이너리 그대로
    #[default]
    Octet,

    /// 줄바꿈을 CR LF로 정규화하는 텍스트 모드
    Netascii,
}

impl TransferMode {
    /// 모드 문자열 파싱 (대소문자 무시)
    pub fn parse(mode: &str) -> Option<Self> {
        if mode.eq_ignore_ascii_case("octet") {
            Some(TransferMode::Octet)
        } else if mode.eq_ignore_ascii_case("netascii") {
            Some(TransferMode::Netascii)
        } else {
            None
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransferMode::Octet => "octet",
            TransferMode::Netascii => "netascii",
        }
    }
}

/// 읽기/쓰기 요청 본문
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub filename: String,
    pub mode: String,
    pub options: OptionMap,
}

impl Request {
    pub fn new(filename: impl Into<String>, mode: TransferMode) -> Self {
        Self {
            filename: filename.into(),
            mode: mode.as_str().to_string(),
            options: OptionMap::new(),
        }
    }

    pub fn transfer_mode(&self) -> Option<TransferMode> {
        TransferMode::parse(&self.mode)
    }
}

/// 통합 메시지 enum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    ReadRequest(Request),
    WriteRequest(Request),
    Data { block: u16, payload: Bytes },
    Ack { block: u16 },
    Error { code: ErrorCode, message: String },
    OptionAck { options: OptionMap },
}

impl Message {
    /// 코드만으로 에러 메시지 생성 (표준 문구 사용)
    pub fn error(code: ErrorCode) -> Self {
        Message::Error {
            code,
            message: code.description().to_string(),
        }
    }

    pub fn error_with(code: ErrorCode, message: impl Into<String>) -> Self {
        Message::Error {
            code,
            message: message.into(),
        }
    }

    /// 메시지 타입 반환
    pub fn opcode(&self) -> Opcode {
        match self {
            Message::ReadRequest(_) => Opcode::ReadRequest,
            Message::WriteRequest(_) => Opcode::WriteRequest,
            Message::Data { .. } => Opcode::Data,
            Message::Ack { .. } => Opcode::Acknowledge,
            Message::Error { .. } => Opcode::Error,
            Message::OptionAck { .. } => Opcode::OptionAck,
        }
    }

    /// 바이트로 직렬화
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u16(self.opcode() as u16);

        match self {
            Message::ReadRequest(req) | Message::WriteRequest(req) => {
                put_cstr(&mut buf, &req.filename);
                put_cstr(&mut buf, &req.mode);
                put_options(&mut buf, &req.options);
            }
            Message::Data { block, payload } => {
                buf.put_u16(*block);
                buf.put_slice(payload);
            }
            Message::Ack { block } => {
                buf.put_u16(*block);
            }
            Message::Error { code, message } => {
                buf.put_u16(code.as_u16());
                put_cstr(&mut buf, message);
            }
            Message::OptionAck { options } => {
                put_options(&mut buf, options);
            }
        }

        buf.freeze()
    }

    /// 바이트에서 역직렬화
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = bytes;
        let raw_opcode = take_u16(&mut buf)?;
        let opcode = Opcode::from_u16(raw_opcode).ok_or(DecodeError::UnknownOpcode(raw_opcode))?;

        let message = match opcode {
            Opcode::ReadRequest | Opcode::WriteRequest => {
                let filename = take_cstr(&mut buf)?;
                let mode = take_cstr(&mut buf)?;
                let options = take_options(&mut buf)?;
                let req = Request {
                    filename,
                    mode,
                    options,
                };
                if opcode == Opcode::ReadRequest {
                    Message::ReadRequest(req)
                } else {
                    Message::WriteRequest(req)
                }
            }
            Opcode::Data => {
                let block = take_u16(&mut buf)?;
                Message::Data {
                    block,
                    payload: Bytes::copy_from_slice(buf),
                }
            }
            Opcode::Acknowledge => Message::Ack {
                block: take_u16(&mut buf)?,
            },
            Opcode::Error => {
                let code = ErrorCode::from_u16(take_u16(&mut buf)?);
                let message = take_cstr(&mut buf)?;
                Message::Error { code, message }
            }
            Opcode::OptionAck => Message::OptionAck {
                options: take_options(&mut buf)?,
            },
        };

        Ok(message)
    }

    fn encoded_len(&self) -> usize {
        let options_len =
            |opts: &OptionMap| opts.iter().map(|(k, v)| k.len() + v.len() + 2).sum::<usize>();

        2 + match self {
            Message::ReadRequest(req) | Message::WriteRequest(req) => {
                req.filename.len() + req.mode.len() + 2 + options_len(&req.options)
            }
            Message::Data { payload, .. } => 2 + payload.len(),
            Message::Ack { .. } => 2,
            Message::Error { message, .. } => 2 + message.len() + 1,
            Message::OptionAck { options } => options_len(options),
        }
    }
}

fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}

fn put_options(buf: &mut BytesMut, options: &OptionMap) {
    for (key, value) in options {
        put_cstr(buf, key);
        put_cstr(buf, value);
    }
}

fn take_u16(buf: &mut &[u8]) -> Result<u16, DecodeError> {
    if buf.remaining() < 2 {
        return Err(DecodeError::Truncated);
    }
    Ok(buf.get_u16())
}

fn take_cstr(buf: &mut &[u8]) -> Result<String, DecodeError> {
    let end = buf
        .iter()
        .position(|&b| b == 0)
        .ok_or(DecodeError::Truncated)?;
    let s = String::from_utf8_lossy(&buf[..end]).into_owned();
    buf.advance(end + 1);
    Ok(s)
}

fn take_options(buf: &mut &[u8]) -> Result<OptionMap, DecodeError> {
    let mut options = OptionMap::new();
    while buf.has_remaining() {
        let key = take_cstr(buf)?;
        let value = take_cstr(buf)?;
        options.insert(key, value);
    }
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(msg: Message) {
        let bytes = msg.encode();
        let restored = Message::decode(&bytes).unwrap();
        assert_eq!(msg, restored);
    }

    #[test]
    fn test_request_encoding() {
        let mut req = Request::new("file.txt", TransferMode::Octet);
        req.options.insert("blksize".into(), "1024".into());

        let bytes = Message::ReadRequest(req.clone()).encode();
        assert_eq!(&bytes[..2], &[0, 1]);
        assert_eq!(&bytes[2..], b"file.txt\0octet\0blksize\x001024\0");

        round_trip(Message::ReadRequest(req.clone()));
        round_trip(Message::WriteRequest(req));
    }

    #[test]
    fn test_request_without_options() {
        round_trip(Message::WriteRequest(Request::new("a", TransferMode::Netascii)));
    }

    #[test]
    fn test_data_edge_blocks() {
        round_trip(Message::Data {
            block: 0,
            payload: Bytes::new(),
        });
        round_trip(Message::Data {
            block: 65535,
            payload: Bytes::from(vec![0u8; 512]),
        });

        let bytes = Message::Data {
            block: 0x0102,
            payload: Bytes::from_static(b"xy"),
        }
        .encode();
        assert_eq!(bytes.as_ref(), &[0, 3, 1, 2, b'x', b'y']);
    }

    #[test]
    fn test_ack_and_error() {
        round_trip(Message::Ack { block: 0 });
        round_trip(Message::Ack { block: 65535 });
        round_trip(Message::error_with(ErrorCode::NotDefined, "디스크 오류 ✗"));
        round_trip(Message::error(ErrorCode::Other(8)));
    }

    #[test]
    fn test_error_table_lookup() {
        let Message::Error { code, message } = Message::error(ErrorCode::DiskFull) else {
            panic!("not an error message");
        };
        assert_eq!(code.as_u16(), 3);
        assert_eq!(message, "Disk full or allocation exceeded");
        assert_eq!(ErrorCode::from_u16(4).description(), "Illegal TFTP operation");
    }

    #[test]
    fn test_option_ack() {
        round_trip(Message::OptionAck {
            options: OptionMap::new(),
        });

        let mut options = OptionMap::new();
        options.insert("tsize".into(), "10000".into());
        options.insert("windowsize".into(), "4".into());
        round_trip(Message::OptionAck { options });
    }

    #[test]
    fn test_decode_failures() {
        assert_eq!(Message::decode(&[]), Err(DecodeError::Truncated));
        assert_eq!(Message::decode(&[0]), Err(DecodeError::Truncated));
        assert_eq!(Message::decode(&[0, 9, 0, 0]), Err(DecodeError::UnknownOpcode(9)));
        assert_eq!(Message::decode(&[0, 4, 1]), Err(DecodeError::Truncated));
        assert_eq!(Message::decode(b"\x00\x01file"), Err(DecodeError::Truncated));
        assert_eq!(
            Message::decode(b"\x00\x06blksize\x00512"),
            Err(DecodeError::Truncated)
        );
        assert_eq!(Message::decode(b"\x00\x05\x00\x01oops"), Err(DecodeError::Truncated));
    }

    #[test]
    fn test_transfer_mode_parse() {
        assert_eq!(TransferMode::parse("OCTET"), Some(TransferMode::Octet));
        assert_eq!(TransferMode::parse("NetAscii"), Some(TransferMode::Netascii));
        assert_eq!(TransferMode::parse("mail"), None);
    }
}
