//! TFTP 서버 (세션 디스패처)
//!
//! - 잘 알려진 포트에서 RRQ/WRQ만 받음
//! - 요청마다 새 ephemeral 포트의 세션을 독립 태스크로 실행
//! - 같은 상대의 세션이 아직 전송 중이면 요청 재전송으로 보고 무시
//!   (완료 후 대기 중인 세션은 새 요청을 막지 않음)

use std::net::{IpAddr, SocketAddr};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::channel::{Channel, Flow, MessageHandler};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::message::{ErrorCode, Message, Request};
use crate::options::{negotiate_request, TransferOptions};
use crate::session::Session;
use crate::storage::{self, FileStorage, Storage};
use crate::transfer::{Direction, Transfer};

/// 세션 정보
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub filename: String,
    pub direction: Direction,
    pub started: Instant,
    finished: Arc<AtomicBool>,
}

impl SessionInfo {
    /// 전송이 끝나고 마지막 ACK 대기만 남았는지
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

/// TFTP 서버
pub struct Server {
    config: Arc<ServerConfig>,
    channel: Arc<Channel>,
    sessions: Arc<DashMap<SocketAddr, SessionInfo>>,
}

impl Server {
    /// 설정된 주소에 바인딩
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let channel = Channel::listen(config.bind_addr).await?;
        Ok(Self {
            config: Arc::new(config),
            channel: Arc::new(channel),
            sessions: Arc::new(DashMap::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.channel.local_addr()
    }

    /// `shutdown` 호출까지 요청 처리
    ///
    /// 이미 시작된 세션은 각자 끝날 때까지 계속 진행됨
    pub async fn run(&self) -> Result<()> {
        let local_ip = self.local_addr()?.ip();
        info!(
            "TFTP server listening on {} (root: {})",
            self.local_addr()?,
            self.config.root.display()
        );

        let mut dispatcher = Dispatcher {
            config: self.config.clone(),
            channel: self.channel.clone(),
            sessions: self.sessions.clone(),
            local_ip,
        };
        self.channel.receive_loop(&mut dispatcher).await
    }

    /// 대기 소켓 닫기
    pub fn shutdown(&self) {
        info!("TFTP server shutting down");
        self.channel.close();
    }

    /// 전송 중인 세션 수
    pub fn active_sessions(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| !entry.value().is_finished())
            .count()
    }

    /// 살아 있는 세션 목록 (완료 후 대기 중인 세션 포함)
    pub fn sessions(&self) -> Vec<(SocketAddr, SessionInfo)> {
        self.sessions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect()
    }
}

/// 대기 소켓의 메시지 핸들러
struct Dispatcher {
    config: Arc<ServerConfig>,
    channel: Arc<Channel>,
    sessions: Arc<DashMap<SocketAddr, SessionInfo>>,
    local_ip: IpAddr,
}

impl MessageHandler for Dispatcher {
    async fn on_message(&mut self, message: Message, from: SocketAddr) -> Flow {
        let (direction, request) = match message {
            Message::ReadRequest(request) => (Direction::Read, request),
            Message::WriteRequest(request) => (Direction::Write, request),
            other => {
                debug!("대기 포트에 {:?} 수신 ({})", other.opcode(), from);
                self.reply(Message::error(ErrorCode::IllegalOperation), from)
                    .await;
                return Flow::Continue;
            }
        };

        let busy = self
            .sessions
            .get(&from)
            .map_or(false, |info| !info.is_finished());
        if busy {
            debug!("진행 중인 세션의 요청 재전송 무시: {}", from);
            return Flow::Continue;
        }

        match self.prepare(direction, &request) {
            Ok(transfer) => self.spawn(transfer, request.filename, from).await,
            Err(e) => {
                warn!("{:?} {} 거부 ({}): {}", direction, request.filename, from, e);
                let reply = match &e {
                    Error::Rejected { code, message } => Message::error_with(*code, message.clone()),
                    other => Message::error(other.wire_code().unwrap_or(ErrorCode::NotDefined)),
                };
                self.reply(reply, from).await;
            }
        }

        Flow::Continue
    }
}

impl Dispatcher {
    /// 요청 검증, 옵션 협상, 저장소 열기
    ///
    /// 쓰기 요청은 협상이 끝난 뒤에 파일을 만들어 거부 시 기존 파일을 건드리지 않음
    fn prepare(&self, direction: Direction, request: &Request) -> Result<Transfer> {
        let mode = request.transfer_mode().ok_or_else(|| Error::Rejected {
            code: ErrorCode::IllegalOperation,
            message: format!("Unsupported mode: {}", request.mode),
        })?;
        let path = resolve(&self.config.root, &request.filename)?;
        let requested = TransferOptions::from_request(&request.options);
        let limits = self.config.limits();

        let (acked, storage): (TransferOptions, Box<dyn Storage>) = match direction {
            Direction::Read => {
                let mut storage = FileStorage::open(&path).map_err(open_failed)?;
                let file_len = match requested.tsize {
                    Some(_) => Some(storage::wire_len(&mut storage, mode).map_err(Error::Storage)?),
                    None => None,
                };
                let acked = negotiate_request(&requested, file_len, &limits)?;
                (acked, Box::new(storage))
            }
            Direction::Write => {
                let acked = negotiate_request(&requested, None, &limits)?;
                if !self.config.allow_overwrite && path.exists() {
                    return Err(Error::Rejected {
                        code: ErrorCode::FileAlreadyExists,
                        message: ErrorCode::FileAlreadyExists.description().to_string(),
                    });
                }
                let storage = FileStorage::create(&path).map_err(|e| Error::Rejected {
                    code: ErrorCode::from_io(&e),
                    message: e.to_string(),
                })?;
                (acked, Box::new(storage))
            }
        };

        Ok(Transfer::server(
            direction,
            mode,
            acked,
            self.config.retransmit_interval(),
            storage,
        ))
    }

    async fn spawn(&self, transfer: Transfer, filename: String, peer: SocketAddr) {
        let channel = match Channel::accept(self.local_ip, peer).await {
            Ok(channel) => Arc::new(channel),
            Err(e) => {
                warn!("세션 소켓 생성 실패 ({}): {}", peer, e);
                self.reply(Message::error(ErrorCode::NotDefined), peer).await;
                return;
            }
        };

        let direction = transfer.direction();
        info!(
            "{:?} {} ({}) from {}",
            direction,
            filename,
            transfer.mode().as_str(),
            peer
        );

        // 같은 상대의 대기 중 세션이 있으면 새 세션이 자리를 대신함
        let finished = Arc::new(AtomicBool::new(false));
        self.sessions.insert(
            peer,
            SessionInfo {
                filename: filename.clone(),
                direction,
                started: Instant::now(),
                finished: finished.clone(),
            },
        );

        let sessions = self.sessions.clone();
        let max_retries = self.config.max_retries;

        tokio::spawn(async move {
            let session =
                Session::new(transfer, channel, max_retries).with_finished_flag(finished.clone());
            match session.run().await {
                Ok(stats) => info!("{} {} 완료: {}", peer, filename, stats.summary()),
                Err(e) => warn!("{} {} 실패: {}", peer, filename, e),
            }
            sessions.remove_if(&peer, |_, info| Arc::ptr_eq(&info.finished, &finished));
        });
    }

    async fn reply(&self, message: Message, to: SocketAddr) {
        if let Err(e) = self.channel.send_to(&message, to).await {
            warn!("에러 응답 실패 ({}): {}", to, e);
        }
    }
}

/// 서비스 루트 아래 경로로 변환
///
/// 절대 경로와 `..`은 루트를 벗어나므로 거부
fn resolve(root: &Path, filename: &str) -> Result<PathBuf> {
    let relative = Path::new(filename);
    let escapes = filename.is_empty()
        || relative.components().any(|component| {
            !matches!(component, Component::Normal(_) | Component::CurDir)
        });

    if escapes {
        return Err(Error::Rejected {
            code: ErrorCode::AccessViolation,
            message: format!("Access outside root denied: {}", filename),
        });
    }

    Ok(root.join(relative))
}

/// 읽기용 열기 실패 → 에러 코드
fn open_failed(err: std::io::Error) -> Error {
    let code = match err.kind() {
        std::io::ErrorKind::PermissionDenied => ErrorCode::AccessViolation,
        _ => ErrorCode::FileNotFound,
    };
    Error::Rejected {
        code,
        message: code.description().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TransferMode;

    #[test]
    fn test_resolve_rejects_escape() {
        let root = Path::new("/srv/tftp");

        assert_eq!(
            resolve(root, "boot/pxelinux.0").unwrap(),
            PathBuf::from("/srv/tftp/boot/pxelinux.0")
        );
        for name in ["../etc/passwd", "/etc/passwd", "a/../../b", ""] {
            match resolve(root, name) {
                Err(Error::Rejected { code, .. }) => assert_eq!(code, ErrorCode::AccessViolation),
                other => panic!("{}: unexpected {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_open_failure_maps_to_not_found() {
        let err = open_failed(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert!(matches!(err, Error::Rejected { code: ErrorCode::FileNotFound, .. }));
    }

    #[tokio::test]
    async fn test_rejects_unsupported_mode() {
        let dir = tempfile::tempdir().unwrap();
        let dispatcher = Dispatcher {
            config: Arc::new(ServerConfig::new(dir.path())),
            channel: Arc::new(Channel::listen("127.0.0.1:0".parse().unwrap()).await.unwrap()),
            sessions: Arc::new(DashMap::new()),
            local_ip: "127.0.0.1".parse().unwrap(),
        };

        let mut request = Request::new("file", TransferMode::Octet);
        request.mode = "mail".to_string();

        match dispatcher.prepare(Direction::Read, &request) {
            Err(Error::Rejected { code, .. }) => assert_eq!(code, ErrorCode::IllegalOperation),
            Err(other) => panic!("unexpected: {:?}", other),
            Ok(_) => panic!("mail mode accepted"),
        }
    }
}
