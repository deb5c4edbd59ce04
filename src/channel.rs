//! 전송 채널 (UDP 소켓 래퍼)
//!
//! - 수신 루프는 한 번에 하나의 메시지만 핸들러로 전달
//! - 송신은 `send_to` 한 번이므로 타이머 태스크와 동시에 호출해도 안전
//! - 클라이언트 채널은 첫 수신 시 상대 포트를 고정 (ephemeral turn-around)

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::message::{ErrorCode, Message};
use crate::{Error, Result, MTU};

/// 핸들러 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

/// 디코딩된 메시지를 받는 쪽
pub trait MessageHandler: Send {
    fn on_message(
        &mut self,
        message: Message,
        from: SocketAddr,
    ) -> impl Future<Output = Flow> + Send;
}

/// 상대 주소 바인딩 방식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Binding {
    /// 대기 소켓: 누구에게서든 받고 `send_to`로 응답
    Listen,
    /// 첫 수신 시 상대 포트 고정
    TurnAround,
    /// 상대 고정됨
    Locked,
}

/// UDP 전송 채널
pub struct Channel {
    socket: UdpSocket,
    peer: RwLock<Option<SocketAddr>>,
    binding: RwLock<Binding>,
    closed: AtomicBool,
    /// 타이머가 만료시켰을 때의 재전송 횟수
    expired: Mutex<Option<u32>>,
    shutdown: Notify,
}

impl Channel {
    fn with_socket(socket: UdpSocket, peer: Option<SocketAddr>, binding: Binding) -> Self {
        Self {
            socket,
            peer: RwLock::new(peer),
            binding: RwLock::new(binding),
            closed: AtomicBool::new(false),
            expired: Mutex::new(None),
            shutdown: Notify::new(),
        }
    }

    /// 잘 알려진 포트에서 요청 대기 (디스패처용)
    pub async fn listen(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self::with_socket(socket, None, Binding::Listen))
    }

    /// 서버로 요청을 보낼 클라이언트 채널
    ///
    /// 응답이 다른 포트에서 오면 그 포트로 갈아탐
    pub async fn connect(server: SocketAddr) -> Result<Self> {
        let local = match server.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(local).await?;
        Ok(Self::with_socket(socket, Some(server), Binding::TurnAround))
    }

    /// 요청한 클라이언트 전용 세션 채널 (새 ephemeral 포트)
    pub async fn accept(local_ip: IpAddr, peer: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddr::new(local_ip, 0)).await?;
        Ok(Self::with_socket(socket, Some(peer), Binding::Locked))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        *self.peer.read()
    }

    /// 바인딩된 상대에게 전송
    pub async fn send(&self, message: &Message) -> Result<()> {
        let peer = self.peer_addr().ok_or(Error::ConnectionClosed)?;
        self.send_to(message, peer).await
    }

    /// 지정 주소로 전송
    pub async fn send_to(&self, message: &Message, addr: SocketAddr) -> Result<()> {
        if self.is_closed() {
            return Err(Error::ConnectionClosed);
        }
        let bytes = message.encode();
        self.socket.send_to(&bytes, addr).await?;
        Ok(())
    }

    /// 채널 닫기: 수신 루프 종료
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.shutdown.notify_one();
        }
    }

    /// 재전송 한도 초과로 닫기
    pub fn expire(&self, retries: u32) {
        *self.expired.lock() = Some(retries);
        self.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// 수신 루프
    ///
    /// 핸들러가 `Flow::Stop`을 반환하거나 채널이 닫히면 종료.
    /// 타이머가 채널을 만료시켰으면 `Error::Timeout` 반환
    pub async fn receive_loop<H: MessageHandler>(&self, handler: &mut H) -> Result<()> {
        let mut buf = vec![0u8; MTU];

        while !self.is_closed() {
            let (len, from) = tokio::select! {
                _ = self.shutdown.notified() => break,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("수신 에러: {}", e);
                        continue;
                    }
                },
            };

            if !self.accept_source(from).await {
                continue;
            }

            let message = match Message::decode(&buf[..len]) {
                Ok(message) => message,
                Err(e) => {
                    debug!("잘못된 데이터그램 무시 ({}): {}", from, e);
                    continue;
                }
            };

            if handler.on_message(message, from).await == Flow::Stop {
                break;
            }
        }

        match *self.expired.lock() {
            Some(retries) => Err(Error::Timeout { retries }),
            None => Ok(()),
        }
    }

    /// 송신지 검사 및 turn-around 처리
    async fn accept_source(&self, from: SocketAddr) -> bool {
        let binding = *self.binding.read();
        match binding {
            Binding::Listen => true,
            Binding::TurnAround => {
                let expected = self.peer_addr();
                if expected.map_or(true, |peer| peer.ip() == from.ip()) {
                    *self.peer.write() = Some(from);
                    *self.binding.write() = Binding::Locked;
                    debug!("상대 포트 고정: {}", from);
                    true
                } else {
                    self.reject_stranger(from).await;
                    false
                }
            }
            Binding::Locked => {
                if self.peer_addr() == Some(from) {
                    true
                } else {
                    self.reject_stranger(from).await;
                    false
                }
            }
        }
    }

    async fn reject_stranger(&self, from: SocketAddr) {
        debug!("알 수 없는 송신지 {}: Unknown transfer ID 응답", from);
        if let Err(e) = self
            .send_to(&Message::error(ErrorCode::UnknownTransferId), from)
            .await
        {
            warn!("에러 응답 실패: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    struct Collect(Vec<Message>);

    impl MessageHandler for Collect {
        async fn on_message(&mut self, message: Message, _from: SocketAddr) -> Flow {
            self.0.push(message);
            if self.0.len() == 2 {
                Flow::Stop
            } else {
                Flow::Continue
            }
        }
    }

    #[tokio::test]
    async fn test_turn_around_and_malformed_drop() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let server_addr = server.local_addr().unwrap();
        let channel = Channel::connect(server_addr).await.unwrap();
        let client_port = channel.local_addr().unwrap().port();
        let client_addr: SocketAddr = format!("127.0.0.1:{}", client_port).parse().unwrap();

        channel.send(&Message::Ack { block: 0 }).await.unwrap();
        let mut buf = [0u8; 16];
        let (n, _) = server.recv_from(&mut buf).await.unwrap();
        assert_eq!(Message::decode(&buf[..n]).unwrap(), Message::Ack { block: 0 });

        // 다른 포트에서 응답 → 그 포트로 고정
        let session = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let session_addr = session.local_addr().unwrap();
        session.send_to(&[0, 99], client_addr).await.unwrap();
        session
            .send_to(&Message::Ack { block: 1 }.encode(), client_addr)
            .await
            .unwrap();
        session
            .send_to(&Message::Ack { block: 2 }.encode(), client_addr)
            .await
            .unwrap();

        let mut handler = Collect(Vec::new());
        tokio::time::timeout(Duration::from_secs(5), channel.receive_loop(&mut handler))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            handler.0,
            vec![Message::Ack { block: 1 }, Message::Ack { block: 2 }]
        );
        assert_eq!(channel.peer_addr(), Some(session_addr));
    }

    #[tokio::test]
    async fn test_close_unblocks_receive_loop() {
        let channel = std::sync::Arc::new(Channel::listen("127.0.0.1:0".parse().unwrap()).await.unwrap());
        let closer = channel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            closer.close();
        });

        let mut handler = Collect(Vec::new());
        tokio::time::timeout(Duration::from_secs(5), channel.receive_loop(&mut handler))
            .await
            .unwrap()
            .unwrap();
        assert!(channel.send_to(&Message::Ack { block: 0 }, "127.0.0.1:9".parse().unwrap()).await.is_err());
    }

    #[tokio::test]
    async fn test_locked_channel_rejects_stranger() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let stranger = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let channel = Channel::accept("127.0.0.1".parse().unwrap(), peer.local_addr().unwrap())
            .await
            .unwrap();
        let channel_addr = channel.local_addr().unwrap();

        stranger
            .send_to(&Message::Ack { block: 7 }.encode(), channel_addr)
            .await
            .unwrap();
        peer.send_to(&Message::Ack { block: 1 }.encode(), channel_addr)
            .await
            .unwrap();
        peer.send_to(&Message::Ack { block: 2 }.encode(), channel_addr)
            .await
            .unwrap();

        let mut handler = Collect(Vec::new());
        tokio::time::timeout(Duration::from_secs(5), channel.receive_loop(&mut handler))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            handler.0,
            vec![Message::Ack { block: 1 }, Message::Ack { block: 2 }]
        );

        let mut buf = [0u8; 64];
        let (n, _) = stranger.recv_from(&mut buf).await.unwrap();
        assert!(matches!(
            Message::decode(&buf[..n]).unwrap(),
            Message::Error { code: ErrorCode::UnknownTransferId, .. }
        ));
    }
}
