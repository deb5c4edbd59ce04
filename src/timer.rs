//! 재전송 타이머
//!
//! 세션당 하나의 재전송 대상만 유지. 다시 arm하면 이전 대상을 대체함.
//! 타이머 태스크는 채널의 송신 경로만 사용하고 세션 상태는 건드리지 않음

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::Channel;
use crate::message::Message;

/// 단일 대상 재전송 타이머
pub struct RetransmitTimer {
    channel: Arc<Channel>,
    task: Option<JoinHandle<()>>,
    /// 누적 재전송 횟수
    resends: Arc<AtomicU64>,
}

impl RetransmitTimer {
    pub fn new(channel: Arc<Channel>) -> Self {
        Self {
            channel,
            task: None,
            resends: Arc::new(AtomicU64::new(0)),
        }
    }

    /// `interval`마다 최대 `max_retries`번 재전송
    ///
    /// 한도를 다 쓰고 한 간격 더 응답이 없으면 채널을 만료시킴
    pub fn arm(&mut self, message: Message, interval: Duration, max_retries: u32) {
        self.cancel();

        let channel = self.channel.clone();
        let resends = self.resends.clone();

        self.task = Some(tokio::spawn(async move {
            for attempt in 1..=max_retries {
                tokio::time::sleep(interval).await;
                if let Err(e) = channel.send(&message).await {
                    debug!("재전송 중단: {}", e);
                    return;
                }
                resends.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "재전송 {}/{}: {:?}",
                    attempt,
                    max_retries,
                    message.opcode()
                );
            }

            tokio::time::sleep(interval).await;
            warn!(
                "재전송 한도 초과 ({}회), 세션 종료: {:?}",
                max_retries,
                channel.peer_addr()
            );
            channel.expire(max_retries);
        }));
    }

    /// 대기 중인 재전송 취소
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_armed(&self) -> bool {
        self.task.as_ref().map_or(false, |task| !task.is_finished())
    }

    /// 지금까지의 재전송 횟수
    pub fn resends(&self) -> u64 {
        self.resends.load(Ordering::Relaxed)
    }
}

impl Drop for RetransmitTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{Flow, MessageHandler};
    use crate::Error;
    use std::net::SocketAddr;
    use tokio::net::UdpSocket;

    struct Ignore;

    impl MessageHandler for Ignore {
        async fn on_message(&mut self, _message: Message, _from: SocketAddr) -> Flow {
            Flow::Continue
        }
    }

    #[tokio::test]
    async fn test_resends_exactly_max_retries_then_expires() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let channel = Arc::new(
            Channel::accept("127.0.0.1".parse().unwrap(), peer.local_addr().unwrap())
                .await
                .unwrap(),
        );
        let mut timer = RetransmitTimer::new(channel.clone());

        timer.arm(Message::Ack { block: 3 }, Duration::from_millis(20), 3);

        let result = tokio::time::timeout(Duration::from_secs(5), channel.receive_loop(&mut Ignore))
            .await
            .unwrap();
        assert!(matches!(result, Err(Error::Timeout { retries: 3 })));
        assert_eq!(timer.resends(), 3);

        let mut buf = [0u8; 16];
        for _ in 0..3 {
            let (n, _) = peer.recv_from(&mut buf).await.unwrap();
            assert_eq!(Message::decode(&buf[..n]).unwrap(), Message::Ack { block: 3 });
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_resends() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let channel = Arc::new(
            Channel::accept("127.0.0.1".parse().unwrap(), peer.local_addr().unwrap())
                .await
                .unwrap(),
        );
        let mut timer = RetransmitTimer::new(channel.clone());

        timer.arm(Message::Ack { block: 1 }, Duration::from_millis(30), 5);
        assert!(timer.is_armed());
        timer.cancel();
        assert!(!timer.is_armed());

        let mut buf = [0u8; 16];
        let received =
            tokio::time::timeout(Duration::from_millis(150), peer.recv_from(&mut buf)).await;
        assert!(received.is_err());
        assert_eq!(timer.resends(), 0);
        assert!(!channel.is_closed());
    }

    #[tokio::test]
    async fn test_rearm_replaces_target() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let channel = Arc::new(
            Channel::accept("127.0.0.1".parse().unwrap(), peer.local_addr().unwrap())
                .await
                .unwrap(),
        );
        let mut timer = RetransmitTimer::new(channel.clone());

        timer.arm(Message::Ack { block: 1 }, Duration::from_millis(500), 1);
        timer.arm(Message::Ack { block: 2 }, Duration::from_millis(20), 1);

        let mut buf = [0u8; 16];
        let (n, _) = peer.recv_from(&mut buf).await.unwrap();
        assert_eq!(Message::decode(&buf[..n]).unwrap(), Message::Ack { block: 2 });
        timer.cancel();
    }
}
