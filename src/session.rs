//! 전송 세션 (상태 머신 구동)
//!
//! `Transfer`가 돌려준 동작을 채널과 타이머에 적용함.
//! 세션 상태는 수신 루프 태스크에서만 변경됨

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channel::{Channel, Flow, MessageHandler};
use crate::error::{Error, Result};
use crate::message::Message;
use crate::stats::TransferStats;
use crate::timer::RetransmitTimer;
use crate::transfer::{Action, State, Transfer};

/// 채널 하나에 묶인 전송 세션
pub struct Session {
    transfer: Transfer,
    channel: Arc<Channel>,
    timer: RetransmitTimer,
    max_retries: u32,
    /// 완료 후 마지막 ACK 재전송 대기 중
    dallying: bool,
    /// 전송 단계가 끝나면 세움 (대기 시간 전)
    finished: Option<Arc<AtomicBool>>,
}

impl Session {
    pub fn new(transfer: Transfer, channel: Arc<Channel>, max_retries: u32) -> Self {
        Self {
            timer: RetransmitTimer::new(channel.clone()),
            transfer,
            channel,
            max_retries,
            dallying: false,
            finished: None,
        }
    }

    /// 전송이 끝나는 시점(완료 후 대기 이전)을 알릴 플래그
    pub fn with_finished_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.finished = Some(flag);
        self
    }

    pub fn state(&self) -> State {
        self.transfer.state()
    }

    /// 전송이 끝날 때까지 실행
    ///
    /// 수신측은 완료 후 한 재전송 간격 동안 마지막 블록 재전송에 응답함
    pub async fn run(mut self) -> Result<TransferStats> {
        let channel = self.channel.clone();

        let actions = self.transfer.start();
        self.apply(actions).await;

        let loop_result = if self.transfer.is_finished() {
            Ok(())
        } else {
            channel.receive_loop(&mut self).await
        };

        if let Err(e) = loop_result {
            self.transfer.abort(e);
        } else if !self.transfer.is_finished() {
            self.transfer.abort(Error::ConnectionClosed);
        }

        self.timer.cancel();
        self.mark_finished();

        if self.transfer.state() == State::Completed && !self.transfer.is_sender() {
            self.dallying = true;
            let interval = self.transfer.interval();
            debug!("마지막 ACK 대기: {:?}", interval);
            let _ = tokio::time::timeout(interval, channel.receive_loop(&mut self)).await;
        }

        channel.close();

        let resends = self.timer.resends();
        let mut transfer = self.transfer;
        transfer.stats_mut().timer_retransmissions = resends;

        match transfer.state() {
            State::Completed => Ok(transfer.stats().clone()),
            _ => Err(transfer.take_failure().unwrap_or(Error::ConnectionClosed)),
        }
    }

    fn mark_finished(&self) {
        if let Some(flag) = &self.finished {
            flag.store(true, Ordering::Release);
        }
    }

    async fn apply(&mut self, actions: Vec<Action>) {
        for action in actions {
            match action {
                Action::Send(message) => {
                    if let Err(e) = self.channel.send(&message).await {
                        warn!("송신 실패: {}", e);
                        self.transfer.abort(e);
                        return;
                    }
                }
                Action::Arm(message) => {
                    self.timer
                        .arm(message, self.transfer.interval(), self.max_retries);
                }
                Action::Cancel => self.timer.cancel(),
            }
        }
    }
}

impl MessageHandler for Session {
    async fn on_message(&mut self, message: Message, from: SocketAddr) -> Flow {
        debug!("{} 수신: {:?}", from, message.opcode());

        let actions = self.transfer.handle(message);
        // 마지막 ACK가 나가기 전에 표시해야 상대의 다음 요청이 막히지 않음
        if self.transfer.is_finished() {
            self.mark_finished();
        }
        self.apply(actions).await;

        if self.dallying || !self.transfer.is_finished() {
            Flow::Continue
        } else {
            if self.transfer.state() == State::Completed {
                info!("세션 종료: {}", from);
            }
            Flow::Stop
        }
    }
}
