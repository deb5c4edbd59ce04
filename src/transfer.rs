//! 전송 상태 머신
//!
//! 소켓도 타이머도 모르는 순수 상태 머신. 입력 메시지마다 수행할
//! `Action` 목록을 돌려주고, 실제 송신/타이머 조작은 `Session`이 담당함.
//!
//! ```text
//! Requesting ─▶ Negotiating ─▶ Transferring ─▶ Completed
//!                    │               │
//!                    └──────▶ Failed ◀┘
//! ```
//!
//! - 송신측 (RRQ 서버, WRQ 클라이언트): 윈도우만큼 블록을 보내고 ACK로 전진
//! - 수신측 (WRQ 서버, RRQ 클라이언트): 순서대로 온 블록만 기록하고
//!   윈도우 경계/순서 어긋남/마지막 블록에서 ACK
//! - 블록 번호는 내부적으로 u64, 와이어에서는 u16 (롤오버)

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::{ErrorCode, Message, OptionMap, Request, TransferMode};
use crate::options::{apply_option_ack, Negotiated, TransferOptions};
use crate::stats::TransferStats;
use crate::storage::{BlockReader, BlockWriter, Storage};

/// 세션 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// 요청 전송 전 (클라이언트)
    Requesting,
    /// OACK 또는 첫 블록/ACK 0 대기
    Negotiating,
    Transferring,
    Completed,
    Failed,
}

/// 요청 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// RRQ: 서버 → 클라이언트
    Read,
    /// WRQ: 클라이언트 → 서버
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Client,
    Server,
}

/// 세션이 수행할 동작
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// 상대에게 전송
    Send(Message),
    /// 재전송 타이머를 이 메시지로 (재)설정
    Arm(Message),
    /// 재전송 타이머 취소
    Cancel,
}

/// 송신측 상태
struct Outgoing {
    reader: BlockReader,
    /// 마지막으로 확인된 블록
    last_ack: u64,
    /// 보냈지만 확인되지 않은 블록 (last_ack + 1 부터)
    in_flight: VecDeque<Bytes>,
    /// 마지막 (짧은) 블록을 읽었는지
    final_sent: bool,
}

impl Outgoing {
    fn highest_sent(&self) -> u64 {
        self.last_ack + self.in_flight.len() as u64
    }
}

/// 수신측 상태
struct Incoming {
    writer: BlockWriter,
    /// 마지막으로 기록한 블록
    last_data: u64,
    /// 마지막으로 ACK한 블록
    last_ack: u64,
}

enum Endpoint {
    Sender(Outgoing),
    Receiver(Incoming),
}

/// 단일 전송 상태 머신
pub struct Transfer {
    role: Role,
    direction: Direction,
    mode: TransferMode,
    state: State,
    filename: String,
    /// 요청한 옵션 (클라이언트) 또는 확인한 옵션 (서버)
    options: TransferOptions,
    negotiated: Negotiated,
    endpoint: Endpoint,
    stats: TransferStats,
    failure: Option<Error>,
}

impl Transfer {
    /// 클라이언트 세션
    ///
    /// 쓰기 요청에서 tsize를 요청하면 로컬 와이어 길이를 계산해 실음
    pub fn client(
        direction: Direction,
        config: &Config,
        filename: impl Into<String>,
        storage: Box<dyn Storage>,
    ) -> Result<Self> {
        let mode = config.mode;
        let mut options = TransferOptions {
            blksize: config.requested_block_size(),
            tsize: None,
            timeout: config.timeout,
            windowsize: config.window_size,
        };

        let endpoint = match direction {
            Direction::Read => {
                if config.request_tsize {
                    options.tsize = Some(0);
                }
                Endpoint::Receiver(Incoming::new(BlockWriter::new(storage, mode)))
            }
            Direction::Write => {
                let mut reader = BlockReader::new(storage, mode);
                if config.request_tsize {
                    options.tsize = Some(reader.wire_len().map_err(Error::Storage)?);
                }
                Endpoint::Sender(Outgoing::new(reader))
            }
        };

        Ok(Self {
            role: Role::Client,
            direction,
            mode,
            state: State::Requesting,
            filename: filename.into(),
            options,
            negotiated: Negotiated::defaults(config.retransmit_interval()),
            endpoint,
            stats: TransferStats::new(),
            failure: None,
        })
    }

    /// 서버 세션
    ///
    /// `acked`는 디스패처가 이미 협상해 확인한 옵션. 비어 있으면 OACK 없이 시작
    pub fn server(
        direction: Direction,
        mode: TransferMode,
        acked: TransferOptions,
        interval: Duration,
        storage: Box<dyn Storage>,
    ) -> Self {
        let endpoint = match direction {
            Direction::Read => Endpoint::Sender(Outgoing::new(BlockReader::new(storage, mode))),
            Direction::Write => Endpoint::Receiver(Incoming::new(BlockWriter::new(storage, mode))),
        };
        let negotiated = Negotiated::defaults(interval).apply(&acked);
        let mut stats = TransferStats::new();
        stats.block_size = negotiated.block_size;
        stats.window_size = negotiated.window_size;

        Self {
            role: Role::Server,
            direction,
            mode,
            state: State::Negotiating,
            filename: String::new(),
            options: acked,
            negotiated,
            endpoint,
            stats,
            failure: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, State::Completed | State::Failed)
    }

    /// 송신측 여부
    pub fn is_sender(&self) -> bool {
        matches!(self.endpoint, Endpoint::Sender(_))
    }

    /// 현재 재전송 간격 (timeout 옵션 반영)
    pub fn interval(&self) -> Duration {
        self.negotiated.interval
    }

    pub fn negotiated(&self) -> &Negotiated {
        &self.negotiated
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut TransferStats {
        &mut self.stats
    }

    /// 실패 원인 꺼내기
    pub fn take_failure(&mut self) -> Option<Error> {
        self.failure.take()
    }

    /// 첫 동작
    ///
    /// 클라이언트는 요청을, 서버는 OACK 또는 첫 블록/ACK 0을 보냄
    pub fn start(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();

        match self.role {
            Role::Client => {
                if self.state != State::Requesting {
                    return actions;
                }
                let mut request = Request::new(self.filename.clone(), self.mode);
                request.options = self.options.to_map();
                let message = match self.direction {
                    Direction::Read => Message::ReadRequest(request),
                    Direction::Write => Message::WriteRequest(request),
                };
                debug!("요청 전송: {:?} {}", self.direction, self.filename);
                actions.push(Action::Send(message.clone()));
                actions.push(Action::Arm(message));
                self.state = State::Negotiating;
            }
            Role::Server => {
                if self.options.is_empty() {
                    // 옵션 없음: RFC 1350 방식으로 바로 시작
                    self.state = State::Transferring;
                    if self.is_sender() {
                        self.advance_window(&mut actions);
                    } else {
                        ack_zero(&mut actions);
                    }
                } else {
                    let oack = Message::OptionAck {
                        options: self.options.to_map(),
                    };
                    actions.push(Action::Send(oack.clone()));
                    actions.push(Action::Arm(oack));
                }
            }
        }

        actions
    }

    /// 수신 메시지 처리
    pub fn handle(&mut self, message: Message) -> Vec<Action> {
        let mut actions = Vec::new();

        match self.state {
            State::Requesting => {}
            State::Negotiating => self.on_negotiating(message, &mut actions),
            State::Transferring => self.on_transferring(message, &mut actions),
            State::Completed => self.on_completed(message, &mut actions),
            State::Failed => {}
        }

        actions
    }

    /// 외부 원인(타임아웃, 송신 실패)으로 실패 처리. 상대에게는 아무것도 보내지 않음
    pub fn abort(&mut self, error: Error) {
        if self.is_finished() {
            return;
        }
        warn!("전송 중단: {}", error);
        self.state = State::Failed;
        self.stats.finish();
        self.failure = Some(error);
    }

    fn on_negotiating(&mut self, message: Message, actions: &mut Vec<Action>) {
        match (self.role, message) {
            (_, Message::Error { code, message }) => self.on_peer_error(code, message, actions),

            (Role::Client, Message::OptionAck { options }) => {
                if let Err(e) = self.apply_oack(&options) {
                    self.fail(e, actions);
                    return;
                }
                actions.push(Action::Cancel);
                self.enter_transferring();
                if self.is_sender() {
                    self.advance_window(actions);
                } else {
                    ack_zero(actions);
                }
            }

            // 옵션 없이 시작 (서버가 옵션을 무시했거나 요청하지 않음)
            (Role::Client, Message::Ack { block: 0 }) if self.is_sender() => {
                actions.push(Action::Cancel);
                self.enter_transferring();
                self.advance_window(actions);
            }
            (Role::Client, message @ Message::Data { .. }) if !self.is_sender() => {
                actions.push(Action::Cancel);
                self.enter_transferring();
                self.on_data(message, actions);
            }

            // OACK에 대한 응답
            (Role::Server, Message::Ack { block: 0 }) if self.is_sender() => {
                actions.push(Action::Cancel);
                self.enter_transferring();
                self.advance_window(actions);
            }
            (Role::Server, Message::Ack { block }) if self.is_sender() => {
                debug!("협상 중 ACK {} 무시", block);
                self.stats.ignored_acks += 1;
            }
            (Role::Server, message @ Message::Data { .. }) if !self.is_sender() => {
                actions.push(Action::Cancel);
                self.enter_transferring();
                self.on_data(message, actions);
            }

            (_, other) => self.unexpected(other, actions),
        }
    }

    fn on_transferring(&mut self, message: Message, actions: &mut Vec<Action>) {
        match message {
            Message::Error { code, message } => self.on_peer_error(code, message, actions),
            Message::Ack { block } if self.is_sender() => self.on_ack(block, actions),
            message @ Message::Data { .. } if !self.is_sender() => self.on_data(message, actions),
            Message::OptionAck { .. } if self.role == Role::Client => {
                // 첫 블록 전의 OACK 재전송은 손실의 흔적
                let before_first_block = match &self.endpoint {
                    Endpoint::Sender(outgoing) => outgoing.last_ack == 0,
                    Endpoint::Receiver(incoming) => incoming.last_data == 0,
                };
                if !before_first_block {
                    self.fail(
                        Error::ProtocolViolation("전송 중 OACK 수신".to_string()),
                        actions,
                    );
                } else if self.is_sender() {
                    debug!("중복 OACK 무시");
                } else {
                    debug!("중복 OACK: ACK 0 재전송");
                    ack_zero(actions);
                }
            }
            other => self.unexpected(other, actions),
        }
    }

    /// 완료 후 마지막 블록 재전송에는 마지막 ACK로 다시 응답 (dally)
    /// 완료 후 수신측: 이미 받은 블록 재전송에는 마지막 ACK로 응답
    ///
    /// 송신측은 가장 오래된 미확인 블록부터 재전송하므로 윈도우 중간 블록도 받아줌
    fn on_completed(&mut self, message: Message, actions: &mut Vec<Action>) {
        if let (Endpoint::Receiver(incoming), Message::Data { block: wire_block, .. }) =
            (&self.endpoint, message)
        {
            let block = unwrap_block(wire_block, incoming.last_data);
            if block <= incoming.last_data {
                debug!(
                    "완료 후 블록 {} 재수신: ACK {} 재전송",
                    block, incoming.last_data
                );
                self.stats.duplicate_blocks += 1;
                actions.push(Action::Send(Message::Ack {
                    block: incoming.last_data as u16,
                }));
            }
        }
    }

    fn enter_transferring(&mut self) {
        self.state = State::Transferring;
        self.stats.block_size = self.negotiated.block_size;
        self.stats.window_size = self.negotiated.window_size;
        debug!(
            "전송 시작: blksize={}, windowsize={}, interval={:?}",
            self.negotiated.block_size, self.negotiated.window_size, self.negotiated.interval
        );
    }

    fn apply_oack(&mut self, options: &OptionMap) -> Result<()> {
        self.negotiated = apply_option_ack(&self.options, options, self.negotiated)?;
        Ok(())
    }

    /// 송신측: ACK 처리
    fn on_ack(&mut self, wire_block: u16, actions: &mut Vec<Action>) {
        let Endpoint::Sender(outgoing) = &mut self.endpoint else {
            return;
        };

        let block = unwrap_block(wire_block, outgoing.last_ack);
        if block <= outgoing.last_ack || block > outgoing.highest_sent() {
            debug!(
                "윈도우 밖 ACK {} 무시 (last_ack={}, highest={})",
                block,
                outgoing.last_ack,
                outgoing.highest_sent()
            );
            self.stats.ignored_acks += 1;
            return;
        }

        actions.push(Action::Cancel);
        let acked = (block - outgoing.last_ack) as usize;
        outgoing.in_flight.drain(..acked);
        outgoing.last_ack = block;

        if outgoing.final_sent && outgoing.in_flight.is_empty() {
            self.complete();
            return;
        }

        self.advance_window(actions);
    }

    /// 송신측: 남은 in-flight 블록 재전송 후 윈도우 채우기, 가장 오래된 블록으로 타이머 설정
    fn advance_window(&mut self, actions: &mut Vec<Action>) {
        let block_size = self.negotiated.block_size;
        let window = self.negotiated.window_size as usize;

        let Endpoint::Sender(outgoing) = &mut self.endpoint else {
            return;
        };

        // 부분 ACK: 이미 보낸 블록부터 다시 (go-back)
        for (i, payload) in outgoing.in_flight.iter().enumerate() {
            let block = outgoing.last_ack + i as u64 + 1;
            actions.push(Action::Send(Message::Data {
                block: block as u16,
                payload: payload.clone(),
            }));
            self.stats.retransmitted_blocks += 1;
        }

        while !outgoing.final_sent && outgoing.in_flight.len() < window {
            let payload = match outgoing.reader.read_block(block_size) {
                Ok(payload) => payload,
                Err(e) => {
                    self.fail(Error::Storage(e), actions);
                    return;
                }
            };
            let block = outgoing.highest_sent() + 1;

            if payload.len() < block_size {
                outgoing.final_sent = true;
                self.stats.final_block_len = Some(payload.len());
            }
            self.stats.blocks_sent += 1;
            self.stats.bytes_sent += payload.len() as u64;

            actions.push(Action::Send(Message::Data {
                block: block as u16,
                payload: payload.clone(),
            }));
            outgoing.in_flight.push_back(payload);
        }

        if let Some(oldest) = outgoing.in_flight.front() {
            actions.push(Action::Arm(Message::Data {
                block: (outgoing.last_ack + 1) as u16,
                payload: oldest.clone(),
            }));
        }
    }

    /// 수신측: 데이터 블록 처리
    fn on_data(&mut self, message: Message, actions: &mut Vec<Action>) {
        let Message::Data { block: wire_block, payload } = message else {
            return;
        };
        let block_size = self.negotiated.block_size;
        let window = self.negotiated.window_size as u64;

        if payload.len() > block_size {
            self.fail(
                Error::ProtocolViolation(format!(
                    "블록 {} 크기 {}가 협상된 크기 {} 초과",
                    wire_block,
                    payload.len(),
                    block_size
                )),
                actions,
            );
            return;
        }

        let Endpoint::Receiver(incoming) = &mut self.endpoint else {
            return;
        };

        let block = unwrap_block(wire_block, incoming.last_data);
        let mut is_final = false;

        let should_ack = if block == incoming.last_data + 1 {
            if let Err(e) = incoming.writer.write_block(&payload) {
                self.fail(Error::Storage(e), actions);
                return;
            }
            incoming.last_data = block;
            self.stats.blocks_received += 1;
            self.stats.bytes_received += payload.len() as u64;

            is_final = payload.len() < block_size;
            if is_final {
                self.stats.final_block_len = Some(payload.len());
            }
            is_final || incoming.last_ack + window == block
        } else {
            debug!(
                "순서 어긋난 블록 {} (기대 {}), ACK {} 재전송",
                block,
                incoming.last_data + 1,
                incoming.last_data
            );
            self.stats.duplicate_blocks += 1;
            true
        };

        if !should_ack {
            // 순서대로 진행 중이면 만료 카운트다운만 다시 시작
            actions.push(Action::Arm(Message::Ack {
                block: incoming.last_ack as u16,
            }));
            return;
        }

        let ack = Message::Ack {
            block: incoming.last_data as u16,
        };
        incoming.last_ack = incoming.last_data;

        if is_final {
            if let Err(e) = incoming.writer.finish() {
                self.fail(Error::Storage(e), actions);
                return;
            }
            actions.push(Action::Cancel);
            actions.push(Action::Send(ack));
            self.complete();
        } else {
            actions.push(Action::Send(ack.clone()));
            actions.push(Action::Arm(ack));
        }
    }

    fn complete(&mut self) {
        self.state = State::Completed;
        self.stats.finish();

        if let (Endpoint::Receiver(_), Some(expected)) = (&self.endpoint, self.negotiated.tsize) {
            if expected != self.stats.bytes_received {
                warn!(
                    "수신 크기 불일치: tsize={}, 수신={}",
                    expected, self.stats.bytes_received
                );
            }
        }

        info!("전송 완료: {}", self.stats.summary());
    }

    fn on_peer_error(&mut self, code: ErrorCode, message: String, actions: &mut Vec<Action>) {
        warn!("상대측 에러 수신 ({}): {}", code, message);
        actions.push(Action::Cancel);
        self.state = State::Failed;
        self.stats.finish();
        self.failure = Some(Error::Peer { code, message });
    }

    fn unexpected(&mut self, message: Message, actions: &mut Vec<Action>) {
        self.fail(
            Error::ProtocolViolation(format!(
                "{:?} 상태에서 {:?} 수신",
                self.state,
                message.opcode()
            )),
            actions,
        );
    }

    /// 실패 처리: 원인에 해당하는 에러 메시지 하나만 보냄
    fn fail(&mut self, error: Error, actions: &mut Vec<Action>) {
        warn!("전송 실패: {}", error);
        actions.push(Action::Cancel);
        if let Some(code) = error.wire_code() {
            let reply = match &error {
                Error::Rejected { message, .. } => Message::error_with(code, message.clone()),
                _ => Message::error(code),
            };
            actions.push(Action::Send(reply));
        }
        self.state = State::Failed;
        self.stats.finish();
        self.failure = Some(error);
    }
}

impl Outgoing {
    fn new(reader: BlockReader) -> Self {
        Self {
            reader,
            last_ack: 0,
            in_flight: VecDeque::new(),
            final_sent: false,
        }
    }
}

impl Incoming {
    fn new(writer: BlockWriter) -> Self {
        Self {
            writer,
            last_data: 0,
            last_ack: 0,
        }
    }
}

/// 수신측 시작 ACK (옵션 없는 WRQ 또는 OACK 확인)
fn ack_zero(actions: &mut Vec<Action>) {
    let ack = Message::Ack { block: 0 };
    actions.push(Action::Send(ack.clone()));
    actions.push(Action::Arm(ack));
}

/// 와이어 블록 번호를 기준점에 가장 가까운 내부 번호로 복원
fn unwrap_block(wire: u16, reference: u64) -> u64 {
    const SPAN: u64 = 1 << 16;
    let candidate = (reference & !(SPAN - 1)) | wire as u64;

    [candidate.checked_sub(SPAN), Some(candidate), Some(candidate + SPAN)]
        .into_iter()
        .flatten()
        .min_by_key(|value| value.abs_diff(reference))
        .unwrap_or(candidate)
}
