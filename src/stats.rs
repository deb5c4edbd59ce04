//! 전송 통계

use std::time::{Duration, Instant};

/// 세션 단위 전송 통계
#[derive(Debug, Clone)]
pub struct TransferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 종료까지 걸린 시간 (진행 중이면 None)
    pub finished_in: Option<Duration>,

    /// 협상된 블록 크기
    pub block_size: usize,

    /// 협상된 윈도우 크기
    pub window_size: u16,

    /// 처음 전송한 데이터 블록 수 (재전송 제외)
    pub blocks_sent: u64,

    /// 순서대로 수신해 기록한 데이터 블록 수
    pub blocks_received: u64,

    /// 와이어 페이로드 바이트 (송신)
    pub bytes_sent: u64,

    /// 와이어 페이로드 바이트 (수신, 중복 제외)
    pub bytes_received: u64,

    /// 부분 ACK 후 다시 보낸 블록 수
    pub retransmitted_blocks: u64,

    /// 타이머가 재전송한 횟수
    pub timer_retransmissions: u64,

    /// 중복/순서 어긋난 데이터 블록 수
    pub duplicate_blocks: u64,

    /// 윈도우 밖이라 무시한 ACK 수
    pub ignored_acks: u64,

    /// 마지막 (짧은) 블록 길이
    pub final_block_len: Option<usize>,
}

impl TransferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            finished_in: None,
            block_size: crate::DEFAULT_BLOCK_SIZE,
            window_size: crate::DEFAULT_WINDOW_SIZE,
            blocks_sent: 0,
            blocks_received: 0,
            bytes_sent: 0,
            bytes_received: 0,
            retransmitted_blocks: 0,
            timer_retransmissions: 0,
            duplicate_blocks: 0,
            ignored_acks: 0,
            final_block_len: None,
        }
    }

    /// 종료 시각 기록
    pub fn finish(&mut self) {
        if self.finished_in.is_none() {
            self.finished_in = Some(self.start_time.elapsed());
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.finished_in.unwrap_or_else(|| self.start_time.elapsed())
    }

    /// 전체 데이터 블록 수 (송신 + 수신)
    pub fn total_blocks(&self) -> u64 {
        self.blocks_sent + self.blocks_received
    }

    /// 처리율 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        (self.bytes_sent + self.bytes_received) as f64 / elapsed
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Blocks: {} (blksize {}, window {}) | Bytes: {} | Throughput: {:.2} KB/s | Retransmits: {} timer + {} window | Duplicates: {}",
            self.elapsed().as_secs_f64(),
            self.total_blocks(),
            self.block_size,
            self.window_size,
            self.bytes_sent + self.bytes_received,
            self.throughput() / 1000.0,
            self.timer_retransmissions,
            self.retransmitted_blocks,
            self.duplicate_blocks,
        )
    }
}

impl Default for TransferStats {
    fn default() -> Self {
        Self::new()
    }
}
