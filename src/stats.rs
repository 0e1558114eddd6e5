//! 전송 통계
//!
//! 세그먼트 단위 이벤트는 `stp::segment` 타깃의 debug 로그로 남긴다.
//! 형식: `<snd|rcv|drp> <경과 ms> <TYPE> <seq> <len>`

use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::segment::{Segment, SegmentKind};

/// 세그먼트 이벤트 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// 전송
    Snd,
    /// 수신
    Rcv,
    /// 손실 훅에 의해 드롭
    Drp,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Snd => "snd",
            Direction::Rcv => "rcv",
            Direction::Drp => "drp",
        };
        f.pad(s)
    }
}

/// 세그먼트 이벤트 로그 한 줄
pub fn log_segment(start_time: Instant, direction: Direction, segment: &Segment) {
    debug!(
        target: "stp::segment",
        "{:<4} {:>10.2} {:<5} {:>5} {}",
        direction,
        start_time.elapsed().as_secs_f64() * 1000.0,
        segment.kind,
        segment.seq_no.get(),
        segment.payload_len(),
    );
}

/// 송신자 통계
#[derive(Debug, Clone)]
pub struct SenderStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 전송한 데이터 바이트 (재전송 제외)
    pub data_bytes_sent: u64,

    /// 전송한 DATA 세그먼트 수 (재전송 제외)
    pub data_segments_sent: u64,

    /// 재전송한 DATA 세그먼트 수
    pub retransmitted_segments: u64,

    /// 중복 ACK 수
    pub duplicate_acks: u64,

    /// 빠른 재전송 발동 횟수
    pub fast_retransmits: u64,

    /// 손실 훅이 드롭한 송신 세그먼트 수
    pub dropped_segments: u64,

    /// 손실 훅이 드롭한 수신 ACK 수
    pub dropped_acks: u64,
}

impl SenderStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            data_bytes_sent: 0,
            data_segments_sent: 0,
            retransmitted_segments: 0,
            duplicate_acks: 0,
            fast_retransmits: 0,
            dropped_segments: 0,
            dropped_acks: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 세그먼트 송신 기록 (드롭 여부와 무관하게 호출)
    pub fn record_sent(&mut self, segment: &Segment, retransmit: bool, dropped: bool) {
        if segment.kind == SegmentKind::Data {
            if retransmit {
                self.retransmitted_segments += 1;
            } else {
                self.data_segments_sent += 1;
                self.data_bytes_sent += segment.payload_len() as u64;
            }
        }

        if dropped {
            self.dropped_segments += 1;
            log_segment(self.start_time, Direction::Drp, segment);
        } else {
            log_segment(self.start_time, Direction::Snd, segment);
        }
    }

    /// ACK 수신 기록
    pub fn record_received(&mut self, segment: &Segment, dropped: bool) {
        if dropped {
            self.dropped_acks += 1;
            log_segment(self.start_time, Direction::Drp, segment);
        } else {
            log_segment(self.start_time, Direction::Rcv, segment);
        }
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Data: {} bytes in {} segments | Retransmitted: {} | Dup ACKs: {} | Fast retransmits: {} | Dropped: {} sent / {} acks",
            self.elapsed().as_secs_f64(),
            self.data_bytes_sent,
            self.data_segments_sent,
            self.retransmitted_segments,
            self.duplicate_acks,
            self.fast_retransmits,
            self.dropped_segments,
            self.dropped_acks,
        )
    }
}

impl Default for SenderStats {
    fn default() -> Self {
        Self::new()
    }
}

/// 수신자 통계
#[derive(Debug, Clone)]
pub struct ReceiverStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 순서대로 전달된 데이터 바이트
    pub data_bytes_delivered: u64,

    /// 수신한 DATA 세그먼트 수 (중복 포함)
    pub data_segments_received: u64,

    /// 중복 DATA 세그먼트 수
    pub duplicate_segments: u64,

    /// 손실 훅이 드롭한 수신 세그먼트 수
    pub dropped_segments: u64,

    /// 손실 훅이 드롭한 ACK 수
    pub dropped_acks: u64,

    /// 전송한 ACK 수
    pub acks_sent: u64,
}

impl ReceiverStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            data_bytes_delivered: 0,
            data_segments_received: 0,
            duplicate_segments: 0,
            dropped_segments: 0,
            dropped_acks: 0,
            acks_sent: 0,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 세그먼트 수신 기록
    pub fn record_received(&mut self, segment: &Segment, dropped: bool) {
        if dropped {
            self.dropped_segments += 1;
            log_segment(self.start_time, Direction::Drp, segment);
            return;
        }

        if segment.kind == SegmentKind::Data {
            self.data_segments_received += 1;
        }
        log_segment(self.start_time, Direction::Rcv, segment);
    }

    /// ACK 송신 기록
    pub fn record_reply(&mut self, segment: &Segment, dropped: bool) {
        if dropped {
            self.dropped_acks += 1;
            log_segment(self.start_time, Direction::Drp, segment);
        } else {
            self.acks_sent += 1;
            log_segment(self.start_time, Direction::Snd, segment);
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Delivered: {} bytes | Data segments: {} ({} duplicate) | ACKs sent: {} | Dropped: {} segments / {} acks",
            self.elapsed().as_secs_f64(),
            self.data_bytes_delivered,
            self.data_segments_received,
            self.duplicate_segments,
            self.acks_sent,
            self.dropped_segments,
            self.dropped_acks,
        )
    }
}

impl Default for ReceiverStats {
    fn default() -> Self {
        Self::new()
    }
}
