//! 프로토콜 설정

use std::time::Duration;

use crate::seq::SEQ_HALF_SPACE;
use crate::{Error, Result, DEFAULT_MSS, HEADER_LEN, MAX_PAYLOAD_LEN, RESENT_LIMIT};

/// STP 프로토콜 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 최대 세그먼트 크기 (DATA 페이로드 바이트)
    pub mss: usize,

    /// 송신 윈도우 크기 (바이트, MSS의 배수)
    pub window_size_bytes: usize,

    /// 재전송 타임아웃 (밀리초)
    pub rto_ms: u64,

    /// SYN/FIN 최대 재전송 횟수
    /// 초과 시 RESET 후 연결 중단
    pub resent_limit: u32,

    /// FIN 수신 후 대기 시간 (밀리초)
    /// ACK가 유실되어 재전송된 FIN을 다시 ACK 하기 위함
    pub linger_ms: u64,

    /// 초기 시퀀스 번호 (None 이면 랜덤)
    pub isn: Option<u16>,

    /// 수신 데이터그램 버퍼 크기
    pub recv_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mss: DEFAULT_MSS,
            window_size_bytes: 5 * DEFAULT_MSS, // 5 세그먼트
            rto_ms: 500,
            resent_limit: RESENT_LIMIT,
            linger_ms: 2000,
            isn: None,
            recv_buffer_size: 2048,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 윈도우 당 세그먼트 수
    pub fn window_segments(&self) -> usize {
        if self.mss == 0 {
            return 0;
        }
        self.window_size_bytes / self.mss
    }

    pub fn rto(&self) -> Duration {
        Duration::from_millis(self.rto_ms)
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }

    /// 설정 검증
    pub fn validate(&self) -> Result<()> {
        if self.mss == 0 || self.mss > MAX_PAYLOAD_LEN {
            return Err(Error::InvalidConfig(format!(
                "mss {}는 1..={} 범위여야 함",
                self.mss, MAX_PAYLOAD_LEN
            )));
        }

        if self.window_size_bytes == 0 || self.window_size_bytes % self.mss != 0 {
            return Err(Error::InvalidWindowSize {
                window: self.window_size_bytes,
                mss: self.mss,
            });
        }

        // 윈도우가 시퀀스 공간의 절반을 넘으면 순서 비교가 깨짐
        if self.window_size_bytes >= SEQ_HALF_SPACE as usize {
            return Err(Error::InvalidConfig(format!(
                "윈도우 크기 {} bytes는 {} 미만이어야 함",
                self.window_size_bytes, SEQ_HALF_SPACE
            )));
        }

        if self.rto_ms == 0 {
            return Err(Error::InvalidConfig("rto_ms는 0보다 커야 함".into()));
        }

        if self.recv_buffer_size < HEADER_LEN + self.mss {
            return Err(Error::InvalidConfig(format!(
                "수신 버퍼 {} bytes < 헤더 + MSS ({} bytes)",
                self.recv_buffer_size,
                HEADER_LEN + self.mss
            )));
        }

        Ok(())
    }

    /// 과제 환경용 설정 (MSS 2바이트, 윈도우 3 세그먼트)
    pub fn classroom() -> Self {
        Self {
            mss: 2,
            window_size_bytes: 6,
            rto_ms: 1000,
            resent_limit: RESENT_LIMIT,
            linger_ms: 3000,
            isn: Some(0),
            recv_buffer_size: 1024,
        }
    }

    /// 불안정한 네트워크용 설정
    pub fn unstable_network() -> Self {
        Self {
            mss: 500,
            window_size_bytes: 4000,        // 8 세그먼트
            rto_ms: 1500,
            resent_limit: 8,
            linger_ms: 15000,
            isn: None,
            recv_buffer_size: 2048,
        }
    }
}
