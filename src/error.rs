//! 에러 타입 정의

use std::fmt;

use thiserror::Error;

/// 연결 단계 (재전송 한도 초과 시 어느 단계였는지 표시)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// SYN 핸드쉐이크
    Handshake,
    /// FIN 종료
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Handshake => "handshake",
            Phase::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

/// STP 프로토콜 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("세그먼트가 너무 짧음: {len} bytes (헤더 {header_len} bytes 필요)")]
    SegmentTooShort { len: usize, header_len: usize },

    #[error("유효하지 않은 세그먼트 타입: {code}")]
    InvalidSegmentType { code: u16 },

    #[error("유효하지 않은 시퀀스 번호: {value} (0..=65535)")]
    InvalidSeqNo { value: u32 },

    #[error("페이로드 초과: {len} bytes > 최대 {max} bytes")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("윈도우 크기 {window} bytes는 MSS {mss}의 양의 배수여야 함")]
    InvalidWindowSize { window: usize, mss: usize },

    #[error("유효하지 않은 설정: {0}")]
    InvalidConfig(String),

    #[error("연결 중단: {phase} 단계에서 {attempts}회 전송 후 ACK 없음")]
    ConnectionAborted { phase: Phase, attempts: u32 },

    #[error("상대방이 연결을 리셋함")]
    ConnectionReset,

    #[error("채널 종료")]
    ChannelClosed,
}

impl Error {
    /// 잘못된 세그먼트로 인한 에러인지 (해당 데이터그램만 버리고 계속 진행)
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Error::Serialization(_)
                | Error::SegmentTooShort { .. }
                | Error::InvalidSegmentType { .. }
                | Error::InvalidSeqNo { .. }
                | Error::PayloadTooLarge { .. }
        )
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;
