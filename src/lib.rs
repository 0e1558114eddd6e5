//! # STP (Simple Transport Protocol)
//!
//! UDP 위의 신뢰성 있는 바이트 스트림 전송
//!
//! ## 핵심 특징
//! - **4바이트 헤더**: type(u16) + seq_no(u16), 빅엔디안
//! - **16비트 시퀀스 번호**: mod 2^16 랩어라운드 비교
//! - **누적 ACK**: 수신자는 다음에 기대하는 바이트를 ACK
//! - **슬라이딩 윈도우**: 고정 크기 윈도우, 타임아웃 재전송
//! - **빠른 재전송**: 같은 슬롯에 대한 중복 ACK 3회
//! - **연결 수명**: SYN 핸드쉐이크, FIN 종료, 재전송 한도 초과 시 RESET
//! - **손실 주입**: 방향별 [`DropPolicy`] 훅

pub mod channel;
pub mod config;
pub mod error;
pub mod loss;
pub mod receiver;
pub mod segment;
pub mod sender;
pub mod seq;
pub mod stats;
pub mod window;

pub use channel::{Channel, MemoryChannel, UdpChannel};
pub use config::Config;
pub use error::{Error, Phase, Result};
pub use loss::{DropPolicy, InteractiveDrop, NeverDrop, RandomDrop, ScriptedDrop};
pub use receiver::{InsertOutcome, ReceiveBuffer, Receiver, ReceiverState};
pub use segment::{Segment, SegmentKind};
pub use sender::{Sender, SenderEvent, SenderState};
pub use seq::SeqNo;
pub use stats::{ReceiverStats, SenderStats};
pub use window::{AckOutcome, SendWindow};

/// 세그먼트 헤더 크기 (바이트)
pub const HEADER_LEN: usize = 4;

/// 기본 MSS (바이트)
pub const DEFAULT_MSS: usize = 1000;

/// SYN/FIN 기본 재전송 한도
pub const RESENT_LIMIT: u32 = 3;

/// UDP 데이터그램 최대 페이로드 (IPv4)
pub const MAX_DATAGRAM_SIZE: usize = 65507;

/// 세그먼트 페이로드 최대 크기
pub const MAX_PAYLOAD_LEN: usize = MAX_DATAGRAM_SIZE - HEADER_LEN;
