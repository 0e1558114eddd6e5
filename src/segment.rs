//! STP 세그먼트 정의 및 와이어 코덱
//!
//! ```text
//!  0               1               2               3
//! +-------------------------------+-------------------------------+
//! |          type (u16)           |         seq_no (u16)          |
//! +-------------------------------+-------------------------------+
//! |                      payload (0..=MSS) ...                    |
//! +---------------------------------------------------------------+
//! ```
//!
//! 헤더는 bincode 고정폭 빅엔디안 설정으로 직렬화하므로 정확히 4바이트가 된다.
//! 페이로드는 DATA 세그먼트에만 실린다.

use std::fmt;

use bincode::Options;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::seq::SeqNo;
use crate::{Error, Result, HEADER_LEN, MAX_PAYLOAD_LEN};

/// 세그먼트 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SegmentKind {
    /// 파일 데이터
    Data = 0,

    /// 누적 확인 응답
    Ack = 1,

    /// 연결 시작
    Syn = 2,

    /// 연결 종료
    Fin = 3,

    /// 연결 강제 중단
    Reset = 4,
}

impl SegmentKind {
    pub fn code(self) -> u16 {
        self as u16
    }

    pub fn from_code(code: u16) -> Result<Self> {
        match code {
            0 => Ok(SegmentKind::Data),
            1 => Ok(SegmentKind::Ack),
            2 => Ok(SegmentKind::Syn),
            3 => Ok(SegmentKind::Fin),
            4 => Ok(SegmentKind::Reset),
            _ => Err(Error::InvalidSegmentType { code }),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SegmentKind::Data => "DATA",
            SegmentKind::Ack => "ACK",
            SegmentKind::Syn => "SYN",
            SegmentKind::Fin => "FIN",
            SegmentKind::Reset => "RESET",
        }
    }
}

impl fmt::Display for SegmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// 와이어 헤더 (type, seq_no)
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct SegmentHeader {
    kind: u16,
    seq_no: u16,
}

fn wire_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_big_endian()
}

/// STP 세그먼트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub seq_no: SeqNo,
    pub payload: Bytes,
}

impl Segment {
    pub fn new(kind: SegmentKind, seq_no: SeqNo, payload: Bytes) -> Self {
        Self {
            kind,
            seq_no,
            payload,
        }
    }

    pub fn data(seq_no: SeqNo, payload: Bytes) -> Self {
        Self::new(SegmentKind::Data, seq_no, payload)
    }

    pub fn ack(seq_no: SeqNo) -> Self {
        Self::new(SegmentKind::Ack, seq_no, Bytes::new())
    }

    pub fn syn(seq_no: SeqNo) -> Self {
        Self::new(SegmentKind::Syn, seq_no, Bytes::new())
    }

    pub fn fin(seq_no: SeqNo) -> Self {
        Self::new(SegmentKind::Fin, seq_no, Bytes::new())
    }

    pub fn reset(seq_no: SeqNo) -> Self {
        Self::new(SegmentKind::Reset, seq_no, Bytes::new())
    }

    /// 페이로드 길이
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// 바이트로 직렬화
    pub fn to_bytes(&self) -> Result<Bytes> {
        if self.payload.len() > MAX_PAYLOAD_LEN {
            return Err(Error::PayloadTooLarge {
                len: self.payload.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        let header = SegmentHeader {
            kind: self.kind.code(),
            seq_no: self.seq_no.get(),
        };
        let header_bytes = wire_options().serialize(&header)?;
        debug_assert_eq!(header_bytes.len(), HEADER_LEN);

        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_slice(&header_bytes);
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// 바이트에서 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(Error::SegmentTooShort {
                len: bytes.len(),
                header_len: HEADER_LEN,
            });
        }

        let header: SegmentHeader = wire_options().deserialize(&bytes[..HEADER_LEN])?;
        let kind = SegmentKind::from_code(header.kind)?;

        Ok(Self {
            kind,
            seq_no: SeqNo::new(header.seq_no),
            payload: Bytes::copy_from_slice(&bytes[HEADER_LEN..]),
        })
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} seq={} len={}", self.kind, self.seq_no, self.payload.len())
    }
}

/// 원시 값으로부터 세그먼트 인코딩 (타입/시퀀스 범위 검사 포함)
pub fn encode(kind: u16, seq_no: u32, payload: &[u8]) -> Result<Bytes> {
    let kind = SegmentKind::from_code(kind)?;
    let seq_no = SeqNo::try_from_u32(seq_no)?;
    Segment::new(kind, seq_no, Bytes::copy_from_slice(payload)).to_bytes()
}

/// [`encode`] 의 역함수
pub fn decode(bytes: &[u8]) -> Result<Segment> {
    Segment::from_bytes(bytes)
}
