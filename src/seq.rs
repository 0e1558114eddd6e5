//! 16비트 시퀀스 번호 연산
//!
//! 시퀀스 번호는 항상 mod 2^16 으로 다룬다. 순서 비교는 두 값의 거리가
//! 2^15 미만이라는 가정 하에서만 의미가 있으므로, 윈도우 크기는
//! [`SEQ_HALF_SPACE`] 보다 작게 유지해야 한다 ([`crate::Config::validate`]).

use std::fmt;

use crate::{Error, Result};

/// 시퀀스 공간의 절반 (2^15)
pub const SEQ_HALF_SPACE: u16 = 0x8000;

/// mod 2^16 시퀀스 번호
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SeqNo(u16);

impl SeqNo {
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// 범위 검사 후 생성 (0..=65535)
    pub fn try_from_u32(value: u32) -> Result<Self> {
        u16::try_from(value)
            .map(Self)
            .map_err(|_| Error::InvalidSeqNo { value })
    }

    pub const fn get(self) -> u16 {
        self.0
    }

    /// `n` 바이트 뒤의 시퀀스 번호 (mod 2^16)
    pub fn wrapping_add(self, n: usize) -> Self {
        Self(self.0.wrapping_add((n % (1 << 16)) as u16))
    }

    /// `self` 에서 `other` 까지의 전진 거리 (mod 2^16)
    pub fn distance_to(self, other: SeqNo) -> u16 {
        other.0.wrapping_sub(self.0)
    }

    /// 랩어라운드를 고려한 `self < other`
    pub fn is_before(self, other: SeqNo) -> bool {
        let d = self.distance_to(other);
        d != 0 && d < SEQ_HALF_SPACE
    }

    /// 랩어라운드를 고려한 `self <= other`
    pub fn is_before_or_eq(self, other: SeqNo) -> bool {
        self == other || self.is_before(other)
    }

    /// 랩어라운드를 고려한 `self > other`
    pub fn is_after(self, other: SeqNo) -> bool {
        other.is_before(self)
    }
}

impl From<u16> for SeqNo {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl From<SeqNo> for u16 {
    fn from(seq: SeqNo) -> Self {
        seq.0
    }
}

impl fmt::Display for SeqNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
