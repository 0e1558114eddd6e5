//! 송신 윈도우
//!
//! 데이터를 MSS 단위 세그먼트로 나누고, 세그먼트마다 기대 ACK 와 실제로
//! 기록된 ACK 를 병렬 배열로 관리한다.
//!
//! - `base`: 아직 확인되지 않은 가장 오래된 세그먼트
//! - `next`: 아직 보내지 않은 첫 세그먼트
//! - `rec_ack_next`: 다음 ACK 를 기록할 슬롯
//!
//! ACK 처리([`SendWindow::apply_ack`])는 소켓 없이 동작하는 순수 함수다.

use std::time::Instant;

use bytes::Bytes;

use crate::segment::Segment;
use crate::seq::SeqNo;

/// 빠른 재전송을 일으키는 연속 중복 ACK 수
pub const FAST_RETRANSMIT_THRESHOLD: u32 = 3;

/// ACK 한 개를 적용한 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// 기대값과 같은 ACK, 슬롯 하나 전진
    InOrder,

    /// 기대값보다 큰 누적 ACK, 중간 슬롯까지 채움
    GapRepaired { slots: usize },

    /// 기대값보다 작은 ACK
    Duplicate { count: u32 },

    /// 같은 슬롯에 대한 세 번째 연속 중복 ACK
    FastRetransmit,

    /// 보낸 슬롯이 모두 이미 기록됨
    Stale,
}

/// 슬롯별 연속 중복 ACK 카운터
#[derive(Debug, Default)]
struct DuplicateTracker {
    slot: usize,
    count: u32,
}

impl DuplicateTracker {
    fn hit(&mut self, slot: usize) -> u32 {
        if self.slot != slot {
            self.slot = slot;
            self.count = 0;
        }
        self.count += 1;
        self.count
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}

/// 송신 윈도우
#[derive(Debug)]
pub struct SendWindow {
    /// DATA 세그먼트 (seq_no, payload)
    segments: Vec<Segment>,

    /// seq_no + len (mod 2^16)
    expected_ack: Vec<SeqNo>,

    /// 마지막 전송 시각
    sent_at: Vec<Option<Instant>>,

    /// 슬롯에 기록된 ACK (None: 아직 없음)
    received_ack: Vec<Option<SeqNo>>,

    base: usize,
    next: usize,
    rec_ack_next: usize,

    /// 윈도우 당 세그먼트 수
    window_segments: usize,

    /// FIN 에 쓰일 다음 빈 시퀀스 번호
    next_free_seq: SeqNo,

    duplicates: DuplicateTracker,
}

impl SendWindow {
    /// `isn + 1` 부터 시작하도록 `data` 를 `mss` 단위로 분할
    pub fn new(isn: SeqNo, data: &Bytes, mss: usize, window_segments: usize) -> Self {
        let first = isn.wrapping_add(1);
        let capacity = if mss == 0 { 0 } else { data.len().div_ceil(mss) };

        let mut segments = Vec::with_capacity(capacity);
        let mut expected_ack = Vec::with_capacity(capacity);

        let mut offset = 0;
        let mut seq_no = first;
        while mss > 0 && offset < data.len() {
            let end = (offset + mss).min(data.len());
            let payload = data.slice(offset..end);
            let len = payload.len();

            expected_ack.push(seq_no.wrapping_add(len));
            segments.push(Segment::data(seq_no, payload));

            seq_no = seq_no.wrapping_add(len);
            offset = end;
        }

        Self {
            sent_at: vec![None; segments.len()],
            received_ack: vec![None; segments.len()],
            segments,
            expected_ack,
            base: 0,
            next: 0,
            rec_ack_next: 0,
            window_segments,
            next_free_seq: first.wrapping_add(data.len()),
            duplicates: DuplicateTracker::default(),
        }
    }

    /// 세그먼트 수 (N)
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn base(&self) -> usize {
        self.base
    }

    pub fn next(&self) -> usize {
        self.next
    }

    pub fn rec_ack_next(&self) -> usize {
        self.rec_ack_next
    }

    pub fn window_segments(&self) -> usize {
        self.window_segments
    }

    /// 데이터 바로 다음 시퀀스 번호 (ISN + 1 + 데이터 길이)
    pub fn next_free_seq(&self) -> SeqNo {
        self.next_free_seq
    }

    pub fn segment(&self, index: usize) -> &Segment {
        &self.segments[index]
    }

    pub fn expected_acks(&self) -> &[SeqNo] {
        &self.expected_ack
    }

    pub fn received_acks(&self) -> &[Option<SeqNo>] {
        &self.received_ack
    }

    pub fn sent_at(&self, index: usize) -> Option<Instant> {
        self.sent_at.get(index).copied().flatten()
    }

    /// 현재 윈도우 끝 (배타적)
    pub fn window_end(&self) -> usize {
        (self.base + self.window_segments).min(self.segments.len())
    }

    /// 모든 세그먼트 확인 완료
    pub fn is_complete(&self) -> bool {
        self.base >= self.segments.len()
    }

    /// 보낸 세그먼트가 전부 확인되었는지
    pub fn all_sent_acked(&self) -> bool {
        self.rec_ack_next >= self.next
    }

    /// 윈도우 안에서 아직 보내지 않은 다음 세그먼트 인덱스를 꺼냄
    pub fn take_next(&mut self) -> Option<usize> {
        if self.next >= self.window_end() {
            return None;
        }
        let index = self.next;
        self.next += 1;
        self.mark_sent(index);
        Some(index)
    }

    /// 전송 시각 기록 (재전송 포함)
    pub fn mark_sent(&mut self, index: usize) {
        if let Some(slot) = self.sent_at.get_mut(index) {
            *slot = Some(Instant::now());
        }
    }

    /// 슬롯 `index` 가 확인되었는지 (기록된 ACK >= 기대 ACK)
    pub fn is_acked(&self, index: usize) -> bool {
        match (self.received_ack.get(index), self.expected_ack.get(index)) {
            (Some(Some(received)), Some(expected)) => expected.is_before_or_eq(*received),
            _ => false,
        }
    }

    /// `base` 가 확인되었으면 한 칸 전진
    pub fn advance_base(&mut self) -> bool {
        if self.base < self.segments.len() && self.is_acked(self.base) {
            self.base += 1;
            return true;
        }
        false
    }

    /// 데이터 단계 ACK 적용
    ///
    /// 비교는 보낸 슬롯(`rec_ack_next..next`) 안에서만 한다. 윈도우가 2^15
    /// 바이트 미만이므로 그 범위에서는 모듈러 비교가 항상 성립한다.
    pub fn apply_ack(&mut self, ack: SeqNo) -> AckOutcome {
        let rec = self.rec_ack_next;
        let in_flight = self.next.min(self.segments.len());
        if rec >= in_flight {
            return AckOutcome::Stale;
        }

        let expected = self.expected_ack[rec];
        self.received_ack[rec] = Some(ack);

        if ack == expected {
            self.rec_ack_next += 1;
            self.duplicates.reset();
            return AckOutcome::InOrder;
        }

        if expected.is_before(ack) {
            // 누적 ACK 가 덮는 마지막 전송 슬롯까지 채움
            let last = (rec..in_flight)
                .take_while(|&j| self.expected_ack[j].is_before_or_eq(ack))
                .last()
                .unwrap_or(rec);

            for j in rec..last {
                self.received_ack[j] = Some(self.expected_ack[j]);
            }
            self.received_ack[last] = Some(ack);
            self.rec_ack_next = last + 1;
            self.duplicates.reset();

            return AckOutcome::GapRepaired {
                slots: last + 1 - rec,
            };
        }

        let count = self.duplicates.hit(rec);
        if count >= FAST_RETRANSMIT_THRESHOLD {
            self.duplicates.reset();
            return AckOutcome::FastRetransmit;
        }
        AckOutcome::Duplicate { count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(data: &'static [u8], isn: u16) -> SendWindow {
        SendWindow::new(SeqNo::new(isn), &Bytes::from_static(data), 2, 3)
    }

    /// 네 세그먼트가 한 윈도우에 들어가도록 만들고 전부 보냄
    fn sent_window(data: &'static [u8], isn: u16) -> SendWindow {
        let mut w = SendWindow::new(SeqNo::new(isn), &Bytes::from_static(data), 2, 4);
        while w.take_next().is_some() {}
        w
    }

    fn seqs(window: &SendWindow) -> Vec<(u16, usize)> {
        (0..window.len())
            .map(|i| {
                let s = window.segment(i);
                (s.seq_no.get(), s.payload_len())
            })
            .collect()
    }

    fn pattern(len: usize) -> Bytes {
        (0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>().into()
    }

    #[test]
    fn test_partition_seven_bytes() {
        let w = window(b"abcdefg", 0);
        assert_eq!(seqs(&w), vec![(1, 2), (3, 2), (5, 2), (7, 1)]);
        assert_eq!(
            w.expected_acks(),
            &[SeqNo::new(3), SeqNo::new(5), SeqNo::new(7), SeqNo::new(8)]
        );
        assert_eq!(w.next_free_seq(), SeqNo::new(8));
    }

    #[test]
    fn test_partition_wraps_sequence_space() {
        let w = window(b"abcd", 65534);
        assert_eq!(seqs(&w), vec![(65535, 2), (1, 2)]);
        assert_eq!(w.expected_acks(), &[SeqNo::new(1), SeqNo::new(3)]);
    }

    #[test]
    fn test_empty_data() {
        let w = window(b"", 10);
        assert!(w.is_empty());
        assert!(w.is_complete());
        assert_eq!(w.next_free_seq(), SeqNo::new(11));
    }

    #[test]
    fn test_take_next_respects_window() {
        let mut w = window(b"abcdefgh", 0);
        assert_eq!(w.take_next(), Some(0));
        assert_eq!(w.take_next(), Some(1));
        assert_eq!(w.take_next(), Some(2));
        assert_eq!(w.take_next(), None);
        assert!(w.sent_at(0).is_some());
        assert!(w.sent_at(3).is_none());

        assert_eq!(w.apply_ack(SeqNo::new(3)), AckOutcome::InOrder);
        assert!(w.advance_base());
        assert_eq!(w.take_next(), Some(3));
        assert_eq!(w.take_next(), None);
    }

    #[test]
    fn test_gap_repair() {
        let mut w = sent_window(b"abcdefgh", 0);
        assert_eq!(
            w.expected_acks(),
            &[SeqNo::new(3), SeqNo::new(5), SeqNo::new(7), SeqNo::new(9)]
        );

        assert_eq!(w.apply_ack(SeqNo::new(3)), AckOutcome::InOrder);
        assert_eq!(w.apply_ack(SeqNo::new(9)), AckOutcome::GapRepaired { slots: 3 });

        let received: Vec<u16> = w
            .received_acks()
            .iter()
            .map(|a| a.map(SeqNo::get).unwrap_or(0))
            .collect();
        assert_eq!(received, vec![3, 5, 7, 9]);
        assert_eq!(w.rec_ack_next(), 4);
        assert!((0..4).all(|i| w.is_acked(i)));
    }

    #[test]
    fn test_partial_gap_repair() {
        let mut w = sent_window(b"abcdefgh", 0);
        // 7 은 슬롯 0..=2 까지만 덮음
        assert_eq!(w.apply_ack(SeqNo::new(7)), AckOutcome::GapRepaired { slots: 3 });
        assert_eq!(w.rec_ack_next(), 3);
        assert!(w.is_acked(2));
        assert!(!w.is_acked(3));
    }

    #[test]
    fn test_gap_repair_stops_at_unsent_slots() {
        let mut w = window(b"abcdefgh", 0);
        assert_eq!(w.take_next(), Some(0));
        assert_eq!(w.take_next(), Some(1));

        // 9 는 슬롯 3 까지 덮지만 보낸 것은 0, 1 뿐
        assert_eq!(w.apply_ack(SeqNo::new(9)), AckOutcome::GapRepaired { slots: 2 });
        assert_eq!(w.rec_ack_next(), 2);
        assert!(!w.is_acked(2));
        assert!(w.received_acks()[2].is_none());

        // 보낸 슬롯이 모두 기록되면 이후 ACK 는 무시
        assert_eq!(w.apply_ack(SeqNo::new(9)), AckOutcome::Stale);
    }

    #[test]
    fn test_gap_repair_in_large_stream() {
        // 70 000 바이트면 seq 가 2^16 을 한 바퀴 넘음
        let mut w = SendWindow::new(SeqNo::new(0), &pattern(70_000), 1000, 5);
        assert_eq!(w.len(), 70);
        while w.take_next().is_some() {}
        assert_eq!(w.next(), 5);

        // 1001 ACK 유실, 2001 이 두 슬롯을 채움
        assert_eq!(w.apply_ack(SeqNo::new(2001)), AckOutcome::GapRepaired { slots: 2 });
        assert_eq!(w.rec_ack_next(), 2);
        assert!(!w.is_acked(2));
        assert!(!w.is_acked(66));
    }

    #[test]
    fn test_lost_acks_past_sequence_wrap() {
        let mut w = SendWindow::new(SeqNo::new(0), &pattern(70_000), 1000, 5);

        // 일곱 번째 ACK 마다 유실. 윈도우 끝 ACK 가 유실되면 재전송에 대한 누적 ACK 가 옴
        while !w.is_complete() {
            let sent: Vec<usize> = std::iter::from_fn(|| w.take_next()).collect();
            assert!(w.next() - w.base() <= w.window_segments());

            for &i in &sent {
                if i % 7 == 3 {
                    continue;
                }
                let ack = w.expected_acks()[i];
                w.apply_ack(ack);
                assert_eq!(w.rec_ack_next(), i + 1);
            }
            if w.rec_ack_next() < w.next() {
                let cumulative = w.expected_acks()[w.next() - 1];
                w.apply_ack(cumulative);
            }
            assert_eq!(w.rec_ack_next(), w.next());
            while w.advance_base() {}
        }

        assert_eq!(w.base(), 70);
        let received: Vec<SeqNo> = w.received_acks().iter().flatten().copied().collect();
        assert_eq!(received, w.expected_acks());
        assert_eq!(w.next_free_seq(), SeqNo::new((70_001 % 65_536) as u16));
    }

    #[test]
    fn test_three_duplicates_trigger_fast_retransmit() {
        let mut w = sent_window(b"abcdefgh", 0);
        // 첫 세그먼트 유실: 수신자는 계속 ISN+1 을 ACK
        assert_eq!(w.apply_ack(SeqNo::new(1)), AckOutcome::Duplicate { count: 1 });
        assert_eq!(w.apply_ack(SeqNo::new(1)), AckOutcome::Duplicate { count: 2 });
        assert_eq!(w.apply_ack(SeqNo::new(1)), AckOutcome::FastRetransmit);
        assert!(!w.is_acked(0));

        // 카운터는 다시 시작
        assert_eq!(w.apply_ack(SeqNo::new(1)), AckOutcome::Duplicate { count: 1 });
    }

    #[test]
    fn test_progress_resets_duplicate_count() {
        let mut w = sent_window(b"abcdefgh", 0);
        w.apply_ack(SeqNo::new(1));
        w.apply_ack(SeqNo::new(1));
        assert_eq!(w.apply_ack(SeqNo::new(3)), AckOutcome::InOrder);
        assert_eq!(w.apply_ack(SeqNo::new(3)), AckOutcome::Duplicate { count: 1 });
    }

    #[test]
    fn test_ack_after_all_slots_is_stale() {
        let mut w = sent_window(b"ab", 0);
        assert_eq!(w.apply_ack(SeqNo::new(3)), AckOutcome::InOrder);
        assert_eq!(w.apply_ack(SeqNo::new(3)), AckOutcome::Stale);
    }

    #[test]
    fn test_ack_before_anything_sent_is_stale() {
        let mut w = window(b"abcd", 0);
        assert_eq!(w.apply_ack(SeqNo::new(5)), AckOutcome::Stale);
        assert_eq!(w.rec_ack_next(), 0);
        assert!(w.received_acks().iter().all(Option::is_none));
    }

    #[test]
    fn test_acks_across_wraparound() {
        let mut w = window(b"abcdef", 65532);
        while w.take_next().is_some() {}
        // seqs 65533, 65535, 1 / expected 65535, 1, 3
        assert_eq!(w.apply_ack(SeqNo::new(3)), AckOutcome::GapRepaired { slots: 3 });
        assert!(w.advance_base());
        assert!(w.advance_base());
        assert!(w.advance_base());
        assert!(w.is_complete());
    }
}
