//! 수신자
//!
//! - 순서가 뒤바뀐 DATA 버퍼링
//! - 연속 구간만 순서대로 전달
//! - 누적 ACK
//! - FIN 이후 linger 대기
//!
//! 단일 태스크에서 수신 → 처리 → 응답 루프를 돈다.

use std::collections::HashMap;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::loss::{DropPolicy, NeverDrop, RandomDrop};
use crate::segment::{Segment, SegmentKind};
use crate::seq::SeqNo;
use crate::stats::ReceiverStats;
use crate::{Config, Error, Result};

/// 버퍼 삽입 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// 새 세그먼트 저장
    Accepted,
    /// 이미 전달했거나 버퍼에 있는 세그먼트
    Duplicate,
}

/// 수신 버퍼
///
/// 아직 전달하지 않은 세그먼트를 seq_no 로 보관하고, 다음 전달 위치의
/// 세그먼트가 도착할 때마다 연속 구간을 꺼내 `ready` 에 쌓는다.
#[derive(Debug)]
pub struct ReceiveBuffer {
    isn: SeqNo,

    /// 전달 대기 중인 세그먼트
    pending: HashMap<SeqNo, Bytes>,

    /// 다음에 전달할 바이트의 시퀀스 번호
    next_byte_to_deliver: SeqNo,

    /// 마지막으로 전달된 연속 세그먼트의 seq_no
    highest_contiguous: SeqNo,

    /// 전달 가능한 페이로드 (싱크에 쓰기 전)
    ready: Vec<Bytes>,
}

impl ReceiveBuffer {
    pub fn new(isn: SeqNo) -> Self {
        Self {
            isn,
            pending: HashMap::new(),
            next_byte_to_deliver: isn.wrapping_add(1),
            highest_contiguous: isn,
            ready: Vec::new(),
        }
    }

    pub fn isn(&self) -> SeqNo {
        self.isn
    }

    /// DATA 삽입 후 연속 구간 전달
    pub fn insert(&mut self, seq_no: SeqNo, payload: Bytes) -> InsertOutcome {
        if payload.is_empty()
            || seq_no.is_before(self.next_byte_to_deliver)
            || self.pending.contains_key(&seq_no)
        {
            return InsertOutcome::Duplicate;
        }

        self.pending.insert(seq_no, payload);

        while let Some(payload) = self.pending.remove(&self.next_byte_to_deliver) {
            self.highest_contiguous = self.next_byte_to_deliver;
            self.next_byte_to_deliver = self.next_byte_to_deliver.wrapping_add(payload.len());
            self.ready.push(payload);
        }

        InsertOutcome::Accepted
    }

    /// 누적 ACK 번호 (다음에 기대하는 바이트)
    ///
    /// 연속 세그먼트가 있으면 `highest_contiguous + len`, 없으면 ISN + 1.
    pub fn ack_number(&self) -> SeqNo {
        self.next_byte_to_deliver
    }

    pub fn highest_contiguous(&self) -> SeqNo {
        self.highest_contiguous
    }

    pub fn next_byte_to_deliver(&self) -> SeqNo {
        self.next_byte_to_deliver
    }

    /// 버퍼에 남아 있는 (순서가 맞지 않는) 세그먼트 수
    pub fn pending_segments(&self) -> usize {
        self.pending.len()
    }

    /// 전달 가능한 페이로드를 꺼냄
    pub fn take_ready(&mut self) -> Vec<Bytes> {
        std::mem::take(&mut self.ready)
    }

    /// 버퍼 폐기
    pub fn clear(&mut self) {
        self.pending.clear();
        self.ready.clear();
    }
}

/// 수신자 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    AwaitSyn,
    Established,
    FinReceived,
    Closed,
}

/// 수신자
///
/// 순서대로 전달된 바이트는 `sink` 에 기록된다.
pub struct Receiver<C: Channel, W> {
    config: Config,
    channel: C,
    sink: W,
    state: ReceiverState,
    buffer: Option<ReceiveBuffer>,
    fin_seq: Option<SeqNo>,
    incoming_loss: Box<dyn DropPolicy>,
    outgoing_loss: Box<dyn DropPolicy>,
    stats: ReceiverStats,
}

impl<C, W> Receiver<C, W>
where
    C: Channel,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(config: Config, channel: C, sink: W) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            channel,
            sink,
            state: ReceiverState::AwaitSyn,
            buffer: None,
            fin_seq: None,
            incoming_loss: Box::new(NeverDrop),
            outgoing_loss: Box::new(NeverDrop),
            stats: ReceiverStats::new(),
        })
    }

    /// 들어오는 세그먼트 손실 훅 (드롭 시 처리하지 않음)
    pub fn with_incoming_loss(mut self, policy: impl DropPolicy + 'static) -> Self {
        self.incoming_loss = Box::new(policy);
        self
    }

    /// 나가는 ACK 손실 훅 (드롭 시 상태는 갱신되고 ACK 만 전송하지 않음)
    pub fn with_outgoing_loss(mut self, policy: impl DropPolicy + 'static) -> Self {
        self.outgoing_loss = Box::new(policy);
        self
    }

    /// 양방향 랜덤 손실 설정 (flp: 들어오는 세그먼트, rlp: 나가는 ACK)
    pub fn with_loss_probabilities(self, flp: f64, rlp: f64) -> Result<Self> {
        let incoming = RandomDrop::new(flp)?;
        let outgoing = RandomDrop::new(rlp)?;
        Ok(self.with_incoming_loss(incoming).with_outgoing_loss(outgoing))
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn buffer(&self) -> Option<&ReceiveBuffer> {
        self.buffer.as_ref()
    }

    /// 수신한 FIN 의 seq_no
    pub fn fin_seq(&self) -> Option<SeqNo> {
        self.fin_seq
    }

    pub fn stats(&self) -> &ReceiverStats {
        &self.stats
    }

    pub fn sink(&self) -> &W {
        &self.sink
    }

    pub fn into_sink(self) -> W {
        self.sink
    }

    /// 세그먼트 하나 처리 후 응답 ACK 반환 (손실 훅과 입출력 없음)
    pub fn process(&mut self, segment: &Segment) -> Option<Segment> {
        match segment.kind {
            SegmentKind::Syn => self.on_syn(segment.seq_no),
            SegmentKind::Data => self.on_data(segment),
            SegmentKind::Fin => self.on_fin(segment.seq_no),
            SegmentKind::Reset => {
                warn!("RESET 수신, 연결 중단");
                self.state = ReceiverState::Closed;
                if let Some(buffer) = self.buffer.as_mut() {
                    buffer.clear();
                }
                None
            }
            SegmentKind::Ack => {
                debug!("수신자에게 온 ACK 무시: {}", segment);
                None
            }
        }
    }

    fn on_syn(&mut self, isn: SeqNo) -> Option<Segment> {
        match self.state {
            ReceiverState::AwaitSyn => {
                self.buffer = Some(ReceiveBuffer::new(isn));
                self.state = ReceiverState::Established;
                info!("연결 수립: ISN={}", isn);
                Some(Segment::ack(isn.wrapping_add(1)))
            }
            ReceiverState::Established | ReceiverState::FinReceived => {
                match self.buffer.as_ref() {
                    // 첫 ACK 가 유실된 SYN 재전송
                    Some(buffer) if buffer.isn() == isn => Some(Segment::ack(isn.wrapping_add(1))),
                    _ => {
                        warn!("다른 ISN 의 SYN 무시: {}", isn);
                        None
                    }
                }
            }
            ReceiverState::Closed => None,
        }
    }

    fn on_data(&mut self, segment: &Segment) -> Option<Segment> {
        let buffer = match (self.state, self.buffer.as_mut()) {
            (ReceiverState::Established | ReceiverState::FinReceived, Some(buffer)) => buffer,
            _ => {
                debug!("SYN 이전 DATA 무시: {}", segment);
                return None;
            }
        };

        if buffer.insert(segment.seq_no, segment.payload.clone()) == InsertOutcome::Duplicate {
            self.stats.duplicate_segments += 1;
        }

        Some(Segment::ack(buffer.ack_number()))
    }

    fn on_fin(&mut self, seq_no: SeqNo) -> Option<Segment> {
        match self.state {
            ReceiverState::Established | ReceiverState::FinReceived => {
                if self.state == ReceiverState::Established {
                    info!("FIN 수신: seq={}", seq_no);
                }
                self.fin_seq = Some(seq_no);
                self.state = ReceiverState::FinReceived;
                Some(Segment::ack(seq_no.wrapping_add(1)))
            }
            ReceiverState::AwaitSyn | ReceiverState::Closed => None,
        }
    }

    /// FIN 이후 linger 가 끝나거나 RESET 을 받을 때까지 수신
    pub async fn run(&mut self) -> Result<ReceiverStats> {
        let mut linger_deadline: Option<Instant> = None;

        loop {
            let received = match linger_deadline {
                Some(deadline) => {
                    let timed = tokio::time::timeout_at(deadline, self.channel.recv()).await;
                    match timed {
                        Ok(received) => received,
                        Err(_) => return self.close().await,
                    }
                }
                None => self.channel.recv().await,
            };

            let segment = match received {
                Ok(segment) => segment,
                Err(e) if e.is_protocol_violation() => {
                    warn!("잘못된 세그먼트 무시: {}", e);
                    continue;
                }
                Err(Error::ChannelClosed) if self.state == ReceiverState::FinReceived => {
                    return self.close().await;
                }
                Err(e) => return Err(e),
            };

            let dropped = self.incoming_loss.should_drop(&segment);
            self.stats.record_received(&segment, dropped);
            if dropped {
                continue;
            }

            let reply = self.process(&segment);
            self.flush_ready().await?;

            if let Some(ack) = reply {
                let dropped = self.outgoing_loss.should_drop(&ack);
                self.stats.record_reply(&ack, dropped);
                if !dropped {
                    self.channel.send(&ack).await?;
                }
            }

            match (segment.kind, self.state) {
                (SegmentKind::Reset, ReceiverState::Closed) => return Err(Error::ConnectionReset),
                // 재전송된 FIN 마다 linger 재시작
                (SegmentKind::Fin, ReceiverState::FinReceived) => {
                    linger_deadline = Some(Instant::now() + self.config.linger());
                }
                _ => {}
            }
        }
    }

    /// 순서대로 모인 페이로드를 싱크에 기록
    async fn flush_ready(&mut self) -> Result<()> {
        let ready = match self.buffer.as_mut() {
            Some(buffer) => buffer.take_ready(),
            None => return Ok(()),
        };

        for payload in ready {
            self.sink.write_all(&payload).await?;
            self.stats.data_bytes_delivered += payload.len() as u64;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<ReceiverStats> {
        self.sink.flush().await?;
        self.state = ReceiverState::Closed;
        info!("연결 종료: {}", self.stats.summary());
        Ok(self.stats.clone())
    }
}
