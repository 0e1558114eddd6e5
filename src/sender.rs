//! 송신자
//!
//! - SYN 핸드쉐이크 (재전송 한도 초과 시 RESET)
//! - 슬라이딩 윈도우 전송 + 타임아웃 재전송
//! - 중복 ACK 3회 빠른 재전송
//! - FIN 종료
//!
//! 윈도우 상태는 메인 흐름이 소유한다. 별도 리스너 태스크가 채널에서 세그먼트를
//! 받아 [`SenderEvent`] 로 전달하고, 메인 흐름은 타임아웃과 이벤트를
//! `select!` 로 동시에 기다린다.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::error::Phase;
use crate::loss::{DropPolicy, NeverDrop};
use crate::segment::{Segment, SegmentKind};
use crate::seq::SeqNo;
use crate::stats::SenderStats;
use crate::window::{AckOutcome, SendWindow};
use crate::{Config, Error, Result};

/// 송신자 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    SynSent,
    Established,
    AllDataAcked,
    FinSent,
    Closed,
    Aborted,
}

/// 리스너 태스크가 메인 흐름에 전달하는 이벤트
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderEvent {
    Ack(SeqNo),
    Reset,
}

/// 데이터 단계 대기 종료 조건
#[derive(Debug, Clone, Copy)]
enum WaitFor {
    /// 보낸 세그먼트 전부 확인
    AllSent,
    /// `base` 확인
    Base,
}

/// 송신자
pub struct Sender<C: Channel> {
    config: Config,
    channel: Arc<C>,
    isn: SeqNo,
    window: SendWindow,
    state: SenderState,

    /// 나가는 세그먼트 손실 훅
    outgoing_loss: Box<dyn DropPolicy>,

    /// 들어오는 ACK 손실 훅 (실행 시 리스너로 이동)
    incoming_loss: Option<Box<dyn DropPolicy>>,

    stats: Arc<Mutex<SenderStats>>,

    /// 재전송된 SYN 에 대해 아직 도착하지 않은 ACK(ISN+1) 수
    late_syn_acks: u32,
}

impl<C: Channel> Sender<C> {
    /// 새 송신자 생성
    pub fn new(config: Config, channel: C, data: Bytes) -> Result<Self> {
        Self::with_shared_channel(config, Arc::new(channel), data)
    }

    /// 이미 공유 중인 채널로 생성
    pub fn with_shared_channel(config: Config, channel: Arc<C>, data: Bytes) -> Result<Self> {
        config.validate()?;

        let isn = SeqNo::new(config.isn.unwrap_or_else(rand::random::<u16>));
        let window = SendWindow::new(isn, &data, config.mss, config.window_segments());

        Ok(Self {
            config,
            channel,
            isn,
            window,
            state: SenderState::Idle,
            outgoing_loss: Box::new(NeverDrop),
            incoming_loss: Some(Box::new(NeverDrop)),
            stats: Arc::new(Mutex::new(SenderStats::new())),
            late_syn_acks: 0,
        })
    }

    /// 나가는 세그먼트(SYN/DATA/FIN) 손실 훅 설정
    pub fn with_outgoing_loss(mut self, policy: impl DropPolicy + 'static) -> Self {
        self.outgoing_loss = Box::new(policy);
        self
    }

    /// 들어오는 세그먼트 손실 훅 설정
    pub fn with_incoming_loss(mut self, policy: impl DropPolicy + 'static) -> Self {
        self.incoming_loss = Some(Box::new(policy));
        self
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn isn(&self) -> SeqNo {
        self.isn
    }

    pub fn window(&self) -> &SendWindow {
        &self.window
    }

    /// 현재 통계 스냅샷
    pub fn stats(&self) -> SenderStats {
        self.stats.lock().clone()
    }

    /// 핸드쉐이크, 데이터 전송, 종료를 차례로 실행
    pub async fn run(&mut self) -> Result<SenderStats> {
        if self.state != SenderState::Idle {
            return Err(Error::InvalidConfig(
                "송신자는 한 번만 실행할 수 있음".into(),
            ));
        }

        let (event_tx, mut events) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let incoming_loss = self
            .incoming_loss
            .take()
            .unwrap_or_else(|| Box::new(NeverDrop));
        let listener = tokio::spawn(listen(
            self.channel.clone(),
            incoming_loss,
            self.stats.clone(),
            event_tx,
            shutdown_rx,
        ));

        let result = self.run_phases(&mut events).await;

        if shutdown_tx.send(true).is_err() {
            debug!("listener already stopped");
        }
        if let Err(e) = listener.await {
            warn!("리스너 태스크 종료 실패: {}", e);
        }

        if let Err(e) = result {
            self.state = SenderState::Aborted;
            return Err(e);
        }

        let stats = self.stats();
        info!("전송 완료: {}", stats.summary());
        Ok(stats)
    }

    async fn run_phases(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<SenderEvent>,
    ) -> Result<()> {
        self.handshake(events).await?;
        self.transfer(events).await?;
        self.teardown(events).await
    }

    /// 1단계: SYN
    async fn handshake(&mut self, events: &mut mpsc::UnboundedReceiver<SenderEvent>) -> Result<()> {
        let syn = Segment::syn(self.isn);
        let expected = self.isn.wrapping_add(1);

        self.state = SenderState::SynSent;
        if let Some(on_wire) = self.exchange(events, &syn, expected).await? {
            // 응답받은 하나를 제외한 SYN 마다 ACK 가 늦게 올 수 있음
            self.late_syn_acks = on_wire.saturating_sub(1);
            self.state = SenderState::Established;
            info!("연결 수립: ISN={}", self.isn);
            return Ok(());
        }

        self.abort(Phase::Handshake, self.isn).await
    }

    /// 2단계: 윈도우 전송
    async fn transfer(&mut self, events: &mut mpsc::UnboundedReceiver<SenderEvent>) -> Result<()> {
        info!(
            "데이터 전송 시작: {} 세그먼트, 윈도우 {}",
            self.window.len(),
            self.window.window_segments()
        );

        while !self.window.is_complete() {
            let in_window = self.window.window_end() - self.window.base();

            while let Some(index) = self.window.take_next() {
                let segment = self.window.segment(index).clone();
                self.transmit(&segment, false).await?;
            }
            self.wait_data(events, WaitFor::AllSent).await?;

            let mut remaining = in_window;
            while remaining > 0 && !self.window.is_complete() {
                self.drain_events(events)?;

                if self.window.advance_base() {
                    remaining -= 1;
                    continue;
                }

                let base = self.window.base();
                let segment = self.window.segment(base).clone();
                debug!("재전송: {}", segment);
                self.window.mark_sent(base);
                self.transmit(&segment, true).await?;
                self.wait_data(events, WaitFor::Base).await?;
            }
        }

        self.state = SenderState::AllDataAcked;
        debug!("모든 데이터 확인됨");
        Ok(())
    }

    /// 3단계: FIN
    async fn teardown(&mut self, events: &mut mpsc::UnboundedReceiver<SenderEvent>) -> Result<()> {
        let fin_seq = self.window.next_free_seq();
        let fin = Segment::fin(fin_seq);

        self.state = SenderState::FinSent;
        if self.exchange(events, &fin, fin_seq.wrapping_add(1)).await?.is_some() {
            self.state = SenderState::Closed;
            info!("연결 종료: FIN={}", fin_seq);
            return Ok(());
        }

        self.abort(Phase::Teardown, fin_seq).await
    }

    /// 제어 세그먼트를 최대 `resent_limit + 1` 회 보내며 `expected` ACK 대기
    ///
    /// 성공하면 실제로 채널에 나간 전송 횟수를 돌려준다.
    async fn exchange(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<SenderEvent>,
        segment: &Segment,
        expected: SeqNo,
    ) -> Result<Option<u32>> {
        let mut on_wire = 0;
        for attempt in 0..=self.config.resent_limit {
            if self.transmit(segment, attempt > 0).await? {
                on_wire += 1;
            }
            if self.wait_for_ack(events, expected).await? {
                return Ok(Some(on_wire));
            }
            debug!("{} 응답 없음 ({}회째)", segment.kind, attempt + 1);
        }
        Ok(None)
    }

    /// RESET 한 번 전송 후 중단 (손실 훅 우회)
    async fn abort(&mut self, phase: Phase, seq_no: SeqNo) -> Result<()> {
        let reset = Segment::reset(seq_no);
        self.stats.lock().record_sent(&reset, false, false);
        self.channel.send(&reset).await?;
        self.state = SenderState::Aborted;

        let attempts = self.config.resent_limit + 1;
        warn!("{} 단계 {}회 시도 후 연결 중단", phase, attempts);
        Err(Error::ConnectionAborted { phase, attempts })
    }

    /// 손실 훅을 거쳐 전송. 채널로 나갔으면 true
    async fn transmit(&mut self, segment: &Segment, retransmit: bool) -> Result<bool> {
        let dropped = self.outgoing_loss.should_drop(segment);
        self.stats.lock().record_sent(segment, retransmit, dropped);
        if !dropped {
            self.channel.send(segment).await?;
        }
        Ok(!dropped)
    }

    /// rto 동안 특정 ACK 대기
    async fn wait_for_ack(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<SenderEvent>,
        expected: SeqNo,
    ) -> Result<bool> {
        let deadline = Instant::now() + self.config.rto();

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return Ok(false),
                event = events.recv() => match event {
                    Some(SenderEvent::Ack(ack)) if ack == expected => return Ok(true),
                    Some(SenderEvent::Ack(ack)) => debug!("예상 밖 ACK {} 무시 (기대 {})", ack, expected),
                    Some(SenderEvent::Reset) => return Err(self.peer_reset()),
                    None => {
                        tokio::time::sleep_until(deadline).await;
                        return Ok(false);
                    }
                },
            }
        }
    }

    /// rto 동안 데이터 ACK 처리 (빠른 재전송 또는 조건 충족 시 조기 종료)
    async fn wait_data(
        &mut self,
        events: &mut mpsc::UnboundedReceiver<SenderEvent>,
        until: WaitFor,
    ) -> Result<()> {
        let deadline = Instant::now() + self.config.rto();

        loop {
            if self.wait_satisfied(until) {
                return Ok(());
            }

            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return Ok(()),
                event = events.recv() => match event {
                    Some(event) => {
                        if self.handle_data_event(event)? {
                            return Ok(());
                        }
                    }
                    None => {
                        tokio::time::sleep_until(deadline).await;
                        return Ok(());
                    }
                },
            }
        }
    }

    fn wait_satisfied(&self, until: WaitFor) -> bool {
        match until {
            WaitFor::AllSent => self.window.all_sent_acked(),
            WaitFor::Base => self.window.is_acked(self.window.base()),
        }
    }

    /// 대기 없이 쌓인 이벤트 처리
    fn drain_events(&mut self, events: &mut mpsc::UnboundedReceiver<SenderEvent>) -> Result<()> {
        while let Ok(event) = events.try_recv() {
            self.handle_data_event(event)?;
        }
        Ok(())
    }

    /// 빠른 재전송이 필요하면 true
    fn handle_data_event(&mut self, event: SenderEvent) -> Result<bool> {
        let ack = match event {
            SenderEvent::Ack(ack) => ack,
            SenderEvent::Reset => return Err(self.peer_reset()),
        };

        if self.late_syn_acks > 0 && ack == self.isn.wrapping_add(1) {
            self.late_syn_acks -= 1;
            debug!("늦게 도착한 SYN ACK {} 무시", ack);
            return Ok(false);
        }

        match self.window.apply_ack(ack) {
            AckOutcome::FastRetransmit => {
                let mut stats = self.stats.lock();
                stats.duplicate_acks += 1;
                stats.fast_retransmits += 1;
                debug!("중복 ACK {} 3회: 빠른 재전송", ack);
                Ok(true)
            }
            AckOutcome::Duplicate { .. } => {
                self.stats.lock().duplicate_acks += 1;
                Ok(false)
            }
            AckOutcome::InOrder | AckOutcome::GapRepaired { .. } | AckOutcome::Stale => Ok(false),
        }
    }

    fn peer_reset(&mut self) -> Error {
        warn!("상대방 RESET 수신");
        self.state = SenderState::Aborted;
        Error::ConnectionReset
    }
}

/// 리스너 태스크: 수신 세그먼트를 이벤트로 변환
async fn listen<C: Channel>(
    channel: Arc<C>,
    mut loss: Box<dyn DropPolicy>,
    stats: Arc<Mutex<SenderStats>>,
    events: mpsc::UnboundedSender<SenderEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let segment = tokio::select! {
            _ = shutdown.changed() => break,
            received = channel.recv() => match received {
                Ok(segment) => segment,
                Err(e) if e.is_protocol_violation() => {
                    warn!("잘못된 세그먼트 무시: {}", e);
                    continue;
                }
                Err(Error::ChannelClosed) => {
                    debug!("channel closed, listener stopping");
                    break;
                }
                Err(e) => {
                    warn!("수신 에러, 리스너 종료: {}", e);
                    break;
                }
            },
        };

        let dropped = loss.should_drop(&segment);
        stats.lock().record_received(&segment, dropped);
        if dropped {
            continue;
        }

        let event = match segment.kind {
            SegmentKind::Ack => SenderEvent::Ack(segment.seq_no),
            SegmentKind::Reset => SenderEvent::Reset,
            other => {
                debug!("송신자가 처리하지 않는 {} 세그먼트 무시", other);
                continue;
            }
        };

        if events.send(event).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::loss::ScriptedDrop;
    use std::time::Duration;

    fn fast_config() -> Config {
        Config {
            rto_ms: 20,
            ..Config::classroom()
        }
    }

    /// 수신된 세그먼트를 모두 꺼냄
    fn drain(peer: &MemoryChannel) -> Vec<Segment> {
        let mut out = Vec::new();
        while let Some(segment) = peer.try_recv() {
            out.push(segment.unwrap());
        }
        out
    }

    #[test]
    fn test_new_rejects_bad_window() {
        let (a, _b) = MemoryChannel::pair();
        let config = Config {
            window_size_bytes: 5,
            ..Config::classroom()
        };
        assert!(matches!(
            Sender::new(config, a, Bytes::from_static(b"abc")),
            Err(Error::InvalidWindowSize { window: 5, mss: 2 })
        ));
    }

    #[test]
    fn test_random_isn_when_unset() {
        let (a, _b) = MemoryChannel::pair();
        let config = Config {
            isn: None,
            ..Config::classroom()
        };
        let sender = Sender::new(config, a, Bytes::from_static(b"abc")).unwrap();
        let first = sender.window().segment(0).seq_no;
        assert_eq!(first, sender.isn().wrapping_add(1));
    }

    #[tokio::test]
    async fn test_handshake_abort_sends_single_reset() {
        let (a, peer) = MemoryChannel::pair();
        let mut sender = Sender::new(fast_config(), a, Bytes::from_static(b"abcdefg")).unwrap();

        let err = sender.run().await.unwrap_err();
        assert!(matches!(
            err,
            Error::ConnectionAborted {
                phase: Phase::Handshake,
                attempts: 4
            }
        ));
        assert_eq!(sender.state(), SenderState::Aborted);

        let sent = drain(&peer);
        let kinds: Vec<SegmentKind> = sent.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SegmentKind::Syn,
                SegmentKind::Syn,
                SegmentKind::Syn,
                SegmentKind::Syn,
                SegmentKind::Reset
            ]
        );
    }

    #[tokio::test]
    async fn test_reset_bypasses_outgoing_loss() {
        let (a, peer) = MemoryChannel::pair();
        let mut sender = Sender::new(fast_config(), a, Bytes::from_static(b"ab"))
            .unwrap()
            .with_outgoing_loss(|_: &Segment| true);

        assert!(sender.run().await.is_err());

        let sent = drain(&peer);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, SegmentKind::Reset);
        assert_eq!(sender.stats().dropped_segments, 4);
    }

    #[tokio::test]
    async fn test_peer_reset_during_handshake() {
        let (a, peer) = MemoryChannel::pair();
        let mut sender = Sender::new(fast_config(), a, Bytes::from_static(b"ab")).unwrap();

        let peer_task = tokio::spawn(async move {
            let syn = peer.recv().await.unwrap();
            assert_eq!(syn.kind, SegmentKind::Syn);
            peer.send(&Segment::reset(SeqNo::new(0))).await.unwrap();
            peer
        });

        assert!(matches!(sender.run().await, Err(Error::ConnectionReset)));
        assert_eq!(sender.state(), SenderState::Aborted);
        peer_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_abort_when_fin_unacked() {
        let (a, peer) = MemoryChannel::pair();
        let mut sender = Sender::new(fast_config(), a, Bytes::from_static(b"abc")).unwrap();

        // SYN 과 DATA 에만 응답하는 상대
        let peer_task = tokio::spawn(async move {
            let mut fins = 0;
            loop {
                let segment = peer.recv().await.unwrap();
                match segment.kind {
                    SegmentKind::Syn => peer
                        .send(&Segment::ack(segment.seq_no.wrapping_add(1)))
                        .await
                        .unwrap(),
                    SegmentKind::Data => peer
                        .send(&Segment::ack(
                            segment.seq_no.wrapping_add(segment.payload_len()),
                        ))
                        .await
                        .unwrap(),
                    SegmentKind::Fin => {
                        assert_eq!(segment.seq_no, SeqNo::new(4));
                        fins += 1;
                    }
                    SegmentKind::Reset => return (fins, segment.seq_no),
                    SegmentKind::Ack => {}
                }
            }
        });

        assert!(matches!(
            sender.run().await,
            Err(Error::ConnectionAborted {
                phase: Phase::Teardown,
                attempts: 4
            })
        ));
        assert_eq!(sender.window().base(), 2);

        let (fins, reset_seq) = peer_task.await.unwrap();
        assert_eq!(fins, 4);
        assert_eq!(reset_seq, SeqNo::new(4));
    }

    #[tokio::test]
    async fn test_fast_retransmit_preempts_rto() {
        let config = Config {
            rto_ms: 10_000,
            window_size_bytes: 8,
            ..Config::classroom()
        };
        let (a, peer) = MemoryChannel::pair();
        let mut sender = Sender::new(config, a, Bytes::from_static(b"abcdefgh")).unwrap();

        // 첫 DATA 를 한 번 잃어버린 것처럼 동작하는 상대
        let peer_task = tokio::spawn(async move {
            let mut first_seen = false;
            loop {
                let segment = match peer.recv().await {
                    Ok(segment) => segment,
                    Err(_) => return,
                };
                let reply = match segment.kind {
                    SegmentKind::Syn | SegmentKind::Fin => segment.seq_no.wrapping_add(1),
                    SegmentKind::Data if segment.seq_no == SeqNo::new(1) => {
                        if !first_seen {
                            first_seen = true;
                            continue;
                        }
                        SeqNo::new(9)
                    }
                    SegmentKind::Data => SeqNo::new(1),
                    _ => continue,
                };
                peer.send(&Segment::ack(reply)).await.unwrap();
            }
        });

        let stats = tokio::time::timeout(Duration::from_secs(2), sender.run())
            .await
            .expect("빠른 재전송이 rto 를 기다리지 않아야 함")
            .unwrap();

        assert_eq!(stats.fast_retransmits, 1);
        assert_eq!(stats.retransmitted_segments, 1);
        assert_eq!(stats.duplicate_acks, 3);
        assert_eq!(sender.window().base(), 4);
        assert_eq!(sender.state(), SenderState::Closed);
        peer_task.abort();
    }

    #[tokio::test]
    async fn test_late_syn_acks_are_not_duplicates() {
        let config = Config {
            rto_ms: 100,
            ..Config::classroom()
        };
        let (a, peer) = MemoryChannel::pair();
        let mut sender = Sender::new(config, a, Bytes::from_static(b"abcdefgh")).unwrap();

        // 앞선 SYN 세 개의 ACK 가 네 번째 SYN 의 ACK 와 함께 몰려오는 상대
        let peer_task = tokio::spawn(async move {
            let mut syns = 0;
            loop {
                let segment = match peer.recv().await {
                    Ok(segment) => segment,
                    Err(_) => return,
                };
                match segment.kind {
                    SegmentKind::Syn => {
                        syns += 1;
                        if syns < 4 {
                            continue;
                        }
                        for _ in 0..4 {
                            peer.send(&Segment::ack(SeqNo::new(1))).await.unwrap();
                        }
                    }
                    SegmentKind::Data => peer
                        .send(&Segment::ack(
                            segment.seq_no.wrapping_add(segment.payload_len()),
                        ))
                        .await
                        .unwrap(),
                    SegmentKind::Fin => peer
                        .send(&Segment::ack(segment.seq_no.wrapping_add(1)))
                        .await
                        .unwrap(),
                    _ => {}
                }
            }
        });

        let stats = sender.run().await.unwrap();
        assert_eq!(stats.duplicate_acks, 0);
        assert_eq!(stats.fast_retransmits, 0);
        assert_eq!(sender.window().base(), 4);
        assert_eq!(sender.state(), SenderState::Closed);
        peer_task.abort();
    }

    #[tokio::test]
    async fn test_dropped_ack_is_not_processed() {
        let (a, peer) = MemoryChannel::pair();
        let mut sender = Sender::new(fast_config(), a, Bytes::new())
            .unwrap()
            .with_incoming_loss(ScriptedDrop::new([true]));

        let peer_task = tokio::spawn(async move {
            loop {
                let segment = match peer.recv().await {
                    Ok(segment) => segment,
                    Err(_) => return,
                };
                if matches!(segment.kind, SegmentKind::Syn | SegmentKind::Fin) {
                    peer.send(&Segment::ack(segment.seq_no.wrapping_add(1)))
                        .await
                        .unwrap();
                }
            }
        });

        // 첫 SYN-ACK 를 잃어도 재전송된 SYN 으로 연결됨
        let stats = sender.run().await.unwrap();
        assert_eq!(stats.dropped_acks, 1);
        assert_eq!(sender.state(), SenderState::Closed);
        peer_task.abort();
    }
}
