//! 세그먼트 송수신 채널
//!
//! - [`UdpChannel`]: 실제 UDP 소켓 (고정된 상대 주소)
//! - [`MemoryChannel`]: 프로세스 내부 큐 (테스트용)
//!
//! 두 구현 모두 코덱을 거쳐 바이트로 주고받는다.

use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace};

use crate::segment::Segment;
use crate::{Error, Result};

/// 엔진이 사용하는 송수신 경계
///
/// `send` 는 전달을 보장하지 않는다. `recv` 는 다음 세그먼트가 올 때까지 대기하며,
/// 잘못된 데이터그램은 프로토콜 에러로 돌려준다 ([`Error::is_protocol_violation`]).
pub trait Channel: Send + Sync + 'static {
    fn send(&self, segment: &Segment) -> impl Future<Output = Result<()>> + Send;

    fn recv(&self) -> impl Future<Output = Result<Segment>> + Send;
}

/// UDP 채널
pub struct UdpChannel {
    socket: UdpSocket,
    peer: SocketAddr,
    recv_buffer_size: usize,
}

impl UdpChannel {
    /// `local` 에 바인딩하고 `peer` 와만 통신
    pub async fn bind(local: SocketAddr, peer: SocketAddr, recv_buffer_size: usize) -> Result<Self> {
        let socket = UdpSocket::bind(local).await?;
        debug!("UDP channel bound on {}, peer {}", socket.local_addr()?, peer);

        Ok(Self {
            socket,
            peer,
            recv_buffer_size,
        })
    }

    /// 127.0.0.1 포트 간 채널
    pub async fn loopback(local_port: u16, peer_port: u16, recv_buffer_size: usize) -> Result<Self> {
        let local = SocketAddr::from((Ipv4Addr::LOCALHOST, local_port));
        let peer = SocketAddr::from((Ipv4Addr::LOCALHOST, peer_port));
        Self::bind(local, peer, recv_buffer_size).await
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Channel for UdpChannel {
    fn send(&self, segment: &Segment) -> impl Future<Output = Result<()>> + Send {
        async move {
            let bytes = segment.to_bytes()?;
            match self.socket.send_to(&bytes, self.peer).await {
                Ok(_) => Ok(()),
                // 상대가 아직 없으면 손실된 것으로 취급
                Err(e) if is_transient(&e) => {
                    debug!("send to {} failed ({}), treated as lost", self.peer, e);
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }
    }

    fn recv(&self) -> impl Future<Output = Result<Segment>> + Send {
        async move {
            let mut buf = vec![0u8; self.recv_buffer_size];
            loop {
                let (len, from) = match self.socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) if is_transient(&e) => {
                        debug!("recv error ignored: {}", e);
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                };

                if from != self.peer {
                    debug!("datagram from unexpected address {} ignored", from);
                    continue;
                }

                return Segment::from_bytes(&buf[..len]);
            }
        }
    }
}

/// ICMP unreachable 등으로 인한 일시적 소켓 에러
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

/// 메모리 채널 (한 쌍으로 생성)
pub struct MemoryChannel {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: Mutex<mpsc::UnboundedReceiver<Bytes>>,
}

impl MemoryChannel {
    /// 서로 연결된 두 끝점 생성
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();

        let a = Self {
            tx: a_tx,
            rx: Mutex::new(a_rx),
        };
        let b = Self {
            tx: b_tx,
            rx: Mutex::new(b_rx),
        };
        (a, b)
    }

    /// 인코딩 없이 원시 바이트 전송 (잘못된 데이터그램 주입용)
    pub fn send_raw(&self, bytes: Bytes) {
        if self.tx.send(bytes).is_err() {
            trace!("memory channel peer gone, datagram discarded");
        }
    }

    /// 대기 없이 수신 (비어 있거나 다른 곳에서 수신 중이면 None)
    pub fn try_recv(&self) -> Option<Result<Segment>> {
        let mut rx = self.rx.try_lock().ok()?;
        rx.try_recv().ok().map(|bytes| Segment::from_bytes(&bytes))
    }
}

impl Channel for MemoryChannel {
    fn send(&self, segment: &Segment) -> impl Future<Output = Result<()>> + Send {
        async move {
            let bytes = segment.to_bytes()?;
            // UDP 처럼 상대가 사라졌어도 전송은 성공으로 본다
            self.send_raw(bytes);
            Ok(())
        }
    }

    fn recv(&self) -> impl Future<Output = Result<Segment>> + Send {
        async move {
            let mut rx = self.rx.lock().await;
            match rx.recv().await {
                Some(bytes) => Segment::from_bytes(&bytes),
                None => Err(Error::ChannelClosed),
            }
        }
    }
}
