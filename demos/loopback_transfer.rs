//! 루프백 전송 데모 (손실 주입 포함)
//!
//! 사용법:
//!   cargo run --release --example loopback_transfer -- [OPTIONS]
//!
//! 옵션:
//!   --size <KB>       테스트 데이터 크기 (KB, 기본: 64)
//!   --loss <P>        수신자 양방향 손실 확률 (기본: 0.1)
//!   --mss <N>         최대 세그먼트 크기 (기본: 1000)
//!   --window <N>      윈도우 크기 바이트 (기본: 5000)
//!   --rto <MS>        재전송 타임아웃 (기본: 100)

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Instant;

use bytes::Bytes;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use stp::{Config, Receiver, Sender, UdpChannel};

struct DemoArgs {
    size_kb: usize,
    loss: f64,
    config: Config,
}

fn parse_args() -> DemoArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut demo = DemoArgs {
        size_kb: 64,
        loss: 0.1,
        config: Config {
            rto_ms: 100,
            resent_limit: 10,
            linger_ms: 1000,
            ..Config::default()
        },
    };

    let mut i = 1;
    while i + 1 < args.len() {
        let value = &args[i + 1];
        let parsed = match args[i].as_str() {
            "--size" => value.parse().map(|v| demo.size_kb = v).is_ok(),
            "--loss" => value.parse().map(|v| demo.loss = v).is_ok(),
            "--mss" => value.parse().map(|v| demo.config.mss = v).is_ok(),
            "--window" => value.parse().map(|v| demo.config.window_size_bytes = v).is_ok(),
            "--rto" => value.parse().map(|v| demo.config.rto_ms = v).is_ok(),
            other => {
                warn!("알 수 없는 옵션 무시: {}", other);
                i += 1;
                continue;
            }
        };
        if !parsed {
            warn!("{} 값 무시: {}", args[i], value);
        }
        i += 2;
    }

    demo
}

/// 테스트용 텍스트 데이터 생성
fn generate_test_text(size_kb: usize) -> Vec<u8> {
    let target_size = size_kb * 1024;
    let mut data = Vec::with_capacity(target_size);

    let patterns = [
        "The quick brown fox jumps over the lazy dog. ",
        "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 ",
        "가나다라마바사아자차카타파하 ",
        "Hello, World! This is STP loopback test data. ",
    ];

    let mut line_num = 0usize;
    while data.len() < target_size {
        let line = format!("[{:08}] {}\n", line_num, patterns[line_num % patterns.len()]);
        data.extend_from_slice(line.as_bytes());
        line_num += 1;
    }

    data.truncate(target_size);
    data
}

/// 비어 있는 루프백 포트 두 개 확보
fn free_ports() -> std::io::Result<(u16, u16)> {
    let any = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
    let a = std::net::UdpSocket::bind(any)?;
    let b = std::net::UdpSocket::bind(any)?;
    Ok((a.local_addr()?.port(), b.local_addr()?.port()))
}

async fn run(demo: DemoArgs) -> stp::Result<()> {
    let data = Bytes::from(generate_test_text(demo.size_kb));
    let (sender_port, receiver_port) = free_ports()?;

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("📦 전송 데이터: {} bytes", data.len());
    info!("⚙️  MSS: {} bytes, 윈도우: {} bytes", demo.config.mss, demo.config.window_size_bytes);
    info!("⚙️  RTO: {} ms, 손실률: {:.1}%", demo.config.rto_ms, demo.loss * 100.0);
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let receiver_channel =
        UdpChannel::loopback(receiver_port, sender_port, demo.config.recv_buffer_size).await?;
    let mut receiver = Receiver::new(demo.config.clone(), receiver_channel, Vec::new())?
        .with_loss_probabilities(demo.loss, demo.loss)?;
    let receiver_task = tokio::spawn(async move {
        let stats = receiver.run().await?;
        Ok::<_, stp::Error>((stats, receiver.into_sink()))
    });

    let sender_channel =
        UdpChannel::loopback(sender_port, receiver_port, demo.config.recv_buffer_size).await?;
    let mut sender = Sender::new(demo.config, sender_channel, data.clone())?;

    let started = Instant::now();
    let sender_stats = sender.run().await?;
    let elapsed = started.elapsed();

    let (receiver_stats, received) = match receiver_task.await {
        Ok(result) => result?,
        Err(e) => {
            error!("수신자 태스크 실패: {}", e);
            return Err(stp::Error::ChannelClosed);
        }
    };

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("✅ 전송 완료: {:.2}s", elapsed.as_secs_f64());
    info!("   송신자: {}", sender_stats.summary());
    info!("   수신자: {}", receiver_stats.summary());
    if received == data.as_ref() {
        info!("   검증: ✅ 데이터 일치");
    } else {
        warn!(
            "   검증: ❌ 데이터 불일치 ({} bytes 수신 / {} bytes 전송)",
            received.len(),
            data.len()
        );
    }
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    Ok(())
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("로깅 초기화 실패: {}", e);
    }

    let demo = parse_args();
    if let Err(e) = run(demo).await {
        error!("데모 실패: {}", e);
        std::process::exit(1);
    }
}
