//! STP 수신자
//!
//! 127.0.0.1 에서 송신자를 기다리고, 순서대로 전달된 바이트를 파일에 기록한다.
//!
//! 사용법:
//!   cargo run --release --bin stp-receiver -- <receiver_port> <sender_port> <file> <flp> <rlp> [OPTIONS]
//!
//! 예시:
//!   # 들어오는 세그먼트 10%, 나가는 ACK 5% 손실
//!   cargo run --release --bin stp-receiver -- 6000 5000 out.txt 0.1 0.05

use std::path::PathBuf;
use std::process::ExitCode;

use tokio::io::BufWriter;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use stp::{Config, InteractiveDrop, Receiver, UdpChannel};

const USAGE: &str = r#"STP Receiver - Simple Transport Protocol 수신자

사용법:
  stp-receiver <receiver_port> <sender_port> <file> <flp> <rlp> [OPTIONS]

인자:
  receiver_port           수신자 UDP 포트 (127.0.0.1)
  sender_port             송신자 UDP 포트 (127.0.0.1)
  file                    수신 데이터를 기록할 파일 경로
  flp                     들어오는 세그먼트 손실 확률 (0.0~1.0)
  rlp                     나가는 ACK 손실 확률 (0.0~1.0)

옵션:
  --manual                세그먼트마다 드롭 여부를 터미널에서 입력 (flp/rlp 무시)
  --linger <MS>           FIN 수신 후 대기 시간 (기본: 2000)
  --mss <N>               최대 세그먼트 크기 (기본: 1000)
  -h, --help              이 도움말 출력

로그 레벨은 RUST_LOG 로 조정 (예: RUST_LOG=stp::segment=debug)
"#;

/// 수신자 실행 인자
struct ReceiverArgs {
    receiver_port: u16,
    sender_port: u16,
    file: PathBuf,
    flp: f64,
    rlp: f64,
    manual: bool,
    config: Config,
}

fn parse_number<T: std::str::FromStr>(name: &str, value: Option<&String>) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("{} 값이 필요함", name))?;
    value
        .parse()
        .map_err(|_| format!("{} 는 숫자여야 함: {}", name, value))
}

fn parse_args() -> Result<ReceiverArgs, String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut positional = Vec::new();
    let mut config = Config::default();
    let mut manual = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--manual" => manual = true,
            "--linger" => {
                config.linger_ms = parse_number("--linger", args.get(i + 1))?;
                i += 1;
            }
            "--mss" => {
                config.mss = parse_number("--mss", args.get(i + 1))?;
                i += 1;
            }
            "--help" | "-h" => {
                println!("{}", USAGE);
                std::process::exit(0);
            }
            flag if flag.starts_with("--") => return Err(format!("알 수 없는 옵션: {}", flag)),
            _ => positional.push(args[i].clone()),
        }
        i += 1;
    }

    if positional.len() != 5 {
        return Err(format!("인자 5개가 필요함 ({}개 입력)", positional.len()));
    }

    // 윈도우는 수신자에 의미 없음, 검증만 통과시킴
    config.window_size_bytes = config.mss;

    Ok(ReceiverArgs {
        receiver_port: parse_number("receiver_port", positional.first())?,
        sender_port: parse_number("sender_port", positional.get(1))?,
        file: PathBuf::from(&positional[2]),
        flp: parse_number("flp", positional.get(3))?,
        rlp: parse_number("rlp", positional.get(4))?,
        manual,
        config,
    })
}

async fn run(args: ReceiverArgs) -> stp::Result<()> {
    let channel = UdpChannel::loopback(
        args.receiver_port,
        args.sender_port,
        args.config.recv_buffer_size,
    )
    .await?;
    let file = tokio::fs::File::create(&args.file).await?;
    info!("Receiver listening on {}", channel.local_addr()?);

    let receiver = Receiver::new(args.config, channel, BufWriter::new(file))?;
    let mut receiver = if args.manual {
        receiver
            .with_incoming_loss(InteractiveDrop::stdin("incoming"))
            .with_outgoing_loss(InteractiveDrop::stdin("outgoing"))
    } else {
        receiver.with_loss_probabilities(args.flp, args.rlp)?
    };

    let stats = receiver.run().await?;
    info!("Output written to {:?}", args.file);

    println!("{}", stats.summary());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // 로깅 설정
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("로깅 초기화 실패: {}", e);
    }

    let args = match parse_args() {
        Ok(args) => args,
        Err(msg) => {
            eprintln!("{}\n\n{}", msg, USAGE);
            return ExitCode::from(2);
        }
    };

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("수신 실패: {}", e);
            ExitCode::FAILURE
        }
    }
}
