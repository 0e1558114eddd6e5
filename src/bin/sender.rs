//! STP 송신자
//!
//! 파일 전체를 읽어 127.0.0.1 의 수신자에게 전송한다.
//!
//! 사용법:
//!   cargo run --release --bin stp-sender -- <sender_port> <receiver_port> <file> <max_win> <rto> [OPTIONS]
//!
//! 예시:
//!   cargo run --release --bin stp-sender -- 5000 6000 test.txt 6 1000 --mss 2

use std::path::PathBuf;
use std::process::ExitCode;

use bytes::Bytes;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use stp::{Config, Sender, UdpChannel};

const USAGE: &str = r#"STP Sender - Simple Transport Protocol 송신자

사용법:
  stp-sender <sender_port> <receiver_port> <file> <max_win> <rto> [OPTIONS]

인자:
  sender_port             송신자 UDP 포트 (127.0.0.1)
  receiver_port           수신자 UDP 포트 (127.0.0.1)
  file                    전송할 파일 경로
  max_win                 윈도우 크기 (바이트, MSS 의 배수)
  rto                     재전송 타임아웃 (밀리초)

옵션:
  --mss <N>               최대 세그먼트 크기 (기본: 1000)
  --isn <N>               초기 시퀀스 번호 (기본: 랜덤)
  --resent-limit <N>      SYN/FIN 재전송 한도 (기본: 3)
  -h, --help              이 도움말 출력

로그 레벨은 RUST_LOG 로 조정 (예: RUST_LOG=stp::segment=debug)
"#;

/// 송신자 실행 인자
struct SenderArgs {
    sender_port: u16,
    receiver_port: u16,
    file: PathBuf,
    config: Config,
}

fn parse_number<T: std::str::FromStr>(name: &str, value: Option<&String>) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("{} 값이 필요함", name))?;
    value
        .parse()
        .map_err(|_| format!("{} 는 숫자여야 함: {}", name, value))
}

fn parse_args() -> Result<SenderArgs, String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let mut positional = Vec::new();
    let mut config = Config::default();

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--mss" => {
                config.mss = parse_number("--mss", args.get(i + 1))?;
                i += 1;
            }
            "--isn" => {
                config.isn = Some(parse_number("--isn", args.get(i + 1))?);
                i += 1;
            }
            "--resent-limit" => {
                config.resent_limit = parse_number("--resent-limit", args.get(i + 1))?;
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

    config.window_size_bytes = parse_number("max_win", positional.get(3))?;
    config.rto_ms = parse_number("rto", positional.get(4))?;

    Ok(SenderArgs {
        sender_port: parse_number("sender_port", positional.first())?,
        receiver_port: parse_number("receiver_port", positional.get(1))?,
        file: PathBuf::from(&positional[2]),
        config,
    })
}

async fn run(args: SenderArgs) -> stp::Result<()> {
    let data = tokio::fs::read(&args.file).await?;
    info!("Loading file: {:?} ({} bytes)", args.file, data.len());

    let channel = UdpChannel::loopback(
        args.sender_port,
        args.receiver_port,
        args.config.recv_buffer_size,
    )
    .await?;

    info!(
        "MSS: {} bytes, window: {} bytes, RTO: {} ms",
        args.config.mss, args.config.window_size_bytes, args.config.rto_ms
    );

    let mut sender = Sender::new(args.config, channel, Bytes::from(data))?;
    let stats = sender.run().await?;

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
            error!("전송 실패: {}", e);
            ExitCode::FAILURE
        }
    }
}
