//! wtftp 클라이언트 - 윈도우 기반 TFTP 클라이언트
//!
//! 사용법:
//!   cargo run --release --bin wtftp-client -- [OPTIONS] <get|put> <REMOTE> [LOCAL]
//!
//! 예시:
//!   # 파일 받기 (블록 1024, 윈도우 8)
//!   cargo run --release --bin wtftp-client -- -s 127.0.0.1:6969 --blksize 1024 --windowsize 8 get boot.img
//!
//!   # 텍스트 파일 올리기
//!   cargo run --release --bin wtftp-client -- -s 127.0.0.1:6969 --netascii put notes.txt

use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use wtftp::{Client, Config, TransferMode, DEFAULT_PORT};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Get,
    Put,
}

/// 실행 인자
struct Args {
    server_addr: SocketAddr,
    command: Option<Command>,
    remote: Option<String>,
    local: Option<PathBuf>,
    config: Config,
    log_level: Level,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)),
            command: None,
            remote: None,
            local: None,
            config: Config::default(),
            log_level: Level::INFO,
        }
    }
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args::default();
    let mut positional = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--server" | "-s" => {
                if i + 1 < args.len() {
                    parsed.server_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--profile" => {
                if i + 1 < args.len() {
                    parsed.config = match args[i + 1].as_str() {
                        "fast" => Config::high_throughput(),
                        "lossy" => Config::unreliable_network(),
                        _ => Config::default(),
                    };
                    i += 1;
                }
            }
            "--blksize" => {
                if i + 1 < args.len() {
                    parsed.config.block_size = Some(args[i + 1].parse().expect("유효한 숫자 필요"));
                    i += 1;
                }
            }
            "--windowsize" => {
                if i + 1 < args.len() {
                    parsed.config.window_size = Some(args[i + 1].parse().expect("유효한 숫자 필요"));
                    i += 1;
                }
            }
            "--timeout" => {
                if i + 1 < args.len() {
                    parsed.config.timeout = Some(args[i + 1].parse().expect("1~255 사이 숫자 필요"));
                    i += 1;
                }
            }
            "--retries" => {
                if i + 1 < args.len() {
                    parsed.config.max_retries = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--tsize" => {
                parsed.config.request_tsize = true;
            }
            "--netascii" => {
                parsed.config.mode = TransferMode::Netascii;
            }
            "--verbose" | "-v" => {
                parsed.log_level = Level::DEBUG;
            }
            "--help" | "-h" => {
                println!(
                    r#"wtftp-client - 윈도우 기반 TFTP 클라이언트

사용법:
  cargo run --release --bin wtftp-client -- [OPTIONS] <get|put> <REMOTE> [LOCAL]

옵션:
  -s, --server <ADDR>      서버 주소 (기본: 127.0.0.1:69)
  --profile <NAME>         설정 프리셋: fast, lossy
  --blksize <SIZE>         요청 블록 크기 (최대 1496)
  --windowsize <N>         요청 윈도우 크기
  --timeout <SECS>         요청 재전송 간격 (초)
  --retries <N>            최대 재전송 횟수 (기본: 3)
  --tsize                  전송 크기 옵션 요청
  --netascii               netascii 모드 (기본: octet)
  -v, --verbose            디버그 로그 출력
  -h, --help               이 도움말 출력

LOCAL을 생략하면 REMOTE와 같은 이름을 사용
"#
                );
                std::process::exit(0);
            }
            other => positional.push(other.to_string()),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    parsed.command = positional.next().map(|command| match command.as_str() {
        "get" => Command::Get,
        "put" => Command::Put,
        other => panic!("알 수 없는 명령: {}", other),
    });
    parsed.remote = positional.next();
    parsed.local = positional.next().map(PathBuf::from);

    parsed
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = parse_args();

    // 로깅 설정 (기본 레벨 + RUST_LOG 지시어)
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(args.log_level.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let (Some(command), Some(remote)) = (args.command, args.remote) else {
        eprintln!("사용법: wtftp-client [OPTIONS] <get|put> <REMOTE> [LOCAL] (--help 참고)");
        std::process::exit(2);
    };
    let local = args.local.unwrap_or_else(|| PathBuf::from(&remote));

    let client = Client::new(args.server_addr, args.config);
    let config = client.config();

    info!("wtftp client");
    info!("Server: {}", args.server_addr);
    info!("Mode: {}", config.mode.as_str());
    if let Some(size) = config.requested_block_size() {
        info!("Requested block size: {} bytes", size);
    }
    if let Some(window) = config.window_size {
        info!("Requested window size: {}", window);
    }

    let stats = match command {
        Command::Get => client.get_file(&remote, &local).await?,
        Command::Put => client.put_file(&local, &remote).await?,
    };

    println!("\n═══════════════════════════════════════");
    println!("전송 완료: {:?} {}", command, remote);
    println!("═══════════════════════════════════════");
    println!("{}", stats.summary());
    if let Some(len) = stats.final_block_len {
        println!("Final block: {} bytes", len);
    }

    Ok(())
}
