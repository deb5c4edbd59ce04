//! wtftp 서버 - 윈도우 기반 TFTP 서버
//!
//! RFC 1350 + blksize/tsize/timeout/windowsize 옵션 지원
//!
//! 사용법:
//!   cargo run --release --bin wtftp-server -- [OPTIONS]
//!
//! 예시:
//!   # 현재 디렉토리를 69번 포트로 서비스
//!   cargo run --release --bin wtftp-server -- --root .
//!
//!   # 블록 크기 1024 제한, 업로드 10MB 제한
//!   cargo run --release --bin wtftp-server -- -b 0.0.0.0:6969 -r /srv/tftp --blksize-max 1024 --tsize-max 10485760

use std::path::PathBuf;

use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use wtftp::{Server, ServerConfig};

/// 실행 인자
struct Args {
    config: ServerConfig,
    log_level: Level,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: ServerConfig::default(),
            log_level: Level::INFO,
        }
    }
}

fn parse_args() -> Args {
    let args: Vec<String> = std::env::args().collect();
    let mut parsed = Args::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--bind" | "-b" => {
                if i + 1 < args.len() {
                    parsed.config.bind_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--root" | "-r" => {
                if i + 1 < args.len() {
                    parsed.config.root = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--retries" => {
                if i + 1 < args.len() {
                    parsed.config.max_retries = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--interval" => {
                if i + 1 < args.len() {
                    parsed.config.retransmit_interval_ms =
                        args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--blksize-max" => {
                if i + 1 < args.len() {
                    parsed.config.blksize_max = Some(args[i + 1].parse().expect("유효한 숫자 필요"));
                    i += 1;
                }
            }
            "--tsize-max" => {
                if i + 1 < args.len() {
                    parsed.config.tsize_max = Some(args[i + 1].parse().expect("유효한 숫자 필요"));
                    i += 1;
                }
            }
            "--no-overwrite" => {
                parsed.config.allow_overwrite = false;
            }
            "--verbose" | "-v" => {
                parsed.log_level = Level::DEBUG;
            }
            "--help" | "-h" => {
                println!(
                    r#"wtftp-server - 윈도우 기반 TFTP 서버

RFC 1350 + 옵션 확장 (blksize, tsize, timeout, windowsize)

사용법:
  cargo run --release --bin wtftp-server -- [OPTIONS]

옵션:
  -b, --bind <ADDR>        바인드 주소 (기본: 0.0.0.0:69)
  -r, --root <DIR>         서비스 루트 디렉토리 (기본: .)
  --retries <N>            최대 재전송 횟수 (기본: 3)
  --interval <MS>          기본 재전송 간격 밀리초 (기본: 2000)
  --blksize-max <SIZE>     허용할 최대 블록 크기 (기본: 1496)
  --tsize-max <BYTES>      업로드 최대 크기 (기본: 무제한)
  --no-overwrite           업로드로 기존 파일 덮어쓰기 금지
  -v, --verbose            디버그 로그 출력
  -h, --help               이 도움말 출력

예시:
  # 비특권 포트로 서비스
  cargo run --release --bin wtftp-server -- -b 0.0.0.0:6969 -r /srv/tftp
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

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

    let config = args.config;
    info!("wtftp server starting...");
    info!("Root directory: {}", config.root.display());
    info!(
        "Retransmit: {} ms x {}",
        config.retransmit_interval_ms, config.max_retries
    );
    if let Some(max) = config.blksize_max {
        info!("Block size cap: {} bytes", max);
    }
    if let Some(max) = config.tsize_max {
        info!("Upload size cap: {} bytes", max);
    }

    let server = Server::bind(config).await?;

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, {} session(s) still active", server.active_sessions());
            for (peer, session) in server.sessions() {
                info!(
                    "  {} {:?} {} ({:.1}s)",
                    peer,
                    session.direction,
                    session.filename,
                    session.started.elapsed().as_secs_f64()
                );
            }
            server.shutdown();
        }
    }

    Ok(())
}
