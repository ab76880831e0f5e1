use std::process::ExitCode;

use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use rudis::server::{Server, ServerConfig};

/// Historical executable default; the library default is 6379.
const DEFAULT_PORT: u16 = 1337;

fn print_help() {
    println!(
        r#"rudis - a Redis-compatible in-memory key/value server

USAGE:
    rudis [OPTIONS]

OPTIONS:
    -p, --port <PORT>    Port to listen on (1-65535, default: {})
    -h, --help           Print this help message
"#,
        DEFAULT_PORT
    );
}

fn parse_args() -> Result<u16, ExitCode> {
    let mut port = DEFAULT_PORT;
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                return Err(ExitCode::SUCCESS);
            }
            "-p" | "--port" => {
                let value = args.next().unwrap_or_default();

                match value.parse::<u16>() {
                    Ok(parsed) if parsed >= 1 => port = parsed,
                    _ => {
                        eprintln!("invalid port value: {:?}", value);
                        return Err(ExitCode::from(42));
                    }
                }
            }
            other => {
                eprintln!("unknown argument: {}", other);
                print_help();
                return Err(ExitCode::from(2));
            }
        }
    }

    Ok(port)
}

#[tokio::main]
async fn main() -> ExitCode {
    let port = match parse_args() {
        Ok(port) => port,
        Err(code) => return code,
    };

    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let config = ServerConfig {
        port,
        ..ServerConfig::default()
    };

    let bound = match Server::new(config).bind().await {
        Ok(bound) => bound,
        Err(error) => {
            error!(%error, "failed to start server");
            return ExitCode::FAILURE;
        }
    };

    let shared = bound.shared().clone();

    tokio::select! {
        _ = bound.serve() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received, saving before exit");

            if let Err(reason) = shared.snapshots.save_sync().await {
                error!(%reason, "final save failed");
            }
        }
    }

    ExitCode::SUCCESS
}
