use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info};

use squall_common::{DEFAULT_HOST, DEFAULT_PORT, MAX_CONNECTIONS};
use squall_server::{Connection, handle_connection};
use squall_storage::{DEFAULT_AOF_PATH, FsyncPolicy, Store, StoreOptions};

#[derive(Parser, Debug)]
#[command(name = "squall-server", about = "Squall — string cache with TTL and AOF persistence")]
struct Args {
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,
    #[arg(long, default_value_t = MAX_CONNECTIONS)]
    max_connections: usize,
    #[arg(long, value_name = "FILE", default_value = DEFAULT_AOF_PATH)]
    aof: PathBuf,
    #[arg(long, default_value = "always", value_parser = parse_fsync)]
    fsync: FsyncPolicy,
    #[arg(long, default_value_t = 30)]
    sweep_interval_secs: u64,
}

fn parse_fsync(s: &str) -> Result<FsyncPolicy, String> {
    match s.to_lowercase().as_str() {
        "always" => Ok(FsyncPolicy::Always),
        "everysec" => Ok(FsyncPolicy::EverySec),
        "no" => Ok(FsyncPolicy::No),
        _ => Err(format!("valor inválido: '{s}'. Use: always, everysec, no")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "squall_server=info,squall_storage=info".into()),
        )
        .init();

    let args = Args::parse();
    let addr = format!("{}:{}", args.host, args.port);

    // Recuperação acontece aqui dentro; falha ao abrir o AOF é fatal
    let store = Store::open(StoreOptions {
        aof_path: args.aof,
        fsync: args.fsync,
        sweep_interval: Duration::from_secs(args.sweep_interval_secs),
    })
    .await?;

    let listener = TcpListener::bind(&addr).await?;
    info!("Squall escutando em {addr}");

    let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(args.max_connections));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    loop {
        let permit = tokio::select! {
            permit = semaphore.clone().acquire_owned() => permit?,
            _ = signal::ctrl_c() => {
                info!("shutdown signal recebido");
                break;
            }
        };

        let (socket, peer) = tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok(v) => v,
                    Err(e) => {
                        error!("erro ao aceitar conexão: {e}");
                        continue;
                    }
                }
            }
            _ = signal::ctrl_c() => {
                info!("shutdown signal recebido");
                break;
            }
        };

        info!("nova conexão: {peer}");
        let store = store.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            let conn = Connection::new(socket);
            if let Err(e) = handle_connection(conn, store, &mut shutdown_rx).await {
                error!("erro na conexão {peer}: {e}");
            }
            info!("conexão encerrada: {peer}");
            drop(permit);
        });
    }

    // Derruba as conexões e drena o log antes de sair
    drop(shutdown_tx);
    store.close().await;

    Ok(())
}
