mod session;

use agentos_core::logging::init_logging;
use agentos_core::term_wire::{encode_frame, ServerFrame};
use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, ConnectInfo, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use session::{frame_op, PtySession, ShellCommand};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const MAX_FRAME_BYTES: usize = 256 * 1024;
const DEFAULT_ADDR: &str = "127.0.0.1:7681";

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    shell: String,
    log_level: String,
    log_dir: String,
    write_timeout: Duration,
}

#[derive(Parser, Debug)]
#[command(name = "agentos-term-server")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value = "")]
    shell: String,
    #[arg(long, default_value = "")]
    log_level: String,
    /// Also append logs to a file in this directory.
    #[arg(long, default_value = "")]
    log_dir: String,
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
}

struct ServerState {
    shell: ShellCommand,
    write_timeout: Duration,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(Args::parse());
    let _log_guard = init_logging(&config.log_dir, &config.log_level, true, "agentos-term-server");
    let addr: SocketAddr = config.addr.parse()?;
    if !addr.ip().is_loopback() {
        anyhow::bail!("refusing to serve a shell on non-loopback address {addr}");
    }

    let state = Arc::new(ServerState {
        shell: ShellCommand::login(&config.shell),
        write_timeout: config.write_timeout,
    });
    let app = Router::new()
        .route("/terminal", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(event = "server_start", addr = %addr, shell = %config.shell);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await?;
    info!(event = "server_stop");
    Ok(())
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    if !addr.ip().is_loopback() {
        return axum::http::StatusCode::FORBIDDEN.into_response();
    }
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

async fn handle_socket(socket: WebSocket, remote: SocketAddr, state: Arc<ServerState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Message>(256);
    let write_timeout = state.write_timeout;
    let write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let send = ws_sender.send(msg);
            if tokio::time::timeout(write_timeout, send).await.is_err() {
                return;
            }
        }
    });

    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<ServerFrame>();
    let mut pty = match PtySession::spawn(&state.shell, frames_tx) {
        Ok(pty) => pty,
        Err(err) => {
            error!(event = "pty_spawn_error", remote = %remote, error = %err);
            let _ = tx
                .send(Message::Text(format!("failed to start shell: {err}\r\n")))
                .await;
            drop(tx);
            let _ = write_task.await;
            return;
        }
    };
    info!(event = "client_connected", remote = %remote);

    // the socket stays open after the shell exits, until the client closes it
    let mut shell_done = false;
    loop {
        tokio::select! {
            frame = frames_rx.recv(), if !shell_done => {
                let Some(frame) = frame else {
                    shell_done = true;
                    continue;
                };
                match encode_frame(&frame) {
                    Ok(text) => {
                        if tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => warn!(event = "frame_encode_error", error = %err),
                }
            }
            incoming = ws_receiver.next() => {
                let msg = match incoming {
                    Some(Ok(msg)) => msg,
                    Some(Err(err)) => {
                        warn!(event = "read_error", remote = %remote, error = %err);
                        break;
                    }
                    None => break,
                };
                let text = match msg {
                    Message::Text(text) => text,
                    Message::Close(frame) => {
                        info!(event = "client_close", remote = %remote, code = ?frame.map(|f| f.code));
                        break;
                    }
                    Message::Binary(_) | Message::Ping(_) | Message::Pong(_) => continue,
                };
                if text.len() > MAX_FRAME_BYTES {
                    warn!(event = "frame_too_large", remote = %remote, size = text.len());
                    continue;
                }
                let Some(op) = frame_op(&text) else { continue };
                if let Err(err) = pty.apply(op) {
                    debug!(event = "pty_write_error", remote = %remote, error = %err);
                }
            }
        }
    }

    drop(pty);
    drop(tx);
    let _ = write_task.await;
    info!(event = "client_disconnected", remote = %remote);
}

fn load_config(args: Args) -> Config {
    let addr = resolve_with_env(&args.addr, "AGENTOS_SERVER_ADDR", DEFAULT_ADDR);
    let shell = if args.shell.trim().is_empty() {
        resolve_shell()
    } else {
        args.shell
    };
    let log_level = resolve_with_env(&args.log_level, "AGENTOS_LOG_LEVEL", "info");
    let log_dir = resolve_with_env(&args.log_dir, "AGENTOS_SERVER_LOG_DIR", "");
    Config {
        addr,
        shell,
        log_level,
        log_dir,
        write_timeout: Duration::from_secs(args.write_timeout.max(1)),
    }
}

fn resolve_with_env(flag: &str, key: &str, fallback: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value,
        _ => fallback.to_string(),
    }
}

fn resolve_shell() -> String {
    for key in ["AGENTOS_SHELL", "SHELL"] {
        if let Ok(value) = std::env::var(key) {
            if !value.trim().is_empty() {
                return value;
            }
        }
    }
    "/bin/sh".to_string()
}
