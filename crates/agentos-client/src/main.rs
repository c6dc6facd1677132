use agentos_client::config::{load_config, Args, RuntimeConfig};
use agentos_client::input::{ClientInput, KeyRouter};
use agentos_client::runtime::Driver;
use agentos_client::terminal::TtySurface;
use agentos_client::watchdog::run_watchdog;
use agentos_core::logging::init_logging;
use agentos_core::{ConnectionState, Workspace};
use anyhow::Context;
use clap::Parser;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::{self, Read};
use std::time::{Duration, Instant};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
	let args = Args::parse();
	let config = match load_config(args) {
		Ok(config) => config,
		Err(err) => {
			eprintln!("agentos-term: {err}");
			std::process::exit(2);
		}
	};
	let _log_guard = init_logging(
		&config.log_dir,
		&config.log_level,
		config.log_stdout,
		"agentos-term",
	);
	info!(event = "client_start", url = %config.url, session = ?config.session.as_ref().map(|s| s.id.as_str()));

	let result = match enable_raw_mode().context("enabling raw mode") {
		Ok(()) => {
			let result = run(config).await;
			if let Err(err) = disable_raw_mode() {
				warn!(event = "raw_mode_restore_failed", error = %err);
			}
			result
		}
		Err(err) => Err(err),
	};
	if let Err(err) = &result {
		error!(event = "client_error", error = %err);
		eprintln!("agentos-term: {err:#}");
	}
	// the stdin reader is parked in a blocking read; exiting does not wait for it
	std::process::exit(exit_code(&result));
}

fn exit_code(result: &anyhow::Result<()>) -> i32 {
	match result {
		Ok(()) => 0,
		Err(_) => 1,
	}
}

async fn run(config: RuntimeConfig) -> anyhow::Result<()> {
	let workspace = Workspace::new(
		config.workspace.clone(),
		Box::new(|_| TtySurface::stdout()),
		Instant::now(),
	);
	let driver = Driver::new(workspace, config.url.clone(), config.session.clone());
	let (tx, rx) = mpsc::channel::<ClientInput>(256);

	spawn_stdin_reader(tx.clone());
	spawn_signal_listeners(tx.clone()).context("installing signal handlers")?;
	tokio::spawn(run_watchdog(tx.clone()));
	tokio::spawn(watch_state(driver.subscribe_state(), config.session.is_some(), tx.clone()));
	drop(tx);

	let _workspace = driver.run(rx).await;
	// give the close frames a moment to reach the endpoint
	tokio::time::sleep(Duration::from_millis(100)).await;
	Ok(())
}

fn spawn_stdin_reader(tx: mpsc::Sender<ClientInput>) {
	tokio::task::spawn_blocking(move || {
		let mut stdin = io::stdin();
		let mut buffer = [0u8; 4096];
		let mut router = KeyRouter::new();
		loop {
			let read = match stdin.read(&mut buffer) {
				Ok(0) => break,
				Ok(count) => count,
				Err(_) => break,
			};
			for input in router.feed(&buffer[..read]) {
				let quit = input == ClientInput::Quit;
				if tx.blocking_send(input).is_err() || quit {
					return;
				}
			}
		}
		let _ = tx.blocking_send(ClientInput::Quit);
	});
}

fn spawn_signal_listeners(tx: mpsc::Sender<ClientInput>) -> io::Result<()> {
	let mut winch = signal(SignalKind::window_change())?;
	let mut term = signal(SignalKind::terminate())?;
	let mut hup = signal(SignalKind::hangup())?;
	tokio::spawn(async move {
		loop {
			let input = tokio::select! {
				Some(()) = winch.recv() => ClientInput::Resized,
				Some(()) = term.recv() => ClientInput::Quit,
				Some(()) = hup.recv() => ClientInput::Quit,
				else => break,
			};
			let quit = input == ClientInput::Quit;
			if tx.send(input).await.is_err() || quit {
				break;
			}
		}
	});
	Ok(())
}

/// Logs the indicator and issues the configured attach on first connect.
async fn watch_state(
	mut state: watch::Receiver<ConnectionState>,
	attach_on_connect: bool,
	tx: mpsc::Sender<ClientInput>,
) {
	let mut attached = false;
	loop {
		let current = *state.borrow_and_update();
		info!(event = "indicator", state = %current);
		if current == ConnectionState::Connected && attach_on_connect && !attached {
			attached = true;
			if tx.send(ClientInput::AttachConfigured).await.is_err() {
				break;
			}
		}
		if state.changed().await.is_err() {
			break;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn exit_code_reflects_run_outcome() {
		assert_eq!(exit_code(&Ok(())), 0);
		assert_eq!(exit_code(&Err(anyhow::anyhow!("socket refused"))), 1);
	}
}
