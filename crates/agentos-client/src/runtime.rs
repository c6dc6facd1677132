use crate::input::ClientInput;
use crate::socket::{spawn_socket, SocketEvent, SocketHandle};
use agentos_core::fit::ResizeTrigger;
use agentos_core::{
	ConnectionKey, ConnectionState, Outgoing, SessionRecord, TerminalSurface, TransportAction, Workspace,
};
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};
use url::Url;

/// Owns the workspace and performs its socket work. Everything that mutates
/// the workspace runs on this one task, in arrival order.
pub struct Driver<S> {
	workspace: Workspace<S>,
	url: Url,
	session: Option<SessionRecord>,
	sockets: HashMap<ConnectionKey, SocketHandle>,
	events_tx: mpsc::UnboundedSender<SocketEvent>,
	events_rx: mpsc::UnboundedReceiver<SocketEvent>,
	state_tx: watch::Sender<ConnectionState>,
}

impl<S: TerminalSurface> Driver<S> {
	pub fn new(workspace: Workspace<S>, url: Url, session: Option<SessionRecord>) -> Self {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let (state_tx, _) = watch::channel(ConnectionState::Connecting);
		Self {
			workspace,
			url,
			session,
			sockets: HashMap::new(),
			events_tx,
			events_rx,
			state_tx,
		}
	}

	/// State of the focused terminal, for an indicator.
	pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
		self.state_tx.subscribe()
	}

	pub fn workspace(&self) -> &Workspace<S> {
		&self.workspace
	}

	/// Runs until `Quit` arrives or every input sender is gone, then tears
	/// the workspace down and closes its sockets.
	pub async fn run(mut self, mut inputs: mpsc::Receiver<ClientInput>) -> Workspace<S> {
		loop {
			self.flush();
			let deadline = self.workspace.next_deadline();
			let sleep = tokio::time::sleep_until(
				deadline
					.map(tokio::time::Instant::from_std)
					.unwrap_or_else(|| tokio::time::Instant::now() + std::time::Duration::from_secs(3_600)),
			);
			tokio::select! {
				Some(event) = self.events_rx.recv() => self.handle_socket_event(event),
				input = inputs.recv() => match input {
					Some(ClientInput::Quit) | None => break,
					Some(input) => self.handle_input(input),
				},
				_ = sleep, if deadline.is_some() => self.workspace.poll(Instant::now()),
			}
		}
		info!(event = "client_shutdown");
		self.workspace.shutdown();
		self.flush();
		self.workspace
	}

	fn handle_socket_event(&mut self, event: SocketEvent) {
		match event {
			SocketEvent::Opened { key, generation } => {
				self.workspace.on_socket_open(key, generation, Instant::now())
			}
			SocketEvent::Message { key, generation, text } => {
				self.workspace.on_socket_message(key, generation, &text)
			}
			SocketEvent::Closed { key, generation } => {
				if self.sockets.get(&key).map(SocketHandle::generation) == Some(generation) {
					self.sockets.remove(&key);
				}
				self.workspace.on_socket_closed(key, generation, Instant::now());
			}
		}
	}

	fn handle_input(&mut self, input: ClientInput) {
		let now = Instant::now();
		match input {
			ClientInput::Keys(keys) => {
				self.workspace.send_input(&keys);
			}
			ClientInput::Resized => self.workspace.resize_trigger(ResizeTrigger::Window, now),
			ClientInput::Attach(session) => {
				self.workspace.attach_focused(&session, now);
			}
			ClientInput::AttachConfigured => match self.session.clone() {
				Some(session) => {
					self.workspace.attach_focused(&session, now);
				}
				None => debug!(event = "attach_skipped", reason = "no session configured"),
			},
			ClientInput::Detach => {
				self.workspace.detach_focused(now);
			}
			ClientInput::Resumed(gap) => self.workspace.resumed_after(gap),
			ClientInput::Quit => {}
		}
	}

	fn flush(&mut self) {
		for Outgoing { key, action } in self.workspace.drain_outbox() {
			self.execute(key, action);
		}
		let focused = self
			.workspace
			.focused_key()
			.and_then(|key| self.workspace.connection(key))
			.map(|conn| conn.state())
			.unwrap_or(ConnectionState::Closed);
		self.state_tx.send_if_modified(|state| {
			if *state == focused {
				return false;
			}
			info!(event = "connection_state", from = %state, to = %focused);
			*state = focused;
			true
		});
	}

	fn execute(&mut self, key: ConnectionKey, action: TransportAction) {
		match action {
			TransportAction::Open { generation } => {
				let handle = spawn_socket(self.url.clone(), key, generation, self.events_tx.clone());
				if let Some(stale) = self.sockets.insert(key, handle) {
					debug!(event = "socket_replaced", key = %key, generation = stale.generation());
					stale.abort();
				}
			}
			TransportAction::Send { generation, text } => match self.sockets.get(&key) {
				Some(handle) if handle.generation() == generation => {
					handle.send_text(text);
				}
				_ => debug!(event = "send_without_socket", key = %key, generation),
			},
			TransportAction::Close {
				generation,
				code,
				reason,
			} => {
				if self.sockets.get(&key).map(SocketHandle::generation) == Some(generation) {
					if let Some(handle) = self.sockets.remove(&key) {
						handle.close(code, reason);
					}
				}
			}
		}
	}
}
