use agentos_core::ConnectionKey;
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

/// What a socket task reports back, tagged with the generation it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEvent {
	Opened { key: ConnectionKey, generation: u64 },
	Message { key: ConnectionKey, generation: u64, text: String },
	Closed { key: ConnectionKey, generation: u64 },
}

#[derive(Debug)]
enum SocketCommand {
	Text(String),
	Close { code: u16, reason: &'static str },
}

/// One physical socket. Dropping the handle closes it without a status code.
pub struct SocketHandle {
	generation: u64,
	commands: mpsc::UnboundedSender<SocketCommand>,
	task: JoinHandle<()>,
}

impl SocketHandle {
	pub fn generation(&self) -> u64 {
		self.generation
	}

	pub fn send_text(&self, text: String) -> bool {
		self.commands.send(SocketCommand::Text(text)).is_ok()
	}

	/// Sends a close frame and lets the task finish on its own.
	pub fn close(self, code: u16, reason: &'static str) {
		let _ = self.commands.send(SocketCommand::Close { code, reason });
	}

	pub fn abort(self) {
		self.task.abort();
	}
}

pub fn spawn_socket(
	url: Url,
	key: ConnectionKey,
	generation: u64,
	events: mpsc::UnboundedSender<SocketEvent>,
) -> SocketHandle {
	let (commands, rx) = mpsc::unbounded_channel();
	let task = tokio::spawn(socket_task(url, key, generation, events, rx));
	SocketHandle {
		generation,
		commands,
		task,
	}
}

async fn socket_task(
	url: Url,
	key: ConnectionKey,
	generation: u64,
	events: mpsc::UnboundedSender<SocketEvent>,
	mut commands: mpsc::UnboundedReceiver<SocketCommand>,
) {
	let mut ws = match connect_async(url.as_str()).await {
		Ok((ws, _)) => ws,
		Err(err) => {
			warn!(event = "socket_connect_error", key = %key, generation, error = %err);
			let _ = events.send(SocketEvent::Closed { key, generation });
			return;
		}
	};
	if events.send(SocketEvent::Opened { key, generation }).is_err() {
		let _ = ws.close(None).await;
		return;
	}

	loop {
		tokio::select! {
			incoming = ws.next() => {
				match incoming {
					Some(Ok(Message::Text(text))) => {
						if events.send(SocketEvent::Message { key, generation, text }).is_err() {
							break;
						}
					}
					Some(Ok(Message::Close(frame))) => {
						debug!(event = "socket_close_frame", key = %key, generation, frame = ?frame);
						break;
					}
					Some(Ok(_)) => {}
					Some(Err(err)) => {
						debug!(event = "socket_read_error", key = %key, generation, error = %err);
						break;
					}
					None => break,
				}
			}
			command = commands.recv() => {
				match command {
					Some(SocketCommand::Text(text)) => {
						if let Err(err) = ws.send(Message::Text(text)).await {
							debug!(event = "socket_write_error", key = %key, generation, error = %err);
							break;
						}
					}
					Some(SocketCommand::Close { code, reason }) => {
						let frame = CloseFrame {
							code: CloseCode::from(code),
							reason: Cow::Borrowed(reason),
						};
						let _ = ws.close(Some(frame)).await;
						break;
					}
					None => {
						let _ = ws.close(None).await;
						break;
					}
				}
			}
		}
	}
	let _ = events.send(SocketEvent::Closed { key, generation });
}
