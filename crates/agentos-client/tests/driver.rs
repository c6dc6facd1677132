use agentos_client::input::ClientInput;
use agentos_client::runtime::Driver;
use agentos_core::term_wire::{decode_client_frame, ClientFrame};
use agentos_core::{
	ConnectionState, FontMetrics, Geometry, PixelSize, ScrollSnapshot, TerminalSurface, Workspace,
	WorkspaceConfig,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

const WAIT: Duration = Duration::from_secs(5);

struct RecordingSurface {
	output: Arc<Mutex<String>>,
	geometry: Geometry,
	font_px: f32,
}

impl TerminalSurface for RecordingSurface {
	fn container_size(&self) -> Option<PixelSize> {
		Some(PixelSize::new(640.0, 384.0))
	}
	fn font_metrics(&self) -> FontMetrics {
		FontMetrics {
			cell_width: 8.0,
			cell_height: 16.0,
		}
	}
	fn font_size(&self) -> f32 {
		self.font_px
	}
	fn set_font_size(&mut self, px: f32) {
		self.font_px = px;
	}
	fn geometry(&self) -> Geometry {
		self.geometry
	}
	fn apply_geometry(&mut self, geometry: Geometry) {
		self.geometry = geometry;
	}
	fn write_output(&mut self, data: &str) {
		if let Ok(mut output) = self.output.lock() {
			output.push_str(data);
		}
	}
	fn viewport_line(&self) -> usize {
		0
	}
	fn scroll_to_line(&mut self, _line: usize) {}
	fn scroll_lines(&mut self, _delta: i32) {}
	fn is_alternate_screen(&self) -> bool {
		false
	}
	fn focus(&mut self) {}
	fn scroll_snapshot(&self) -> ScrollSnapshot {
		ScrollSnapshot::default()
	}
	fn restore_scroll(&mut self, _snapshot: ScrollSnapshot) {}
}

#[tokio::test]
async fn driver_carries_frames_both_ways_and_closes_normally() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<String>();
	let server = tokio::spawn(async move {
		let (stream, _) = listener.accept().await.unwrap();
		let mut ws = accept_async(stream).await.unwrap();
		ws.send(Message::Text(r#"{"type":"output","data":"hello"}"#.to_string()))
			.await
			.unwrap();
		while let Some(Ok(message)) = ws.next().await {
			match message {
				Message::Text(text) => {
					let _ = frames_tx.send(text);
				}
				Message::Close(frame) => return frame.map(|frame| u16::from(frame.code)),
				_ => {}
			}
		}
		None
	});

	let output = Arc::new(Mutex::new(String::new()));
	let shared = output.clone();
	let workspace = Workspace::new(
		WorkspaceConfig::default(),
		Box::new(move |_| RecordingSurface {
			output: shared.clone(),
			geometry: Geometry::new(80, 24),
			font_px: 14.0,
		}),
		Instant::now(),
	);
	let url = Url::parse(&format!("ws://{addr}/terminal")).unwrap();
	let driver = Driver::new(workspace, url, None);
	let mut state = driver.subscribe_state();
	let (tx, rx) = mpsc::channel(16);

	let script = async move {
		let first = timeout(WAIT, frames_rx.recv()).await.unwrap().unwrap();
		assert!(matches!(
			decode_client_frame(&first).unwrap(),
			ClientFrame::Resize { .. }
		));
		timeout(WAIT, state.wait_for(|state| *state == ConnectionState::Connected))
			.await
			.unwrap()
			.unwrap();

		tx.send(ClientInput::Keys("ls\r".to_string())).await.unwrap();
		// later fit passes may resend geometry first
		let input = loop {
			let next = timeout(WAIT, frames_rx.recv()).await.unwrap().unwrap();
			match decode_client_frame(&next).unwrap() {
				ClientFrame::Resize { .. } => continue,
				other => break other,
			}
		};
		assert_eq!(
			input,
			ClientFrame::Input {
				data: "ls\r".to_string()
			}
		);

		let deadline = tokio::time::Instant::now() + WAIT;
		while !output.lock().unwrap().contains("hello") {
			assert!(tokio::time::Instant::now() < deadline, "output never rendered");
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		tx.send(ClientInput::Quit).await.unwrap();
	};

	let (workspace, ()) = tokio::join!(driver.run(rx), script);
	assert!(workspace.connection_keys().is_empty());

	let close_code = timeout(WAIT, server).await.unwrap().unwrap();
	assert_eq!(close_code, Some(1000));
}
