use crate::config::Tuning;
use crate::fit::{FitCoordinator, ResizeTrigger};
use crate::pane_tree::{PaneId, TabId};
use crate::reconnect::{ConnectionState, ControlAction, ReconnectController, SocketReadyState};
use crate::surface::{Geometry, ScrollSnapshot, TerminalSurface};
use crate::term_wire::{decode_server_text, encode_frame, exit_banner, ClientFrame, Inbound, ServerFrame};
use crate::touch::{TouchOutcome, TouchPoint, TouchScrollTranslator};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey {
    pub pane: PaneId,
    pub tab: TabId,
}

impl ConnectionKey {
    pub fn new(pane: PaneId, tab: TabId) -> Self {
        Self { pane, tab }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pane, self.tab)
    }
}

/// Socket work the driver must perform. `generation` names the socket; the
/// driver drops actions for sockets it already replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportAction {
    Open { generation: u64 },
    Send { generation: u64, text: String },
    Close { generation: u64, code: u16, reason: &'static str },
}

impl From<ControlAction> for TransportAction {
    fn from(action: ControlAction) -> Self {
        match action {
            ControlAction::Open { generation } => TransportAction::Open { generation },
            ControlAction::Close {
                generation,
                code,
                reason,
            } => TransportAction::Close {
                generation,
                code,
                reason,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Teardown {
    pub snapshot: ScrollSnapshot,
    pub close: Option<TransportAction>,
}

/// One terminal slot's link to the endpoint: a renderer surface, its socket
/// lifecycle, and the fit and touch handling that feed it.
pub struct TerminalConnection<S> {
    key: ConnectionKey,
    surface: S,
    controller: ReconnectController,
    fit: FitCoordinator,
    touch: TouchScrollTranslator,
    torn_down: bool,
}

impl<S: TerminalSurface> TerminalConnection<S> {
    /// The socket opens after the mount delay; the first fit runs with it.
    pub fn new(key: ConnectionKey, surface: S, tuning: &Tuning, now: Instant) -> Self {
        let open_at = now + tuning.mount_delay;
        let mut fit = FitCoordinator::new(tuning.fit.clone());
        fit.request(ResizeTrigger::Mount, open_at);
        Self {
            key,
            surface,
            controller: ReconnectController::new(tuning.backoff, tuning.hung_socket_after, open_at),
            fit,
            touch: TouchScrollTranslator::new(tuning.touch.clone()),
            torn_down: false,
        }
    }

    pub fn key(&self) -> ConnectionKey {
        self.key
    }

    pub fn state(&self) -> ConnectionState {
        self.controller.state()
    }

    pub fn generation(&self) -> u64 {
        self.controller.generation()
    }

    pub fn ready_state(&self) -> SocketReadyState {
        self.controller.ready_state()
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        if self.torn_down {
            return None;
        }
        match (self.controller.next_deadline(), self.fit.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// A fresh socket always learns the current geometry before anything else.
    pub fn on_open(&mut self, generation: u64) -> Vec<TransportAction> {
        if self.torn_down || !self.controller.on_open(generation) {
            return Vec::new();
        }
        let geometry = self.fit.force(&mut self.surface);
        let actions = self.send_frame(&resize_frame(geometry)).into_iter().collect();
        self.surface.focus();
        actions
    }

    pub fn on_message(&mut self, generation: u64, text: &str) {
        if self.torn_down || generation != self.controller.generation() {
            return;
        }
        match decode_server_text(text) {
            Inbound::Frame(ServerFrame::Output { data }) => self.surface.write_output(&data),
            // the channel stays open: the tab may attach elsewhere later
            Inbound::Frame(ServerFrame::Exit { code }) => {
                debug!(event = "remote_exit", key = %self.key, code = ?code);
                self.surface.write_output(&exit_banner(code));
            }
            Inbound::Passthrough(raw) => self.surface.write_output(&raw),
            Inbound::Ignored(kind) => {
                debug!(event = "frame_ignored", key = %self.key, kind = %kind);
            }
        }
    }

    pub fn on_close(&mut self, generation: u64, now: Instant) -> bool {
        !self.torn_down && self.controller.on_close(generation, now)
    }

    pub fn send_input(&mut self, data: &str) -> Option<TransportAction> {
        self.send_frame(&ClientFrame::Input {
            data: data.to_string(),
        })
    }

    pub fn send_command(&mut self, line: &str) -> Option<TransportAction> {
        self.send_frame(&ClientFrame::Command {
            data: line.to_string(),
        })
    }

    pub fn request_fit(&mut self, trigger: ResizeTrigger, now: Instant) {
        if !self.torn_down {
            self.fit.request(trigger, now);
        }
    }

    pub fn poll(&mut self, now: Instant) -> Vec<TransportAction> {
        if self.torn_down {
            return Vec::new();
        }
        let mut actions = Vec::new();
        if let Some(action) = self.controller.poll(now) {
            actions.push(action.into());
        }
        if let Some(geometry) = self.fit.poll(now, &mut self.surface) {
            actions.extend(self.send_frame(&resize_frame(geometry)));
        }
        actions
    }

    pub fn hide(&mut self, now: Instant) {
        self.controller.hide(now);
    }

    pub fn show(&mut self, now: Instant) -> Vec<TransportAction> {
        let ready = self.controller.ready_state();
        self.controller
            .show(now, ready)
            .into_iter()
            .map(TransportAction::from)
            .collect()
    }

    pub fn resume_after(
        &mut self,
        hidden_for: Duration,
        ready: SocketReadyState,
    ) -> Vec<TransportAction> {
        self.controller
            .resume_after(hidden_for, ready)
            .into_iter()
            .map(TransportAction::from)
            .collect()
    }

    pub fn touch_start(&mut self, points: &[TouchPoint]) {
        self.touch.start(points, &self.surface);
    }

    pub fn touch_moved(&mut self, points: &[TouchPoint]) -> (TouchOutcome, Option<TransportAction>) {
        let outcome = self.touch.moved(points, &mut self.surface);
        let action = match &outcome {
            TouchOutcome::WheelInput(sequence) => self.send_input(sequence),
            _ => None,
        };
        (outcome, action)
    }

    pub fn touch_end(&mut self) {
        self.touch.end();
    }

    pub fn scroll_snapshot(&self) -> ScrollSnapshot {
        self.surface.scroll_snapshot()
    }

    pub fn restore_scroll(&mut self, snapshot: ScrollSnapshot) {
        self.surface.restore_scroll(snapshot);
    }

    /// Marks the teardown intentional before closing so the controller never
    /// schedules a retry for it. Returns `None` when already torn down.
    pub fn teardown(&mut self) -> Option<Teardown> {
        if self.torn_down {
            return None;
        }
        self.torn_down = true;
        self.touch.end();
        let close = self.controller.close().map(TransportAction::from);
        debug!(event = "connection_teardown", key = %self.key, closed_socket = close.is_some());
        Some(Teardown {
            snapshot: self.surface.scroll_snapshot(),
            close,
        })
    }

    fn send_frame(&mut self, frame: &ClientFrame) -> Option<TransportAction> {
        if self.torn_down || self.controller.state() != ConnectionState::Connected {
            debug!(event = "send_dropped", key = %self.key, state = %self.controller.state());
            return None;
        }
        match encode_frame(frame) {
            Ok(text) => Some(TransportAction::Send {
                generation: self.controller.generation(),
                text,
            }),
            Err(err) => {
                warn!(event = "frame_encode_failed", key = %self.key, error = %err);
                None
            }
        }
    }
}

fn resize_frame(geometry: Geometry) -> ClientFrame {
    ClientFrame::Resize {
        cols: geometry.cols,
        rows: geometry.rows,
    }
}
