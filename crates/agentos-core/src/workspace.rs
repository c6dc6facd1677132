//! The dashboard model: pane tree, one connection per (pane, tab), the
//! per-tab attach sequencers, and the outbox of socket work they produce.

use crate::attach::{AttachEffect, AttachMachine, AttachPhase, AttachTarget, SessionRecord};
use crate::config::WorkspaceConfig;
use crate::connection::{ConnectionKey, TerminalConnection, TransportAction};
use crate::fit::ResizeTrigger;
use crate::pane_tree::{Orientation, PaneId, PaneTree, TabId};
use crate::reconnect::ConnectionState;
use crate::registry::ScrollRegistry;
use crate::scheduler::TimerQueue;
use crate::surface::TerminalSurface;
use crate::touch::{TouchOutcome, TouchPoint};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

pub type SurfaceFactory<S> = Box<dyn FnMut(ConnectionKey) -> S + Send>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub key: ConnectionKey,
    pub action: TransportAction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkspaceTimer {
    AttachStep(ConnectionKey),
}

pub struct Workspace<S> {
    config: WorkspaceConfig,
    tree: PaneTree,
    connections: BTreeMap<ConnectionKey, TerminalConnection<S>>,
    attachments: BTreeMap<ConnectionKey, AttachMachine>,
    timers: TimerQueue<WorkspaceTimer>,
    registry: ScrollRegistry,
    outbox: Vec<Outgoing>,
    factory: SurfaceFactory<S>,
    hidden_since: Option<Instant>,
    shut_down: bool,
}

impl<S: TerminalSurface> Workspace<S> {
    pub fn new(config: WorkspaceConfig, factory: SurfaceFactory<S>, now: Instant) -> Self {
        Self::with_registry(config, factory, ScrollRegistry::new(), now)
    }

    /// Starts from the snapshots a previous workspace left behind in
    /// [`Workspace::into_registry`]; mounted tabs pick theirs up.
    pub fn with_registry(
        config: WorkspaceConfig,
        factory: SurfaceFactory<S>,
        registry: ScrollRegistry,
        now: Instant,
    ) -> Self {
        let mut workspace = Self {
            tree: PaneTree::new(config.tuning.max_panes),
            config,
            connections: BTreeMap::new(),
            attachments: BTreeMap::new(),
            timers: TimerQueue::new(),
            registry,
            outbox: Vec::new(),
            factory,
            hidden_since: None,
            shut_down: false,
        };
        workspace.sync_mounts(now);
        workspace
    }

    pub fn tree(&self) -> &PaneTree {
        &self.tree
    }

    pub fn registry(&self) -> &ScrollRegistry {
        &self.registry
    }

    pub fn into_registry(self) -> ScrollRegistry {
        self.registry
    }

    pub fn connection(&self, key: ConnectionKey) -> Option<&TerminalConnection<S>> {
        self.connections.get(&key)
    }

    pub fn connection_mut(&mut self, key: ConnectionKey) -> Option<&mut TerminalConnection<S>> {
        self.connections.get_mut(&key)
    }

    pub fn connection_keys(&self) -> Vec<ConnectionKey> {
        self.connections.keys().copied().collect()
    }

    pub fn connection_states(&self) -> Vec<(ConnectionKey, ConnectionState)> {
        self.connections
            .iter()
            .map(|(key, conn)| (*key, conn.state()))
            .collect()
    }

    /// The focused pane's active tab: where keystrokes go.
    pub fn focused_key(&self) -> Option<ConnectionKey> {
        let pane = self.tree.focused_pane();
        let tab = self.tree.get_active_tab(pane)?;
        Some(ConnectionKey::new(pane, tab.id()))
    }

    pub fn attach_phase(&self, key: ConnectionKey) -> AttachPhase {
        self.attachments
            .get(&key)
            .map(AttachMachine::phase)
            .unwrap_or(AttachPhase::Idle)
    }

    pub fn split(&mut self, pane: PaneId, orientation: Orientation, now: Instant) -> Option<PaneId> {
        if self.shut_down {
            return None;
        }
        let fresh = self.tree.split(pane, orientation)?;
        self.sync_mounts(now);
        self.request_fit_all(ResizeTrigger::Layout, now);
        Some(fresh)
    }

    pub fn split_horizontal(&mut self, pane: PaneId, now: Instant) -> Option<PaneId> {
        self.split(pane, Orientation::Horizontal, now)
    }

    pub fn split_vertical(&mut self, pane: PaneId, now: Instant) -> Option<PaneId> {
        self.split(pane, Orientation::Vertical, now)
    }

    /// Detaches every bound tab in the pane, then removes it and tears its
    /// connections down. No-op on the last pane.
    pub fn close_pane(&mut self, pane: PaneId, now: Instant) -> bool {
        if self.shut_down || !self.tree.can_close(pane) {
            return false;
        }
        let tabs: Vec<TabId> = self
            .tree
            .get_pane_data(pane)
            .map(|leaf| leaf.tabs().iter().map(|tab| tab.id()).collect())
            .unwrap_or_default();
        for tab in &tabs {
            self.force_detach(ConnectionKey::new(pane, *tab));
        }
        if self.tree.close(pane).is_none() {
            return false;
        }
        for tab in tabs {
            self.evict(ConnectionKey::new(pane, tab));
        }
        self.request_fit_all(ResizeTrigger::Layout, now);
        self.focus_active_surface();
        true
    }

    pub fn focus_pane(&mut self, pane: PaneId) -> bool {
        if !self.tree.focus_pane(pane) {
            return false;
        }
        self.focus_active_surface();
        true
    }

    pub fn add_tab(&mut self, pane: PaneId, now: Instant) -> Option<TabId> {
        if self.shut_down {
            return None;
        }
        let outgoing = self.tree.get_active_tab(pane)?.id();
        self.save_scroll(ConnectionKey::new(pane, outgoing));
        let tab = self.tree.add_tab(pane)?;
        self.sync_mounts(now);
        Some(tab)
    }

    /// A bound tab is detached before its connection goes away. An unbound
    /// tab never sees a detach sequence.
    pub fn close_tab(&mut self, pane: PaneId, tab: TabId, now: Instant) -> bool {
        if self.shut_down || self.tree.tab(pane, tab).is_none() {
            return false;
        }
        let key = ConnectionKey::new(pane, tab);
        let was_active = self.tree.get_active_tab(pane).map(|active| active.id()) == Some(tab);
        self.force_detach(key);
        if self.tree.close_tab(pane, tab).is_none() {
            return false;
        }
        self.evict(key);
        self.sync_mounts(now);
        if was_active {
            self.activate(pane, now);
        }
        true
    }

    pub fn switch_tab(&mut self, pane: PaneId, tab: TabId, now: Instant) -> bool {
        let Some(outgoing) = self.tree.get_active_tab(pane).map(|active| active.id()) else {
            return false;
        };
        if outgoing == tab {
            return self.tree.tab(pane, tab).is_some();
        }
        if self.tree.tab(pane, tab).is_none() {
            return false;
        }
        self.save_scroll(ConnectionKey::new(pane, outgoing));
        self.tree.switch_tab(pane, tab);
        self.activate(pane, now);
        true
    }

    /// Starts (or retargets) the attach chain on one tab.
    pub fn attach(&mut self, pane: PaneId, tab: TabId, session: &SessionRecord, now: Instant) -> bool {
        if self.shut_down {
            return false;
        }
        let key = ConnectionKey::new(pane, tab);
        let Some(current) = self.current_binding(key) else {
            return false;
        };
        let target = AttachTarget::for_session(session, &self.config.multiplexer);
        info!(
            event = "attach_requested",
            key = %key,
            session = %session.id,
            multiplexer = %target.multiplexer_name
        );
        let effects = self
            .machine(key)
            .request_attach(current.as_deref(), target, now);
        self.apply_attach_effects(key, effects);
        true
    }

    pub fn attach_focused(&mut self, session: &SessionRecord, now: Instant) -> bool {
        match self.focused_key() {
            Some(key) => self.attach(key.pane, key.tab, session, now),
            None => false,
        }
    }

    pub fn detach(&mut self, pane: PaneId, tab: TabId, now: Instant) -> bool {
        if self.shut_down {
            return false;
        }
        let key = ConnectionKey::new(pane, tab);
        let Some(current) = self.current_binding(key) else {
            return false;
        };
        let effects = self.machine(key).request_detach(current.as_deref(), now);
        self.apply_attach_effects(key, effects);
        true
    }

    pub fn detach_focused(&mut self, now: Instant) -> bool {
        match self.focused_key() {
            Some(key) => self.detach(key.pane, key.tab, now),
            None => false,
        }
    }

    /// A fresh socket means a fresh shell: whatever the tab was attached to,
    /// or was attaching to, is replayed on it.
    pub fn on_socket_open(&mut self, key: ConnectionKey, generation: u64, now: Instant) {
        let Some(conn) = self.connections.get_mut(&key) else {
            return;
        };
        let actions = conn.on_open(generation);
        if actions.is_empty() {
            return;
        }
        info!(event = "terminal_connected", key = %key, generation);
        self.push_all(key, actions);
        if !self.attachments.contains_key(&key) {
            return;
        }
        self.timers
            .cancel_where(|timer| *timer == WorkspaceTimer::AttachStep(key));
        let effects = self.machine(key).on_transport_reset(now);
        self.apply_attach_effects(key, effects);
    }

    pub fn on_socket_message(&mut self, key: ConnectionKey, generation: u64, text: &str) {
        if let Some(conn) = self.connections.get_mut(&key) {
            conn.on_message(generation, text);
        }
    }

    pub fn on_socket_closed(&mut self, key: ConnectionKey, generation: u64, now: Instant) {
        if let Some(conn) = self.connections.get_mut(&key) {
            conn.on_close(generation, now);
        }
    }

    /// Keystrokes for the focused terminal. Dropped unless it is connected.
    pub fn send_input(&mut self, data: &str) -> bool {
        match self.focused_key() {
            Some(key) => self.send_input_to(key, data),
            None => false,
        }
    }

    pub fn send_input_to(&mut self, key: ConnectionKey, data: &str) -> bool {
        let Some(action) = self
            .connections
            .get_mut(&key)
            .and_then(|conn| conn.send_input(data))
        else {
            return false;
        };
        self.outbox.push(Outgoing { key, action });
        true
    }

    /// A window-level trigger: every terminal refits.
    pub fn resize_trigger(&mut self, trigger: ResizeTrigger, now: Instant) {
        self.request_fit_all(trigger, now);
    }

    pub fn container_resized(&mut self, key: ConnectionKey, now: Instant) {
        if let Some(conn) = self.connections.get_mut(&key) {
            conn.request_fit(ResizeTrigger::Container, now);
        }
    }

    pub fn page_hidden(&mut self, now: Instant) {
        if self.hidden_since.is_some() {
            return;
        }
        self.hidden_since = Some(now);
        for conn in self.connections.values_mut() {
            conn.hide(now);
        }
    }

    pub fn page_visible(&mut self, now: Instant) {
        let Some(since) = self.hidden_since.take() else {
            return;
        };
        debug!(
            event = "page_visible",
            hidden_ms = now.saturating_duration_since(since).as_millis() as u64
        );
        let shown: Vec<_> = self
            .connections
            .iter_mut()
            .map(|(key, conn)| (*key, conn.show(now)))
            .collect();
        for (key, actions) in shown {
            self.push_all(key, actions);
        }
    }

    /// Replays a suspension the driver detected without visibility events,
    /// e.g. a laptop that slept with the dashboard in the foreground.
    pub fn resumed_after(&mut self, hidden_for: Duration) {
        info!(event = "resume_detected", hidden_ms = hidden_for.as_millis() as u64);
        self.hidden_since = None;
        let resumed: Vec<_> = self
            .connections
            .iter_mut()
            .map(|(key, conn)| {
                let ready = conn.ready_state();
                (*key, conn.resume_after(hidden_for, ready))
            })
            .collect();
        for (key, actions) in resumed {
            self.push_all(key, actions);
        }
    }

    pub fn touch_start(&mut self, key: ConnectionKey, points: &[TouchPoint]) {
        if let Some(conn) = self.connections.get_mut(&key) {
            conn.touch_start(points);
        }
    }

    pub fn touch_moved(&mut self, key: ConnectionKey, points: &[TouchPoint]) -> TouchOutcome {
        let Some(conn) = self.connections.get_mut(&key) else {
            return TouchOutcome::None;
        };
        let (outcome, action) = conn.touch_moved(points);
        if let Some(action) = action {
            self.outbox.push(Outgoing { key, action });
        }
        outcome
    }

    pub fn touch_end(&mut self, key: ConnectionKey) {
        if let Some(conn) = self.connections.get_mut(&key) {
            conn.touch_end();
        }
    }

    /// Runs everything due at `now`: attach steps first, then each
    /// connection's retries and fit passes.
    pub fn poll(&mut self, now: Instant) {
        for timer in self.timers.pop_due(now) {
            match timer {
                WorkspaceTimer::AttachStep(key) => {
                    let Some(machine) = self.attachments.get_mut(&key) else {
                        continue;
                    };
                    let effects = machine.on_timer(now);
                    self.apply_attach_effects(key, effects);
                }
            }
        }
        let polled: Vec<_> = self
            .connections
            .iter_mut()
            .map(|(key, conn)| (*key, conn.poll(now)))
            .collect();
        for (key, actions) in polled {
            self.push_all(key, actions);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.connections
            .values()
            .filter_map(TerminalConnection::next_deadline)
            .chain(self.timers.next_deadline())
            .min()
    }

    pub fn drain_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    /// Tears every connection down, keeping each scroll snapshot in the
    /// registry for a successor workspace. Idempotent.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.timers.cancel_where(|_| true);
        self.attachments.clear();
        for key in self.connection_keys() {
            self.unmount(key);
        }
        info!(event = "workspace_shutdown");
    }

    fn machine(&mut self, key: ConnectionKey) -> &mut AttachMachine {
        let timing = self.config.tuning.attach;
        let mux = &self.config.multiplexer;
        self.attachments
            .entry(key)
            .or_insert_with(|| AttachMachine::new(timing, mux.clone()))
    }

    /// `None` when the tab does not exist; `Some(None)` when it is unbound.
    fn current_binding(&self, key: ConnectionKey) -> Option<Option<String>> {
        let tab = self.tree.tab(key.pane, key.tab)?;
        Some(tab.attached_multiplexer().map(str::to_string))
    }

    fn force_detach(&mut self, key: ConnectionKey) {
        let current = self.current_binding(key).flatten();
        if current.is_none() && !self.attachments.contains_key(&key) {
            return;
        }
        self.timers
            .cancel_where(|timer| *timer == WorkspaceTimer::AttachStep(key));
        let effects = self.machine(key).detach_now(current.as_deref());
        self.apply_attach_effects(key, effects);
    }

    fn apply_attach_effects(&mut self, key: ConnectionKey, effects: Vec<AttachEffect>) {
        for effect in effects {
            match effect {
                AttachEffect::SendInput(data) => {
                    if let Some(action) = self.connections.get_mut(&key).and_then(|c| c.send_input(&data)) {
                        self.outbox.push(Outgoing { key, action });
                    }
                }
                AttachEffect::SendCommand(line) => {
                    if let Some(action) = self.connections.get_mut(&key).and_then(|c| c.send_command(&line)) {
                        self.outbox.push(Outgoing { key, action });
                    }
                }
                AttachEffect::Schedule(at) => {
                    self.timers.schedule(at, WorkspaceTimer::AttachStep(key));
                }
                AttachEffect::Bind {
                    session_id,
                    multiplexer_name,
                } => {
                    info!(event = "tab_bound", key = %key, multiplexer = %multiplexer_name);
                    self.tree
                        .set_binding(key.pane, key.tab, Some(session_id), Some(multiplexer_name));
                }
                AttachEffect::Unbind => {
                    info!(event = "tab_unbound", key = %key);
                    self.tree.set_binding(key.pane, key.tab, None, None);
                }
                AttachEffect::Focus => {
                    if let Some(conn) = self.connections.get_mut(&key) {
                        conn.surface_mut().focus();
                    }
                }
            }
        }
    }

    /// Every tab in every leaf owns a live connection; inactive tabs keep
    /// theirs open in the background.
    fn sync_mounts(&mut self, now: Instant) {
        let keys: Vec<ConnectionKey> = self
            .tree
            .leaves()
            .iter()
            .flat_map(|leaf| {
                leaf.tabs()
                    .iter()
                    .map(|tab| ConnectionKey::new(leaf.id(), tab.id()))
            })
            .collect();
        for key in keys {
            if self.connections.contains_key(&key) {
                continue;
            }
            let surface = (self.factory)(key);
            let mut conn = TerminalConnection::new(key, surface, &self.config.tuning, now);
            if let Some(snapshot) = self.registry.take(key) {
                conn.restore_scroll(snapshot);
            }
            if let Some(since) = self.hidden_since {
                conn.hide(since);
            }
            debug!(event = "connection_mounted", key = %key);
            self.connections.insert(key, conn);
        }
    }

    fn push_all(&mut self, key: ConnectionKey, actions: Vec<TransportAction>) {
        self.outbox
            .extend(actions.into_iter().map(|action| Outgoing { key, action }));
    }

    /// Closes the connection and flushes its scroll position to the registry.
    fn unmount(&mut self, key: ConnectionKey) {
        self.timers
            .cancel_where(|timer| *timer == WorkspaceTimer::AttachStep(key));
        self.attachments.remove(&key);
        let Some(mut conn) = self.connections.remove(&key) else {
            return;
        };
        if let Some(teardown) = conn.teardown() {
            self.registry.store(key, teardown.snapshot);
            if let Some(action) = teardown.close {
                self.outbox.push(Outgoing { key, action });
            }
        }
    }

    /// Tab ids are never reused, so a closed tab's snapshot is dropped.
    fn evict(&mut self, key: ConnectionKey) {
        self.unmount(key);
        self.registry.take(key);
    }

    fn save_scroll(&mut self, key: ConnectionKey) {
        if let Some(conn) = self.connections.get(&key) {
            let snapshot = conn.scroll_snapshot();
            self.tree.save_tab_scroll(key.pane, key.tab, snapshot);
        }
    }

    /// Brings the pane's active tab forward: restores its saved scroll,
    /// refits it, and focuses it if the pane has focus.
    fn activate(&mut self, pane: PaneId, now: Instant) {
        let Some(tab) = self.tree.get_active_tab(pane) else {
            return;
        };
        let key = ConnectionKey::new(pane, tab.id());
        let saved = tab.saved_scroll();
        let focused = self.tree.focused_pane() == pane;
        if let Some(conn) = self.connections.get_mut(&key) {
            if let Some(snapshot) = saved {
                conn.restore_scroll(snapshot);
            }
            conn.request_fit(ResizeTrigger::Layout, now);
            if focused {
                conn.surface_mut().focus();
            }
        }
    }

    fn focus_active_surface(&mut self) {
        if let Some(key) = self.focused_key() {
            if let Some(conn) = self.connections.get_mut(&key) {
                conn.surface_mut().focus();
            }
        }
    }

    fn request_fit_all(&mut self, trigger: ResizeTrigger, now: Instant) {
        for conn in self.connections.values_mut() {
            conn.request_fit(trigger, now);
        }
    }
}
