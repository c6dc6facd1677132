use crate::backoff::millis;
use serde::Deserialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Codex,
    Gemini,
    Shell,
}

impl AgentKind {
    pub fn provider_id(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Codex => "codex",
            AgentKind::Gemini => "gemini",
            AgentKind::Shell => "shell",
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.provider_id())
    }
}

/// Session metadata as served by the session store. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub agent_type: AgentKind,
    pub working_directory: String,
    #[serde(default)]
    pub resume_id: Option<String>,
    #[serde(default)]
    pub parent_session_id: Option<String>,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub model: Option<String>,
}

/// Remote multiplexer binding. The detach and clear sequences assume the
/// multiplexer's stock key bindings; a remapped prefix on the host makes
/// them meaningless and nothing here can tell.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MultiplexerConfig {
    pub binary: String,
    pub detach_sequence: String,
    pub clear_sequence: String,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            binary: "tmux".to_string(),
            // prefix (C-b) then d
            detach_sequence: "\x02d".to_string(),
            // C-c then C-u: abandon anything half-typed
            clear_sequence: "\x03\x15".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AttachTiming {
    #[serde(rename = "detach_settle_ms", with = "millis")]
    pub detach_settle: Duration,
    #[serde(rename = "clear_settle_ms", with = "millis")]
    pub clear_settle: Duration,
    #[serde(rename = "attach_settle_ms", with = "millis")]
    pub attach_settle: Duration,
}

impl Default for AttachTiming {
    fn default() -> Self {
        Self {
            detach_settle: Duration::from_millis(50),
            clear_settle: Duration::from_millis(75),
            attach_settle: Duration::from_millis(25),
        }
    }
}

/// `{provider}-{sessionId}`, restricted to characters every multiplexer
/// accepts in a session name.
pub fn multiplexer_name(session: &SessionRecord) -> String {
    let raw = format!("{}-{}", session.agent_type.provider_id(), session.id);
    raw.chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

/// The agent CLI invocation for a session, already shell-quoted.
pub fn launch_command(session: &SessionRecord) -> String {
    let mut argv: Vec<String> = Vec::new();
    let model = session.model.as_deref().filter(|model| !model.trim().is_empty());
    let resume = session.resume_id.as_deref().filter(|id| !id.trim().is_empty());
    let parent = session
        .parent_session_id
        .as_deref()
        .filter(|id| !id.trim().is_empty());
    match session.agent_type {
        AgentKind::Claude => {
            argv.push("claude".to_string());
            if let Some(id) = resume {
                argv.extend(["--resume".to_string(), id.to_string()]);
            } else if let Some(parent) = parent {
                argv.extend([
                    "--resume".to_string(),
                    parent.to_string(),
                    "--fork-session".to_string(),
                ]);
            }
            if session.auto_approve {
                argv.push("--dangerously-skip-permissions".to_string());
            }
            if let Some(model) = model {
                argv.extend(["--model".to_string(), model.to_string()]);
            }
        }
        AgentKind::Codex => {
            argv.push("codex".to_string());
            if let Some(id) = resume.or(parent) {
                argv.extend(["resume".to_string(), id.to_string()]);
            }
            if session.auto_approve {
                argv.push("--dangerously-bypass-approvals-and-sandbox".to_string());
            }
            if let Some(model) = model {
                argv.extend(["--model".to_string(), model.to_string()]);
            }
        }
        AgentKind::Gemini => {
            argv.push("gemini".to_string());
            if let Some(id) = resume.or(parent) {
                argv.extend(["--resume".to_string(), id.to_string()]);
            }
            if session.auto_approve {
                argv.push("--yolo".to_string());
            }
            if let Some(model) = model {
                argv.extend(["--model".to_string(), model.to_string()]);
            }
        }
        AgentKind::Shell => {
            argv.push("exec".to_string());
            argv.push("\"${SHELL:-/bin/sh}\"".to_string());
            return argv.join(" ");
        }
    }
    shell_words::join(argv)
}

/// Shell line that joins the session's multiplexer session if it exists,
/// else creates it in the session's working directory running the agent.
pub fn attach_command(session: &SessionRecord, mux: &MultiplexerConfig) -> String {
    let name = multiplexer_name(session);
    let target = shell_words::quote(&format!("={name}")).into_owned();
    let bin = shell_words::quote(&mux.binary).into_owned();
    format!(
        "{bin} has-session -t {target} 2>/dev/null && {bin} attach-session -t {target} || {bin} new-session -s {name} -c {cwd} {launch}",
        name = shell_words::quote(&name),
        cwd = shell_words::quote(&session.working_directory),
        launch = shell_words::quote(&launch_command(session)),
    )
}

/// A resolved attach target: everything the chain needs without going back
/// to the session store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachTarget {
    pub session_id: String,
    pub multiplexer_name: String,
    pub command: String,
}

impl AttachTarget {
    pub fn for_session(session: &SessionRecord, mux: &MultiplexerConfig) -> Self {
        Self {
            session_id: session.id.clone(),
            multiplexer_name: multiplexer_name(session),
            command: attach_command(session, mux),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttachPhase {
    Idle,
    Detaching,
    Clearing,
    Attaching,
    Attached,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ChainGoal {
    Attach(AttachTarget),
    DetachOnly,
}

/// What the owner of the tab must do on the machine's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachEffect {
    SendInput(String),
    SendCommand(String),
    /// Wake the machine with `on_timer` at this instant.
    Schedule(Instant),
    Bind {
        session_id: String,
        multiplexer_name: String,
    },
    Unbind,
    Focus,
}

/// Per-tab attach sequencer: detach, clear, attach, settle. One chain runs
/// at a time per tab. A request arriving before the attach command went out
/// retargets the running chain; one arriving after waits for the chain to
/// settle and then starts from the freshly attached session.
#[derive(Debug)]
pub struct AttachMachine {
    timing: AttachTiming,
    mux: MultiplexerConfig,
    phase: AttachPhase,
    goal: Option<ChainGoal>,
    queued: Option<ChainGoal>,
    bound: Option<AttachTarget>,
}

impl AttachMachine {
    pub fn new(timing: AttachTiming, mux: MultiplexerConfig) -> Self {
        Self {
            timing,
            mux,
            phase: AttachPhase::Idle,
            goal: None,
            queued: None,
            bound: None,
        }
    }

    pub fn phase(&self) -> AttachPhase {
        self.phase
    }

    pub fn in_flight(&self) -> bool {
        matches!(
            self.phase,
            AttachPhase::Detaching | AttachPhase::Clearing | AttachPhase::Attaching
        )
    }

    /// `current` is the multiplexer session the tab is bound to right now.
    pub fn request_attach(
        &mut self,
        current: Option<&str>,
        target: AttachTarget,
        now: Instant,
    ) -> Vec<AttachEffect> {
        self.submit(current, ChainGoal::Attach(target), now)
    }

    pub fn request_detach(&mut self, current: Option<&str>, now: Instant) -> Vec<AttachEffect> {
        if !self.in_flight() && current.is_none() {
            return Vec::new();
        }
        self.submit(current, ChainGoal::DetachOnly, now)
    }

    /// Abandons any chain and detaches immediately. Used when the tab is
    /// about to disappear and nothing can be scheduled for it any more.
    /// The detach sequence only goes out when a multiplexer may be attached:
    /// a bound tab at rest, or a chain whose attach command already went out.
    pub fn detach_now(&mut self, current: Option<&str>) -> Vec<AttachEffect> {
        let phase = self.phase;
        self.phase = AttachPhase::Idle;
        self.goal = None;
        self.queued = None;
        self.bound = None;
        let attached = match phase {
            AttachPhase::Idle | AttachPhase::Attached => current.is_some(),
            AttachPhase::Attaching => true,
            AttachPhase::Detaching | AttachPhase::Clearing => false,
        };
        if attached {
            return vec![
                AttachEffect::SendInput(self.mux.detach_sequence.clone()),
                AttachEffect::Unbind,
            ];
        }
        if phase == AttachPhase::Idle && current.is_none() {
            return Vec::new();
        }
        vec![AttachEffect::Unbind]
    }

    pub fn on_timer(&mut self, now: Instant) -> Vec<AttachEffect> {
        match self.phase {
            AttachPhase::Detaching => {
                self.phase = AttachPhase::Clearing;
                vec![
                    AttachEffect::SendInput(self.mux.clear_sequence.clone()),
                    AttachEffect::Schedule(now + self.timing.clear_settle),
                ]
            }
            AttachPhase::Clearing => match self.goal.clone() {
                Some(ChainGoal::Attach(target)) => {
                    self.phase = AttachPhase::Attaching;
                    vec![
                        AttachEffect::SendCommand(format!("{}\r", target.command)),
                        AttachEffect::Schedule(now + self.timing.attach_settle),
                    ]
                }
                Some(ChainGoal::DetachOnly) | None => {
                    self.goal = None;
                    self.bound = None;
                    self.phase = AttachPhase::Idle;
                    let mut effects = vec![AttachEffect::Unbind];
                    effects.extend(self.start_queued(None, now));
                    effects
                }
            },
            AttachPhase::Attaching => {
                let Some(ChainGoal::Attach(target)) = self.goal.take() else {
                    self.phase = AttachPhase::Idle;
                    return Vec::new();
                };
                self.phase = AttachPhase::Attached;
                self.bound = Some(target.clone());
                debug!(event = "attach_settled", multiplexer = %target.multiplexer_name);
                let mut effects = vec![
                    AttachEffect::Bind {
                        session_id: target.session_id,
                        multiplexer_name: target.multiplexer_name.clone(),
                    },
                    AttachEffect::Focus,
                ];
                effects.extend(self.start_queued(Some(&target.multiplexer_name), now));
                effects
            }
            AttachPhase::Idle | AttachPhase::Attached => Vec::new(),
        }
    }

    /// The socket was replaced and the shell behind it is new, so nothing is
    /// attached there. A settled binding or a running chain is replayed from
    /// the clear step; there is no detach to send.
    pub fn on_transport_reset(&mut self, now: Instant) -> Vec<AttachEffect> {
        let goal = if self.in_flight() {
            self.goal.take()
        } else {
            self.bound.clone().map(ChainGoal::Attach)
        };
        match goal {
            Some(ChainGoal::Attach(target)) => {
                debug!(event = "attach_replay", multiplexer = %target.multiplexer_name);
                self.begin(None, ChainGoal::Attach(target), now)
            }
            Some(ChainGoal::DetachOnly) => {
                self.phase = AttachPhase::Idle;
                self.bound = None;
                let mut effects = vec![AttachEffect::Unbind];
                effects.extend(self.start_queued(None, now));
                effects
            }
            None => {
                self.phase = AttachPhase::Idle;
                Vec::new()
            }
        }
    }

    fn submit(&mut self, current: Option<&str>, goal: ChainGoal, now: Instant) -> Vec<AttachEffect> {
        match self.phase {
            AttachPhase::Detaching | AttachPhase::Clearing => {
                debug!(event = "attach_retarget", phase = ?self.phase);
                self.goal = Some(goal);
                Vec::new()
            }
            AttachPhase::Attaching => {
                debug!(event = "attach_queued");
                self.queued = Some(goal);
                Vec::new()
            }
            AttachPhase::Idle | AttachPhase::Attached => self.begin(current, goal, now),
        }
    }

    fn start_queued(&mut self, current: Option<&str>, now: Instant) -> Vec<AttachEffect> {
        match self.queued.take() {
            Some(ChainGoal::DetachOnly) if current.is_none() => Vec::new(),
            Some(goal) => self.begin(current, goal, now),
            None => Vec::new(),
        }
    }

    fn begin(&mut self, current: Option<&str>, goal: ChainGoal, now: Instant) -> Vec<AttachEffect> {
        self.goal = Some(goal);
        if current.is_some() {
            self.phase = AttachPhase::Detaching;
            vec![
                AttachEffect::SendInput(self.mux.detach_sequence.clone()),
                AttachEffect::Schedule(now + self.timing.detach_settle),
            ]
        } else {
            self.phase = AttachPhase::Clearing;
            vec![
                AttachEffect::SendInput(self.mux.clear_sequence.clone()),
                AttachEffect::Schedule(now + self.timing.clear_settle),
            ]
        }
    }
}
