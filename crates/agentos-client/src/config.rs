use agentos_core::{SessionRecord, WorkspaceConfig};
use clap::Parser;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

const DEFAULT_URL: &str = "ws://127.0.0.1:7681/terminal";

#[derive(Parser, Debug, Default)]
#[command(name = "agentos-term", about = "Terminal client for an AgentOS terminal endpoint")]
pub struct Args {
	/// WebSocket endpoint, e.g. ws://host:7681/terminal
	#[arg(long, default_value = "")]
	pub url: String,
	#[arg(long, default_value = "")]
	pub config: String,
	#[arg(long, default_value = "")]
	pub log_dir: String,
	#[arg(long, default_value = "")]
	pub log_level: String,
	/// Session record (JSON, as served by the session store) to attach once connected.
	#[arg(long, default_value = "")]
	pub session: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("invalid config {path}: {source}")]
	Parse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},
	#[error("invalid session record {path}: {source}")]
	Session {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},
	#[error("invalid endpoint url {value:?}: {source}")]
	Url {
		value: String,
		#[source]
		source: url::ParseError,
	},
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
	pub url: Url,
	pub log_dir: String,
	pub log_level: String,
	pub log_stdout: bool,
	pub workspace: WorkspaceConfig,
	pub session: Option<SessionRecord>,
}

/// Flags win over `AGENTOS_*` variables, which win over the config file.
pub fn load_config(args: Args) -> Result<RuntimeConfig, ConfigError> {
	let path = resolve_config_path(&args.config);
	let workspace = load_workspace_config(&path)?;
	let url = resolve_url(&args.url)?;
	let session = if args.session.trim().is_empty() {
		None
	} else {
		Some(load_session(Path::new(&args.session))?)
	};
	Ok(RuntimeConfig {
		url,
		log_dir: resolve_log_dir(&args.log_dir),
		log_level: resolve_with_env(&args.log_level, "AGENTOS_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
		log_stdout: resolve_log_stdout(),
		workspace,
		session,
	})
}

/// A missing file is all defaults; an unreadable or malformed one is an error.
pub fn load_workspace_config(path: &Path) -> Result<WorkspaceConfig, ConfigError> {
	if !path.exists() {
		return Ok(WorkspaceConfig::default());
	}
	let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
		path: path.to_path_buf(),
		source,
	})?;
	toml::from_str(&contents).map_err(|source| ConfigError::Parse {
		path: path.to_path_buf(),
		source,
	})
}

pub fn load_session(path: &Path) -> Result<SessionRecord, ConfigError> {
	let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
		path: path.to_path_buf(),
		source,
	})?;
	serde_json::from_str(&contents).map_err(|source| ConfigError::Session {
		path: path.to_path_buf(),
		source,
	})
}

pub fn parse_url(value: &str) -> Result<Url, ConfigError> {
	Url::parse(value).map_err(|source| ConfigError::Url {
		value: value.to_string(),
		source,
	})
}

fn resolve_url(flag: &str) -> Result<Url, ConfigError> {
	let value = resolve_with_env(flag, "AGENTOS_URL").unwrap_or_else(|| DEFAULT_URL.to_string());
	parse_url(&value)
}

fn resolve_config_path(flag: &str) -> PathBuf {
	if let Some(path) = resolve_with_env(flag, "AGENTOS_CONFIG") {
		return PathBuf::from(path);
	}
	config_dir().join("agentos/config.toml")
}

fn resolve_log_dir(flag: &str) -> String {
	if let Some(dir) = resolve_with_env(flag, "AGENTOS_LOG_DIR") {
		return dir;
	}
	state_dir().join("agentos/logs").to_string_lossy().to_string()
}

fn resolve_log_stdout() -> bool {
	if let Ok(value) = env::var("AGENTOS_LOG_STDOUT") {
		match value.trim() {
			"1" | "true" | "TRUE" | "yes" | "YES" => return true,
			"0" | "false" | "FALSE" | "no" | "NO" => return false,
			_ => {}
		}
	}
	false
}

fn resolve_with_env(flag: &str, var: &str) -> Option<String> {
	if !flag.trim().is_empty() {
		return Some(flag.to_string());
	}
	env::var(var).ok().filter(|value| !value.trim().is_empty())
}

fn config_dir() -> PathBuf {
	if let Ok(path) = env::var("XDG_CONFIG_HOME") {
		return PathBuf::from(path);
	}
	dirs::config_dir().unwrap_or_else(|| home_dir().join(".config"))
}

fn state_dir() -> PathBuf {
	if let Ok(path) = env::var("XDG_STATE_HOME") {
		return PathBuf::from(path);
	}
	dirs::state_dir().unwrap_or_else(|| home_dir().join(".local/state"))
}

fn home_dir() -> PathBuf {
	dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
	use super::*;
	use agentos_core::AgentKind;
	use std::time::Duration;

	#[test]
	fn missing_file_yields_defaults() {
		let dir = tempfile::tempdir().expect("tempdir");
		let config = load_workspace_config(&dir.path().join("absent.toml")).expect("defaults");
		assert_eq!(config, WorkspaceConfig::default());
	}

	#[test]
	fn tuning_and_multiplexer_tables_override_defaults() {
		let dir = tempfile::tempdir().expect("tempdir");
		let path = dir.path().join("config.toml");
		fs::write(
			&path,
			r#"
[tuning]
mount_delay_ms = 300
hung_socket_ms = 8000
max_panes = 2

[tuning.backoff]
base_ms = 500

[tuning.touch]
pixels_per_line = 18.0

[tuning.attach]
clear_settle_ms = 120

[multiplexer]
binary = "/opt/tmux/bin/tmux"
"#,
		)
		.expect("write config");

		let config = load_workspace_config(&path).expect("parse");
		assert_eq!(config.tuning.mount_delay, Duration::from_millis(300));
		assert_eq!(config.tuning.hung_socket_after, Duration::from_secs(8));
		assert_eq!(config.tuning.max_panes, 2);
		assert_eq!(config.tuning.backoff.base, Duration::from_millis(500));
		assert_eq!(config.tuning.backoff.cap, Duration::from_secs(30));
		assert_eq!(config.tuning.touch.pixels_per_line, 18.0);
		assert_eq!(config.tuning.attach.clear_settle, Duration::from_millis(120));
		assert_eq!(config.tuning.attach.detach_settle, Duration::from_millis(50));
		assert_eq!(config.multiplexer.binary, "/opt/tmux/bin/tmux");
		assert_eq!(config.multiplexer.clear_sequence, "\x03\x15");
	}

	#[test]
	fn malformed_file_is_a_parse_error() {
		let dir = tempfile::tempdir().expect("tempdir");
		let path = dir.path().join("config.toml");
		fs::write(&path, "[tuning]\nmount_delay_ms = \"soon\"\n").expect("write config");
		assert!(matches!(load_workspace_config(&path), Err(ConfigError::Parse { .. })));
	}

	#[test]
	fn session_file_parses_store_record() {
		let dir = tempfile::tempdir().expect("tempdir");
		let path = dir.path().join("session.json");
		fs::write(
			&path,
			r#"{"id":"s-1","agentType":"gemini","workingDirectory":"/repo","autoApprove":false}"#,
		)
		.expect("write session");
		let session = load_session(&path).expect("session");
		assert_eq!(session.agent_type, AgentKind::Gemini);

		fs::write(&path, "{}").expect("write session");
		assert!(matches!(load_session(&path), Err(ConfigError::Session { .. })));
	}

	#[test]
	fn flag_url_wins_and_bad_urls_are_rejected() {
		assert_eq!(
			resolve_url("ws://10.0.0.2:9000/terminal").expect("url").as_str(),
			"ws://10.0.0.2:9000/terminal"
		);
		assert!(matches!(parse_url("not a url"), Err(ConfigError::Url { .. })));
	}
}
