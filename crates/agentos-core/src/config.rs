use crate::attach::{AttachTiming, MultiplexerConfig};
use crate::backoff::{millis, BackoffPolicy};
use crate::fit::FitConfig;
use crate::pane_tree::DEFAULT_MAX_PANES;
use crate::touch::TouchConfig;
use serde::Deserialize;
use std::time::Duration;

/// Every timing and threshold the workspace uses. All fields default, so a
/// partial `[tuning]` table only overrides what it names.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Tuning {
    #[serde(rename = "mount_delay_ms", with = "millis")]
    pub mount_delay: Duration,
    pub backoff: BackoffPolicy,
    #[serde(rename = "hung_socket_ms", with = "millis")]
    pub hung_socket_after: Duration,
    pub fit: FitConfig,
    pub touch: TouchConfig,
    pub attach: AttachTiming,
    pub max_panes: usize,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            mount_delay: Duration::from_millis(150),
            backoff: BackoffPolicy::default(),
            hung_socket_after: Duration::from_secs(5),
            fit: FitConfig::default(),
            touch: TouchConfig::default(),
            attach: AttachTiming::default(),
            max_panes: DEFAULT_MAX_PANES,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub tuning: Tuning,
    pub multiplexer: MultiplexerConfig,
}
