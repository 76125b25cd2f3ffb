use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type SessionToken = String;

fn default_max_public_users() -> usize {
    5
}

fn default_session_timeout_seconds() -> u64 {
    600
}

fn default_sweep_interval_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    #[serde(default = "default_max_public_users")]
    pub max_public_users: usize,
    #[serde(default = "default_session_timeout_seconds")]
    pub session_timeout_seconds: u64,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_public_users: default_max_public_users(),
            session_timeout_seconds: default_session_timeout_seconds(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
        }
    }
}

impl AdmissionConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_timeout_seconds)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_seconds.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionKind {
    Public,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: SessionToken,
    pub kind: SessionKind,
    pub created_at: Instant,
    pub last_active_at: Instant,
}

impl Session {
    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_active_at) > ttl
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapacityState {
    Ready,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionStatus {
    pub max_users: usize,
    pub active_users: usize,
    pub status: CapacityState,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("server is at capacity ({max_users} active sessions)")]
    CapacityExceeded { max_users: usize },
    #[error("session token is missing, unknown or expired")]
    SessionInvalid,
}
