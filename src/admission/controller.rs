use std::{collections::HashMap, sync::Arc};

use tokio::{sync::Mutex, task::JoinHandle, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::admission::{
    clock::{Clock, SystemClock},
    types::{
        AdmissionConfig, AdmissionError, AdmissionStatus, CapacityState, Session, SessionKind,
        SessionToken,
    },
};

/// Bounded set of active public sessions. Every check-then-act sequence runs
/// under one lock, so concurrent joins never overshoot the capacity.
pub struct SessionAdmissionController {
    config: AdmissionConfig,
    clock: Arc<dyn Clock>,
    sessions: Mutex<HashMap<SessionToken, Session>>,
}

impl SessionAdmissionController {
    pub fn new(config: AdmissionConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: AdmissionConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    pub async fn join(&self) -> Result<SessionToken, AdmissionError> {
        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let evicted = self.evict_expired(&mut sessions);

        let active = count_public(&sessions);
        if active >= self.config.max_public_users {
            tracing::warn!(
                target: "admission",
                active = active,
                max_users = self.config.max_public_users,
                evicted = evicted,
                "join_rejected_capacity"
            );
            return Err(AdmissionError::CapacityExceeded {
                max_users: self.config.max_public_users,
            });
        }

        let token = Uuid::new_v4().to_string();
        sessions.insert(
            token.clone(),
            Session {
                token: token.clone(),
                kind: SessionKind::Public,
                created_at: now,
                last_active_at: now,
            },
        );
        tracing::info!(
            target: "admission",
            active = active + 1,
            max_users = self.config.max_public_users,
            "session_joined"
        );

        Ok(token)
    }

    /// Refreshes a live session. Expired sessions are removed on the spot.
    pub async fn verify(&self, token: &str) -> bool {
        if token.is_empty() {
            return false;
        }

        let now = self.clock.now();
        let mut sessions = self.sessions.lock().await;
        let Some(session) = sessions.get_mut(token) else {
            return false;
        };

        if session.is_expired(now, self.config.session_ttl()) {
            sessions.remove(token);
            tracing::info!(target: "admission", "session_expired_on_verify");
            return false;
        }

        session.last_active_at = now;
        true
    }

    pub async fn require(&self, token: Option<&str>) -> Result<(), AdmissionError> {
        match token {
            Some(token) if self.verify(token).await => Ok(()),
            _ => Err(AdmissionError::SessionInvalid),
        }
    }

    /// Removes every expired session and returns how many were removed.
    pub async fn cleanup(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        self.evict_expired(&mut sessions)
    }

    pub async fn public_count(&self) -> usize {
        let mut sessions = self.sessions.lock().await;
        self.evict_expired(&mut sessions);
        count_public(&sessions)
    }

    pub async fn snapshot(&self) -> AdmissionStatus {
        let active_users = self.public_count().await;
        let max_users = self.config.max_public_users;
        AdmissionStatus {
            max_users,
            active_users,
            status: if active_users >= max_users {
                CapacityState::Full
            } else {
                CapacityState::Ready
            },
        }
    }

    /// Drops every session. Intended for test harnesses.
    pub async fn reset(&self) {
        self.sessions.lock().await.clear();
    }

    /// Periodically runs [`Self::cleanup`] until `cancel` fires.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let period = self.config.sweep_interval();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!(target: "admission", "sweeper_stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        let removed = controller.cleanup().await;
                        if removed > 0 {
                            tracing::debug!(
                                target: "admission",
                                removed = removed,
                                "sweeper_evicted"
                            );
                        }
                    }
                }
            }
        })
    }

    fn evict_expired(&self, sessions: &mut HashMap<SessionToken, Session>) -> usize {
        let now = self.clock.now();
        let ttl = self.config.session_ttl();
        let before = sessions.len();
        sessions.retain(|_, session| !session.is_expired(now, ttl));
        before - sessions.len()
    }
}

fn count_public(sessions: &HashMap<SessionToken, Session>) -> usize {
    sessions
        .values()
        .filter(|session| session.kind == SessionKind::Public)
        .count()
}
