//! Sync health tracking.
//!
//! [`SyncMonitor`] owns the process-wide [`SyncStatus`] and answers the one
//! question the record store asks before every remote operation: can we sync
//! right now? Network reachability is probed on a background task; account
//! availability is queried through the gateway's [`gateway::AccountProbe`].

pub mod gateway;

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use self::gateway::AccountProbe;

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote account availability as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccountState {
    #[default]
    Unknown,
    Available,
    NoAccount,
    Restricted,
    CouldNotDetermine,
}

impl AccountState {
    pub fn is_available(self) -> bool {
        matches!(self, AccountState::Available)
    }
}

impl fmt::Display for AccountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            AccountState::Unknown => "unknown",
            AccountState::Available => "signed in",
            AccountState::NoAccount => "not signed in",
            AccountState::Restricted => "restricted",
            AccountState::CouldNotDetermine => "undetermined",
        };
        f.write_str(text)
    }
}

/// Steady-state outcome of the most recent sync attempt. A failure carries
/// its display message; this is UI status, not a control-flow error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Syncing,
    Success,
    Failure(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub is_enabled: bool,
    pub network_reachable: bool,
    pub account_state: AccountState,
    pub sync_state: SyncState,
    pub last_sync_date: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            is_enabled: false,
            network_reachable: true,
            account_state: AccountState::Unknown,
            sync_state: SyncState::Idle,
            last_sync_date: None,
            last_error: None,
        }
    }
}

impl SyncStatus {
    /// The sync precondition: user opt-in, network reachability, and account
    /// availability, all at once.
    pub fn can_sync(&self) -> bool {
        self.is_enabled && self.network_reachable && self.account_state.is_available()
    }

    /// Display-only warning list; duplicates collapsed by value, order not
    /// significant.
    pub fn warning_messages(&self) -> Vec<String> {
        let mut messages: Vec<String> = Vec::new();
        let mut push = |m: String| {
            if !messages.contains(&m) {
                messages.push(m);
            }
        };

        if !self.network_reachable {
            push("Network connection unavailable".to_string());
        }
        if self.is_enabled && !self.account_state.is_available() {
            push("Cloud account unavailable".to_string());
        }
        if let SyncState::Failure(message) = &self.sync_state {
            push(message.clone());
        }
        if let Some(last_error) = &self.last_error {
            push(last_error.clone());
        }
        messages
    }
}

/// Tracks sync health independently of the record store's lifecycle. The
/// store only ever reads the status; all writes go through this type.
pub struct SyncMonitor {
    status: Mutex<SyncStatus>,
    updates: broadcast::Sender<SyncStatus>,
    accounts: Arc<dyn AccountProbe>,
}

impl SyncMonitor {
    pub fn new(accounts: Arc<dyn AccountProbe>) -> Arc<Self> {
        let (updates, _) = broadcast::channel(32);
        Arc::new(Self {
            status: Mutex::new(SyncStatus::default()),
            updates,
            accounts,
        })
    }

    pub fn status(&self) -> SyncStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncStatus> {
        self.updates.subscribe()
    }

    pub fn can_sync(&self) -> bool {
        self.status().can_sync()
    }

    fn update(&self, apply: impl FnOnce(&mut SyncStatus)) {
        let snapshot = {
            let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            apply(&mut status);
            status.clone()
        };
        self.updates.send(snapshot).ok();
    }

    /// Applies the user's sync preference. Disabling drops back to idle and
    /// clears the last error; enabling kicks off an account refresh.
    pub async fn configure(&self, enabled: bool) {
        self.update(|status| {
            status.is_enabled = enabled;
            if !enabled {
                status.sync_state = SyncState::Idle;
                status.last_error = None;
            }
        });
        if enabled {
            self.refresh_account_state().await;
        }
    }

    /// Queries the remote account state. A probe error maps to
    /// `CouldNotDetermine` with the message recorded for display.
    pub async fn refresh_account_state(&self) {
        match self.accounts.account_state().await {
            Ok(state) => self.update(|status| status.account_state = state),
            Err(e) => self.update(|status| {
                status.account_state = AccountState::CouldNotDetermine;
                status.last_error = Some(format!("Failed to determine account status: {e}"));
            }),
        }
    }

    pub fn begin_sync(&self) {
        self.update(|status| {
            status.sync_state = SyncState::Syncing;
            status.last_error = None;
        });
    }

    pub fn report_sync_success(&self) {
        self.update(|status| {
            status.sync_state = SyncState::Success;
            status.last_sync_date = Some(Utc::now());
            status.last_error = None;
        });
    }

    pub fn report_sync_failure(&self, message: String) {
        log::warn!("Cloud sync failed: {message}");
        self.update(|status| {
            status.sync_state = SyncState::Failure(message.clone());
            status.last_error = Some(message);
        });
    }

    /// Fetch errors do not interrupt a sync in flight; they only land in
    /// `last_error`.
    pub fn report_fetch_failure(&self, message: String) {
        log::warn!("{message}");
        self.update(|status| status.last_error = Some(message));
    }

    /// An explicitly requested sync that cannot run because the precondition
    /// does not hold.
    pub fn report_blocked(&self, message: &str) {
        self.update(|status| status.sync_state = SyncState::Failure(message.to_string()));
    }

    pub fn set_network_reachable(&self, reachable: bool) {
        let changed = {
            let status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
            status.network_reachable != reachable
        };
        if changed {
            log::info!("Network reachability changed: {reachable}");
            self.update(|status| status.network_reachable = reachable);
        }
    }

    /// Spawns the background reachability watcher. The probe is a plain TCP
    /// connect; callers are never blocked on it.
    pub fn start_network_watcher(self: &Arc<Self>, probe_addr: String, interval: Duration) {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let reachable = matches!(
                    tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect(&probe_addr)).await,
                    Ok(Ok(_))
                );
                monitor.set_network_reachable(reachable);
                tokio::time::sleep(interval).await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::gateway::GatewayError;
    use super::*;
    use async_trait::async_trait;

    struct StaticProbe(Result<AccountState, &'static str>);

    #[async_trait]
    impl AccountProbe for StaticProbe {
        async fn account_state(&self) -> Result<AccountState, GatewayError> {
            self.0.map_err(|m| GatewayError::Request(m.to_string()))
        }
    }

    fn ready_status() -> SyncStatus {
        SyncStatus {
            is_enabled: true,
            network_reachable: true,
            account_state: AccountState::Available,
            ..SyncStatus::default()
        }
    }

    #[test]
    fn can_sync_is_the_exact_conjunction() {
        assert!(ready_status().can_sync());

        let mut status = ready_status();
        status.is_enabled = false;
        assert!(!status.can_sync());

        let mut status = ready_status();
        status.network_reachable = false;
        assert!(!status.can_sync());

        for state in [
            AccountState::Unknown,
            AccountState::NoAccount,
            AccountState::Restricted,
            AccountState::CouldNotDetermine,
        ] {
            let mut status = ready_status();
            status.account_state = state;
            assert!(!status.can_sync());
        }
    }

    #[test]
    fn warning_messages_collapse_duplicates() {
        let mut status = ready_status();
        status.account_state = AccountState::NoAccount;
        status.sync_state = SyncState::Failure("Cloud sync failed".to_string());
        status.last_error = Some("Cloud sync failed".to_string());

        let warnings = status.warning_messages();
        assert_eq!(warnings.len(), 2);
        assert!(warnings.contains(&"Cloud account unavailable".to_string()));
        assert!(warnings.contains(&"Cloud sync failed".to_string()));
    }

    #[test]
    fn account_warning_only_shown_while_enabled() {
        let mut status = SyncStatus::default();
        status.account_state = AccountState::NoAccount;
        assert!(status.warning_messages().is_empty());

        status.is_enabled = true;
        assert_eq!(status.warning_messages().len(), 1);
    }

    #[tokio::test]
    async fn enabling_refreshes_account_state() {
        let monitor = SyncMonitor::new(Arc::new(StaticProbe(Ok(AccountState::Available))));
        monitor.configure(true).await;
        monitor.set_network_reachable(true);
        assert!(monitor.can_sync());
    }

    #[tokio::test]
    async fn probe_error_maps_to_could_not_determine() {
        let monitor = SyncMonitor::new(Arc::new(StaticProbe(Err("boom"))));
        monitor.configure(true).await;

        let status = monitor.status();
        assert_eq!(status.account_state, AccountState::CouldNotDetermine);
        assert!(status.last_error.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn disabling_resets_state_and_error() {
        let monitor = SyncMonitor::new(Arc::new(StaticProbe(Ok(AccountState::Available))));
        monitor.configure(true).await;
        monitor.report_sync_failure("Cloud sync failed: timeout".to_string());
        assert!(matches!(monitor.status().sync_state, SyncState::Failure(_)));

        monitor.configure(false).await;
        let status = monitor.status();
        assert_eq!(status.sync_state, SyncState::Idle);
        assert!(status.last_error.is_none());
        assert!(!status.can_sync());
    }

    #[tokio::test]
    async fn success_records_sync_date() {
        let monitor = SyncMonitor::new(Arc::new(StaticProbe(Ok(AccountState::Available))));
        monitor.begin_sync();
        assert_eq!(monitor.status().sync_state, SyncState::Syncing);

        monitor.report_sync_success();
        let status = monitor.status();
        assert_eq!(status.sync_state, SyncState::Success);
        assert!(status.last_sync_date.is_some());
    }

    #[tokio::test]
    async fn status_updates_reach_subscribers() {
        let monitor = SyncMonitor::new(Arc::new(StaticProbe(Ok(AccountState::Available))));
        let mut rx = monitor.subscribe();
        monitor.set_network_reachable(false);
        let snapshot = rx.recv().await.unwrap();
        assert!(!snapshot.network_reachable);
    }
}
