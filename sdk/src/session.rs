use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bitcoin::bip32::Xpriv;
use zeroize::Zeroizing;

use crate::encryption::WalletSecret;
use crate::errors::{WalletError, WalletResult};

/// Default duration before an unlocked wallet automatically locks.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Parameters of the sessions handed to new wallet handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub timeout: Duration,
    pub max_failed_attempts: u32,
}

impl SessionSettings {
    pub fn new_session(&self) -> WalletSession {
        WalletSession::new(self.timeout, self.max_failed_attempts)
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SESSION_TIMEOUT,
            max_failed_attempts: 5,
        }
    }
}

/// Decrypted material of an unlocked wallet. Never persisted.
pub struct UnlockedSecrets {
    pub primary_seed: Zeroizing<Vec<u8>>,
    /// Absent for v1 wallets and for wallets whose secret was never decrypted.
    pub secret: Option<WalletSecret>,
    pub primary_private_key: Xpriv,
}

struct UnlockedSession {
    secrets: UnlockedSecrets,
    expires_at: Instant,
}

impl UnlockedSession {
    fn new(secrets: UnlockedSecrets, timeout: Duration) -> Self {
        Self {
            secrets,
            expires_at: Instant::now() + timeout,
        }
    }

    fn touch(&mut self, timeout: Duration) {
        self.expires_at = Instant::now() + timeout;
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

#[derive(Default)]
struct SessionState {
    unlocked: Option<UnlockedSession>,
    failed_attempts: u32,
    next_allowed_attempt: Option<Instant>,
    backoff_exponent: u32,
}

/// Holds the unlocked secrets of one wallet handle, locking automatically
/// after a period of inactivity.
#[derive(Clone)]
pub struct WalletSession {
    state: Arc<RwLock<SessionState>>,
    timeout: Duration,
    max_failed_attempts: u32,
    backoff_base: Duration,
    backoff_cap: Duration,
    max_backoff_exponent: u32,
}

impl WalletSession {
    pub fn new(timeout: Duration, max_failed_attempts: u32) -> Self {
        Self::with_backoff(
            timeout,
            max_failed_attempts,
            Duration::from_secs(1),
            Duration::from_secs(32),
        )
    }

    pub fn with_backoff(
        timeout: Duration,
        max_failed_attempts: u32,
        backoff_base: Duration,
        backoff_cap: Duration,
    ) -> Self {
        Self {
            state: Arc::new(RwLock::new(SessionState::default())),
            timeout,
            max_failed_attempts: max_failed_attempts.max(1),
            backoff_base,
            backoff_cap,
            max_backoff_exponent: 8,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_SESSION_TIMEOUT, 5)
    }

    pub fn is_locked(&self) -> bool {
        let mut state = self.state.write();
        if state.unlocked.as_ref().is_some_and(|s| s.is_expired()) {
            state.unlocked = None;
        }
        state.unlocked.is_none()
    }

    /// Fails while a backoff from earlier failures is still running.
    pub fn ensure_attempt_allowed(&self) -> WalletResult<()> {
        let state = self.state.read();
        if let Some(until) = state.next_allowed_attempt {
            let now = Instant::now();
            if now < until {
                let remaining = until.saturating_duration_since(now);
                return Err(WalletError::PermissionDenied(format!(
                    "Unlock temporarily disabled. Retry in {}.{:03} seconds",
                    remaining.as_secs(),
                    remaining.subsec_millis()
                )));
            }
        }
        if state.failed_attempts >= self.max_failed_attempts {
            return Err(WalletError::PermissionDenied(
                "Maximum unlock attempts exceeded".to_string(),
            ));
        }
        Ok(())
    }

    pub fn unlock(&self, secrets: UnlockedSecrets) {
        let mut state = self.state.write();
        state.failed_attempts = 0;
        state.unlocked = Some(UnlockedSession::new(secrets, self.timeout));
        state.next_allowed_attempt = None;
        state.backoff_exponent = 0;
    }

    /// Record a failed unlock attempt and return remaining attempts.
    pub fn register_failed_attempt(&self) -> WalletResult<u32> {
        self.ensure_attempt_allowed()?;

        let mut state = self.state.write();
        state.failed_attempts += 1;
        if state.failed_attempts >= self.max_failed_attempts {
            state.unlocked = None;
            state.next_allowed_attempt = None;
            state.backoff_exponent = 0;
            return Err(WalletError::PermissionDenied(
                "Maximum unlock attempts exceeded".to_string(),
            ));
        }
        state.backoff_exponent = (state.backoff_exponent + 1).min(self.max_backoff_exponent);
        let multiplier = 1_u32 << state.backoff_exponent.saturating_sub(1);
        let delay = self
            .backoff_base
            .checked_mul(multiplier)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap);
        state.next_allowed_attempt = Some(Instant::now() + delay);

        Ok(self.max_failed_attempts - state.failed_attempts)
    }

    /// Drop the unlocked secrets. Buffers are zeroized on drop.
    pub fn lock(&self) {
        let mut state = self.state.write();
        state.unlocked = None;
    }

    /// Access unlocked secrets while refreshing the timeout.
    pub fn with_unlocked<F, T>(&self, operation: F) -> WalletResult<T>
    where
        F: FnOnce(&UnlockedSecrets) -> WalletResult<T>,
    {
        let mut state = self.state.write();
        let session = state.unlocked.as_mut().ok_or(WalletError::Locked)?;

        if session.is_expired() {
            state.unlocked = None;
            log::info!("Wallet session expired");
            return Err(WalletError::Locked);
        }

        session.touch(self.timeout);
        operation(&session.secrets)
    }

    pub fn remaining_attempts(&self) -> u32 {
        let state = self.state.read();
        self.max_failed_attempts
            .saturating_sub(state.failed_attempts)
    }
}

impl Default for WalletSession {
    fn default() -> Self {
        Self::with_defaults()
    }
}
