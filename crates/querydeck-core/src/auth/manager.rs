//! Session lifecycle orchestration.
//!
//! `AuthSessionManager` owns the one `Session` of the running client. It signs
//! in through the remote provider (falling back to a local degraded session
//! when the backend is unusable), persists and rotates tokens, renews them
//! ahead of expiry through the `SessionScheduler`, and recovers or discards a
//! stored session at startup. Observers get snapshots over a watch channel.
//!
//! Token writes from login, refresh and logout are serialized by the inner
//! lock, and every asynchronous result is checked against a session epoch
//! before it is applied: a logout bumps the epoch, so a refresh that resolves
//! afterwards cannot resurrect cleared tokens.

use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::degraded::{is_local_token, DegradedProvider};
use super::error::AuthError;
use super::notify::{Notification, NotificationSink};
use super::provider::{AuthProvider, Grant};
use super::scheduler::SessionScheduler;
use super::session::{Company, Credentials, Session, SessionState, User};
use super::store::TokenStore;
use super::tokens::TokenPair;
use crate::api::{RequestClient, RequestError};
use crate::cache::ProfileCache;
use crate::config::{Config, StorageBackend, DEFAULT_REFRESH_LEAD_SECS};

type RefreshFuture = Shared<BoxFuture<'static, Result<(), AuthError>>>;

/// Tunables for [`AuthSessionManager`].
#[derive(Debug, Clone)]
pub struct ManagerOptions {
    pub refresh_lead: Duration,
    pub allow_degraded: bool,
    /// Where the last known profile is cached; `None` disables the cache.
    pub profile_cache_dir: Option<PathBuf>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            refresh_lead: Duration::from_secs(DEFAULT_REFRESH_LEAD_SECS),
            allow_degraded: true,
            profile_cache_dir: None,
        }
    }
}

struct Inner {
    session: Session,
    /// Set once a "session expired" notice went out; cleared only by a
    /// successful remote login.
    session_expired_notified: bool,
    /// Bumped by login and logout. Async results carrying an older epoch are
    /// discarded.
    epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshMode {
    /// Renewal of a live session; any failure ends it.
    Background,
    /// The single attempt made while restoring an expired stored pair.
    Startup,
}

#[derive(Default)]
struct RefreshSlot {
    next_id: u64,
    current: Option<(u64, RefreshFuture)>,
}

pub struct AuthSessionManager {
    client: RequestClient,
    store: Arc<dyn TokenStore>,
    profile_cache: Option<ProfileCache>,
    degraded: DegradedProvider,
    scheduler: SessionScheduler,
    notifier: Arc<dyn NotificationSink>,
    allow_degraded: bool,
    inner: Mutex<Inner>,
    session_tx: watch::Sender<Session>,
    refresh_slot: Mutex<RefreshSlot>,
    weak_self: Weak<AuthSessionManager>,
}

impl AuthSessionManager {
    pub fn new(
        client: RequestClient,
        store: Arc<dyn TokenStore>,
        notifier: Arc<dyn NotificationSink>,
        options: ManagerOptions,
    ) -> Arc<Self> {
        let (session_tx, _) = watch::channel(Session::default());
        Arc::new_cyclic(|weak| Self {
            client,
            store,
            profile_cache: options.profile_cache_dir.map(ProfileCache::new),
            degraded: DegradedProvider::new(),
            scheduler: SessionScheduler::new(options.refresh_lead),
            notifier,
            allow_degraded: options.allow_degraded,
            inner: Mutex::new(Inner {
                session: Session::default(),
                session_expired_notified: false,
                epoch: 0,
            }),
            session_tx,
            refresh_slot: Mutex::new(RefreshSlot::default()),
            weak_self: weak.clone(),
        })
    }

    /// Wire up the store, client and options described by `config`.
    pub fn from_config(
        config: &Config,
        notifier: Arc<dyn NotificationSink>,
    ) -> anyhow::Result<Arc<Self>> {
        let store = config.token_store()?;
        let client = RequestClient::new(config.api_url(), Arc::clone(&store), config.request_timeout())?;
        let profile_cache_dir = match config.storage {
            StorageBackend::Memory => None,
            _ => Some(config.cache_dir()?),
        };
        let options = ManagerOptions {
            refresh_lead: config.refresh_lead(),
            allow_degraded: config.allow_degraded,
            profile_cache_dir,
        };
        Ok(Self::new(client, store, notifier, options))
    }

    // =========================================================================
    // Observation
    // =========================================================================

    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.session_tx.subscribe()
    }

    pub fn session(&self) -> Session {
        self.inner.lock().session.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().session.state
    }

    pub fn session_expired_notified(&self) -> bool {
        self.inner.lock().session_expired_notified
    }

    /// When the pending silent renewal will run, if one is armed.
    pub fn next_renewal_at(&self) -> Option<DateTime<Utc>> {
        self.scheduler.next_fire_at()
    }

    fn publish(&self, session: &Session) {
        self.session_tx.send_replace(session.clone());
    }

    // =========================================================================
    // Login
    // =========================================================================

    /// Sign in. Unreachable or misbehaving backends yield a degraded local
    /// session (when allowed) rather than an error.
    pub async fn login(&self, credentials: Credentials) -> Result<Session, AuthError> {
        self.scheduler.cancel();
        self.refresh_slot.lock().current = None;
        let epoch = {
            let mut inner = self.inner.lock();
            inner.epoch += 1;
            inner.session = Session::empty(SessionState::Authenticating);
            self.publish(&inner.session);
            inner.epoch
        };
        info!(
            endpoint = %self.client.endpoint(),
            email = %credentials.email,
            company = %credentials.company_slug,
            "Signing in"
        );

        let remote = AuthProvider::Remote(&self.client);
        let (grant, provider) = match remote.login(&credentials).await {
            Ok(grant) => (grant, remote),
            Err(err) => {
                match AuthProvider::fallback_for(&err, &self.degraded, self.allow_degraded) {
                    Some(fallback) => {
                        warn!(error = %err, "Backend unusable, continuing with a local session");
                        let grant = match fallback.login(&credentials).await {
                            Ok(grant) => grant,
                            Err(err) => return Err(self.reject_login(epoch, err)),
                        };
                        (grant, fallback)
                    }
                    None => return Err(self.reject_login(epoch, err)),
                }
            }
        };

        let degraded = provider.is_degraded();
        let session = self.establish(epoch, grant, degraded, true)?;
        if degraded {
            self.notifier.notify(Notification::Degraded {
                reason: "sign-in service unavailable".to_string(),
            });
        } else if let Some(user) = session.user.as_ref() {
            self.notifier.notify(Notification::SignedIn {
                name: user.full_name(),
            });
        }
        info!(degraded, user_id = ?session.user_id(), "Signed in");
        Ok(session)
    }

    fn reject_login(&self, epoch: u64, err: RequestError) -> AuthError {
        {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                return AuthError::Superseded;
            }
            inner.session = Session::empty(SessionState::Unauthenticated);
            self.publish(&inner.session);
        }

        let auth_error = match err.server_message() {
            Some(message) => AuthError::CredentialsInvalid(message.to_string()),
            None => AuthError::Unreachable(err.to_string()),
        };
        let message = match &auth_error {
            AuthError::CredentialsInvalid(message) => message.clone(),
            _ => "Unable to connect to server. Check your connection.".to_string(),
        };
        warn!(error = %err, code = ?err.server_code(), "Login failed");
        self.notifier.notify(Notification::LoginFailed { message });
        auth_error
    }

    /// Install a granted session, unless the epoch moved on meanwhile.
    /// Degraded grants are neither persisted nor scheduled.
    fn establish(
        &self,
        epoch: u64,
        grant: Grant,
        degraded: bool,
        from_login: bool,
    ) -> Result<Session, AuthError> {
        let session = {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                debug!("Session changed while signing in, discarding result");
                return Err(AuthError::Superseded);
            }
            if !degraded {
                if let Err(e) = self.store.save(&grant.tokens) {
                    warn!(error = %e, "Failed to save tokens");
                }
                self.cache_profile(&grant.user, grant.company.as_ref());
                if from_login {
                    inner.session_expired_notified = false;
                }
            }
            inner.session = Session::authenticated(grant.user, grant.company, grant.tokens, degraded);
            self.publish(&inner.session);
            inner.session.clone()
        };

        if let (false, Some(tokens)) = (degraded, session.tokens.as_ref()) {
            self.arm_renewal(tokens.expires_at);
        }
        Ok(session)
    }

    fn cache_profile(&self, user: &User, company: Option<&Company>) {
        if let Some(cache) = &self.profile_cache {
            if let Err(e) = cache.save_profile(user, company) {
                warn!(error = %e, "Failed to cache profile");
            }
        }
    }

    fn load_stored(&self) -> Option<TokenPair> {
        match self.store.load() {
            Ok(pair) => pair,
            Err(e) => {
                warn!(error = %e, "Failed to read stored tokens");
                None
            }
        }
    }

    fn arm_renewal(&self, expires_at: DateTime<Utc>) {
        let weak = self.weak_self.clone();
        self.scheduler.arm(expires_at, move || async move {
            let Some(manager) = weak.upgrade() else {
                return;
            };
            if let Err(e) = manager.refresh().await {
                debug!(error = %e, "Silent renewal did not complete");
            }
        });
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Renew the token pair. Concurrent callers share one request and one
    /// outcome. Any failure ends the session as `Expired`.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        self.refresh_with(RefreshMode::Background).await
    }

    async fn refresh_with(&self, mode: RefreshMode) -> Result<(), AuthError> {
        let (id, flight) = {
            let mut slot = self.refresh_slot.lock();
            match &slot.current {
                Some((id, flight)) => (*id, flight.clone()),
                None => {
                    let Some(manager) = self.weak_self.upgrade() else {
                        return Err(AuthError::Superseded);
                    };
                    slot.next_id += 1;
                    let id = slot.next_id;
                    let flight = async move { manager.run_refresh(mode).await }.boxed().shared();
                    slot.current = Some((id, flight.clone()));
                    (id, flight)
                }
            }
        };

        let result = flight.await;

        let mut slot = self.refresh_slot.lock();
        if matches!(&slot.current, Some((current, _)) if *current == id) {
            slot.current = None;
        }
        result
    }

    async fn run_refresh(&self, mode: RefreshMode) -> Result<(), AuthError> {
        let (epoch, current) = {
            let inner = self.inner.lock();
            if inner.session.is_degraded {
                return Ok(());
            }
            (inner.epoch, inner.session.tokens.clone())
        };
        let tokens = match current {
            Some(tokens) => tokens,
            None => self.load_stored().ok_or(AuthError::NotAuthenticated)?,
        };
        {
            let mut inner = self.inner.lock();
            if inner.epoch != epoch {
                return Err(AuthError::Superseded);
            }
            if inner.session.state == SessionState::Authenticated {
                inner.session.state = SessionState::Refreshing;
                self.publish(&inner.session);
            }
        }
        info!(?mode, "Renewing session tokens");

        let result = self.client.refresh_token(&tokens.refresh_token).await;

        let applied = {
            let mut inner = self.inner.lock();
            let live = matches!(
                inner.session.state,
                SessionState::Authenticated | SessionState::Refreshing | SessionState::Authenticating
            );
            if inner.epoch != epoch || !live {
                debug!("Session changed during renewal, discarding result");
                return Err(AuthError::Superseded);
            }
            match result {
                Ok(envelope) => {
                    let pair = TokenPair::from_envelope(envelope, Utc::now());
                    if let Err(e) = self.store.save(&pair) {
                        warn!(error = %e, "Failed to save renewed tokens");
                    }
                    let expires_at = pair.expires_at;
                    inner.session.tokens = Some(pair);
                    if inner.session.state == SessionState::Refreshing {
                        inner.session.state = SessionState::Authenticated;
                    }
                    self.publish(&inner.session);
                    Ok((inner.session.state == SessionState::Authenticated).then_some(expires_at))
                }
                Err(err) => Err(err),
            }
        };

        match applied {
            Ok(rearm) => {
                if let Some(expires_at) = rearm {
                    self.arm_renewal(expires_at);
                }
                info!("Session tokens renewed");
                Ok(())
            }
            // The stored pair may still be good; only a rejection proves otherwise.
            Err(err) if mode == RefreshMode::Startup && err.is_unreachable() => {
                warn!(error = %err, "Backend unusable while renewing stored session");
                Err(AuthError::Unreachable(err.to_string()))
            }
            Err(err) => {
                warn!(error = %err, code = ?err.server_code(), "Session renewal failed, signing out");
                if !self.end_session(SessionState::Expired, Some(epoch)).await {
                    return Err(AuthError::Superseded);
                }
                self.notify_session_expired();
                Err(AuthError::SessionExpired)
            }
        }
    }

    // =========================================================================
    // Logout
    // =========================================================================

    /// Sign out. Local cleanup is unconditional and happens before the
    /// best-effort remote notice.
    pub async fn logout(&self) {
        self.end_session(SessionState::Unauthenticated, None).await;
    }

    /// Clear the session, the stored tokens and the cached profile, then tell
    /// the backend. With `expected_epoch` set, nothing happens (and `false` is
    /// returned) if a login or logout got there first.
    async fn end_session(&self, final_state: SessionState, expected_epoch: Option<u64>) -> bool {
        let stored_token = self.load_stored().map(|pair| pair.access_token);

        let (access_token, was_degraded) = {
            let mut inner = self.inner.lock();
            if expected_epoch.is_some_and(|epoch| epoch != inner.epoch) {
                debug!("Session changed meanwhile, not ending it");
                return false;
            }
            self.scheduler.cancel();
            self.refresh_slot.lock().current = None;
            inner.epoch += 1;

            let access_token = inner
                .session
                .access_token()
                .map(str::to_string)
                .or(stored_token);
            let was_degraded = inner.session.is_degraded;

            if let Err(e) = self.store.clear() {
                warn!(error = %e, "Failed to clear stored tokens");
            }
            if let Some(cache) = &self.profile_cache {
                if let Err(e) = cache.clear() {
                    warn!(error = %e, "Failed to clear cached profile");
                }
            }
            inner.session = Session::empty(final_state);
            self.publish(&inner.session);
            (access_token, was_degraded)
        };
        info!(state = final_state.label(), "Session ended");

        if was_degraded {
            return true;
        }
        if let Some(token) = access_token.filter(|t| !is_local_token(t)) {
            match self.client.logout(&token).await {
                Ok(success) => debug!(success, "Remote sign-out acknowledged"),
                Err(e) => debug!(error = %e, "Remote sign-out failed, ignoring"),
            }
        }
        true
    }

    fn notify_session_expired(&self) {
        let first = {
            let mut inner = self.inner.lock();
            !std::mem::replace(&mut inner.session_expired_notified, true)
        };
        if first {
            self.notifier.notify(Notification::SessionExpired);
        } else {
            debug!("Session expiry already reported");
        }
    }

    // =========================================================================
    // Startup
    // =========================================================================

    /// Recover a stored session at startup.
    ///
    /// No stored tokens: stay signed out. Expired tokens: one renewal attempt.
    /// Then verify with the backend; a rejection ends the session with a single
    /// "session expired" notice, an unusable backend yields a degraded session
    /// and leaves the stored tokens for the next start.
    pub async fn check_auth(&self) -> Session {
        let stored = self.load_stored();
        let (epoch, stored) = {
            let mut inner = self.inner.lock();
            if inner.session.is_degraded && inner.session.is_authenticated() {
                return inner.session.clone();
            }
            match stored {
                Some(stored) => {
                    inner.session.state = SessionState::Authenticating;
                    self.publish(&inner.session);
                    (inner.epoch, stored)
                }
                None => {
                    if !inner.session.state.is_active() {
                        inner.session = Session::empty(SessionState::Unauthenticated);
                        self.publish(&inner.session);
                    }
                    debug!("No stored session");
                    return inner.session.clone();
                }
            }
        };

        let tokens = if stored.is_expired() {
            info!("Stored session has expired, attempting renewal");
            match self.refresh_with(RefreshMode::Startup).await {
                Ok(()) => match self.session().tokens {
                    Some(tokens) => tokens,
                    None => return self.session(),
                },
                Err(AuthError::Unreachable(detail)) => return self.resume_unverified(epoch, &detail),
                Err(e) => {
                    debug!(error = %e, "Renewal at startup failed");
                    return self.session();
                }
            }
        } else {
            stored
        };

        match self.client.me(&tokens.access_token).await {
            Ok(me) => {
                let grant = Grant {
                    user: me.user,
                    company: me.company,
                    tokens,
                };
                match self.establish(epoch, grant, false, false) {
                    Ok(session) => {
                        info!(user_id = ?session.user_id(), "Stored session restored");
                        session
                    }
                    Err(_) => self.session(),
                }
            }
            Err(err) if err.is_unreachable() => self.resume_unverified(epoch, &err.to_string()),
            Err(err) => {
                warn!(error = %err, code = ?err.server_code(), "Stored session rejected");
                if self.end_session(SessionState::Unauthenticated, Some(epoch)).await {
                    self.notify_session_expired();
                }
                self.session()
            }
        }
    }

    /// The backend could not confirm the stored session. Go degraded when
    /// allowed, otherwise stay signed out; the stored tokens are kept either way.
    fn resume_unverified(&self, epoch: u64, detail: &str) -> Session {
        if !self.allow_degraded {
            warn!(error = detail, "Backend unusable at startup, staying signed out");
            let mut inner = self.inner.lock();
            if inner.epoch == epoch {
                inner.session = Session::empty(SessionState::Unauthenticated);
                self.publish(&inner.session);
            }
            return inner.session.clone();
        }

        warn!(error = detail, "Backend unusable at startup, continuing with a local session");
        let profile = self.profile_cache.as_ref().and_then(|cache| {
            cache
                .load_profile()
                .map_err(|e| warn!(error = %e, "Failed to read cached profile"))
                .ok()
                .flatten()
                .map(|cached| cached.data)
        });
        let grant = self.degraded.resume(profile, Utc::now());
        match self.establish(epoch, grant, true, false) {
            Ok(session) => {
                self.notifier.notify(Notification::Degraded {
                    reason: "session could not be verified".to_string(),
                });
                session
            }
            Err(_) => self.session(),
        }
    }

    // =========================================================================
    // Profile
    // =========================================================================

    pub async fn update_profile(
        &self,
        first_name: &str,
        last_name: &str,
    ) -> Result<User, AuthError> {
        let epoch = {
            let mut inner = self.inner.lock();
            if !inner.session.is_authenticated() {
                return Err(AuthError::NotAuthenticated);
            }
            if inner.session.is_degraded {
                // Local sessions never talk to the backend.
                let user = inner.session.user.as_mut().ok_or(AuthError::NotAuthenticated)?;
                user.first_name = first_name.to_string();
                user.last_name = last_name.to_string();
                let user = user.clone();
                self.publish(&inner.session);
                drop(inner);
                self.notifier.notify(Notification::ProfileUpdated);
                return Ok(user);
            }
            inner.epoch
        };

        match self.client.update_profile(first_name, last_name).await {
            Ok(user) => {
                {
                    let mut inner = self.inner.lock();
                    if inner.epoch != epoch || !inner.session.is_authenticated() {
                        return Err(AuthError::Superseded);
                    }
                    self.cache_profile(&user, inner.session.company.as_ref());
                    inner.session.user = Some(user.clone());
                    self.publish(&inner.session);
                }
                self.notifier.notify(Notification::ProfileUpdated);
                info!(user_id = %user.id, "Profile updated");
                Ok(user)
            }
            Err(err) => {
                warn!(error = %err, "Profile update failed");
                let (auth_error, message) = match err.server_message() {
                    Some(message) => (AuthError::Rejected(message.to_string()), message.to_string()),
                    None => (
                        AuthError::Unreachable(err.to_string()),
                        "Unable to connect to server. Check your connection.".to_string(),
                    ),
                };
                self.notifier
                    .notify(Notification::ProfileUpdateFailed { message });
                Err(auth_error)
            }
        }
    }
}
