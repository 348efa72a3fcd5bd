//! Async Driver
//!
//! Glue between the synchronous store and an async transport. Three
//! traffic patterns share one [`Dispatcher`] seam:
//!
//! - **Fire-and-forget mutations**: [`Driver::submit`] applies the command
//!   synchronously, then spawns a task that awaits the response and feeds
//!   it back through `Store::resolve`. Failures surface on the toast
//!   channel, never as a hang.
//! - **Awaited auth actions**: login, registration, email verification and
//!   password change block the caller until the server answers, because
//!   there is no sensible optimistic rendering of "maybe signed in".
//! - **Periodic polling**: [`Driver::spawn_poller`] re-fetches the full
//!   payload on an interval and funnels it through the merge engine,
//!   picking up anything the push channel missed.

use futures_util::future::BoxFuture;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::error::{ActionError, CoreError};
use crate::merge::EntityBatch;
use crate::mutation::{ActionResult, OutboundRequest};
use crate::normalize;
use crate::snapshot::PersistedSession;
use crate::store::{SharedStore, Store};
use crate::transport::{FetchPayload, MutationResponse, TransportError};

/// Authentication requests, the only awaited round-trips
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRequest {
    /// Sign in with credentials
    Login {
        /// Account username
        username: String,
        /// Account password
        password: String,
    },
    /// Create a new account
    Register {
        /// Desired username
        username: String,
        /// Email address to verify
        email: String,
        /// Account password
        password: String,
    },
    /// Confirm an email verification code
    VerifyEmail {
        /// Code from the verification email
        code: String,
    },
    /// Change the signed-in user's password
    ChangePassword {
        /// Current password
        old_password: String,
        /// Replacement password
        new_password: String,
    },
}

/// Successful authentication response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSuccess {
    /// Bearer token for subsequent requests
    pub token: String,
    /// Raw user object for the authenticated account
    pub user: Value,
}

/// The network seam the driver talks through.
///
/// Implementations own the HTTP / websocket client details; the driver only
/// sees declarative requests and their parsed responses.
pub trait Dispatcher: Send + Sync + 'static {
    /// Send one mutation request and await its response
    fn dispatch(&self, request: OutboundRequest) -> BoxFuture<'static, MutationResponse>;

    /// Fetch the full state payload for the signed-in user
    fn poll(&self) -> BoxFuture<'static, Result<FetchPayload, TransportError>>;

    /// Perform an authentication round-trip
    fn authenticate(
        &self,
        request: AuthRequest,
    ) -> BoxFuture<'static, Result<AuthSuccess, TransportError>>;
}

/// Drives traffic between the store and a [`Dispatcher`]
pub struct Driver {
    store: SharedStore,
    dispatcher: Arc<dyn Dispatcher>,
    config: CoreConfig,
    toasts: mpsc::UnboundedSender<String>,
    poller_active: Arc<AtomicBool>,
}

impl Driver {
    /// Create a driver plus the receiving end of its toast channel.
    ///
    /// The host drains the receiver to show transient error banners for
    /// fire-and-forget mutations that later failed.
    pub fn new(
        store: SharedStore,
        dispatcher: Arc<dyn Dispatcher>,
        config: CoreConfig,
    ) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (toasts, toast_rx) = mpsc::unbounded_channel();
        (
            Self {
                store,
                dispatcher,
                config,
                toasts,
                poller_active: Arc::new(AtomicBool::new(false)),
            },
            toast_rx,
        )
    }

    /// Handle to the shared store
    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Apply a mutation command and dispatch its request in the background.
    ///
    /// The returned [`crate::mutation::Accepted`] reflects the already-installed optimistic
    /// snapshot; confirmation or rollback lands later via `Store::resolve`.
    pub async fn submit<F>(&self, command: F) -> ActionResult
    where
        F: FnOnce(&mut Store) -> ActionResult,
    {
        let accepted = {
            let mut store = self.store.write().await;
            command(&mut *store)?
        };

        let store = self.store.clone();
        let dispatcher = self.dispatcher.clone();
        let toasts = self.toasts.clone();
        let correlation = accepted.correlation;
        let request = accepted.request.clone();
        tokio::spawn(async move {
            let response = dispatcher.dispatch(request).await;
            let outcome = store.write().await.resolve(correlation, response);
            if let Err(err) = outcome {
                let _ = toasts.send(err.to_string());
            }
        });

        Ok(accepted)
    }

    /// Sign in and hydrate the session from the response.
    ///
    /// Returns the slice of session state the host should persist.
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<PersistedSession, ActionError> {
        let request = AuthRequest::Login {
            username: require_credential("username", username)?,
            password: require_credential("password", password)?,
        };
        let success = self.authenticate(request).await?;
        self.install_session(&success).await
    }

    /// Register a new account; the account starts signed in but unverified
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<PersistedSession, ActionError> {
        if !email.contains('@') {
            return Err(ActionError::validation("email", "must be an email address"));
        }
        let request = AuthRequest::Register {
            username: require_credential("username", username)?,
            email: require_credential("email", email)?,
            password: require_credential("password", password)?,
        };
        let success = self.authenticate(request).await?;
        self.install_session(&success).await
    }

    /// Confirm the emailed verification code
    pub async fn verify_email(&self, code: &str) -> Result<(), ActionError> {
        let request = AuthRequest::VerifyEmail {
            code: require_credential("code", code)?,
        };
        self.authenticate(request).await?;
        info!("email verified");
        Ok(())
    }

    /// Change the signed-in user's password
    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
    ) -> Result<(), ActionError> {
        if self.store.read().await.snapshot().current_user().is_none() {
            return Err(ActionError::Unauthenticated);
        }
        let request = AuthRequest::ChangePassword {
            old_password: require_credential("old_password", old_password)?,
            new_password: require_credential("new_password", new_password)?,
        };
        self.authenticate(request).await?;
        Ok(())
    }

    /// Fetch the full payload once and merge it in
    pub async fn refresh(&self) -> Result<(), ActionError> {
        let payload = self
            .dispatcher
            .poll()
            .await
            .map_err(|e| ActionError::transport(e.to_string()))?;
        self.store.write().await.apply_fetch(&payload);
        Ok(())
    }

    /// Start the periodic refresh loop.
    ///
    /// At most one poller runs per driver; the slot frees up when the
    /// returned handle shuts down or drops.
    pub fn spawn_poller(&self) -> Result<PollHandle, CoreError> {
        if self.poller_active.swap(true, Ordering::SeqCst) {
            return Err(CoreError::AlreadyRunning);
        }
        let store = self.store.clone();
        let dispatcher = self.dispatcher.clone();
        let interval = self.config.poll_interval;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // skip the immediate first tick; callers refresh on login
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if store.read().await.snapshot().current_user().is_none() {
                            continue;
                        }
                        match dispatcher.poll().await {
                            Ok(payload) => {
                                store.write().await.apply_fetch(&payload);
                                debug!("poll merged");
                            }
                            Err(err) => warn!(error = %err, "poll failed"),
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(PollHandle {
            shutdown: shutdown_tx,
            task: Some(task),
            active: self.poller_active.clone(),
        })
    }

    async fn authenticate(&self, request: AuthRequest) -> Result<AuthSuccess, ActionError> {
        self.dispatcher
            .authenticate(request)
            .await
            .map_err(|e| ActionError::transport(e.to_string()))
    }

    async fn install_session(&self, success: &AuthSuccess) -> Result<PersistedSession, ActionError> {
        let mut store = self.store.write().await;
        let user = normalize::user(&success.user, store.clock());
        if user.id.is_empty() {
            return Err(ActionError::transport("auth response missing user id"));
        }
        info!(user = %user.id, "signed in");
        store.sign_in(user.id.clone());
        store.apply_batch(&EntityBatch {
            users: vec![user],
            ..EntityBatch::default()
        });
        Ok(store.snapshot().persisted(Some(success.token.clone())))
    }
}

/// Running poll loop; dropping the handle stops it
pub struct PollHandle {
    shutdown: watch::Sender<bool>,
    // Option so shutdown can take the handle out from under Drop
    task: Option<JoinHandle<()>>,
    active: Arc<AtomicBool>,
}

impl PollHandle {
    /// Stop the loop and wait for the task to finish
    pub async fn shutdown(mut self) -> Result<(), CoreError> {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            task.await
                .map_err(|e| CoreError::ChannelClosed(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.active.store(false, Ordering::SeqCst);
    }
}

fn require_credential(field: &str, value: &str) -> Result<String, ActionError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ActionError::validation(field, "cannot be empty"))
    } else {
        Ok(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntityId;
    use crate::store;
    use serde_json::json;

    /// Dispatcher that confirms every mutation with a fixed entity
    struct EchoDispatcher;

    impl Dispatcher for EchoDispatcher {
        fn dispatch(&self, request: OutboundRequest) -> BoxFuture<'static, MutationResponse> {
            Box::pin(async move {
                match request {
                    OutboundRequest::CreatePost { text, .. } => MutationResponse::Confirmed {
                        entity: json!({ "id": "server-1", "author_id": "u1", "text": text }),
                        extra: FetchPayload::default(),
                    },
                    _ => MutationResponse::Failed(TransportError::Unreachable),
                }
            })
        }

        fn poll(&self) -> BoxFuture<'static, Result<FetchPayload, TransportError>> {
            Box::pin(async {
                Ok(FetchPayload {
                    users: vec![json!({ "id": "u9", "username": "polled" })],
                    ..FetchPayload::default()
                })
            })
        }

        fn authenticate(
            &self,
            request: AuthRequest,
        ) -> BoxFuture<'static, Result<AuthSuccess, TransportError>> {
            Box::pin(async move {
                match request {
                    AuthRequest::Login { username, .. } => Ok(AuthSuccess {
                        token: "tok".into(),
                        user: json!({ "id": "u1", "username": username }),
                    }),
                    _ => Err(TransportError::Rejected("unsupported".into())),
                }
            })
        }
    }

    fn driver() -> (Driver, mpsc::UnboundedReceiver<String>) {
        driver_with(CoreConfig::default())
    }

    fn driver_with(config: CoreConfig) -> (Driver, mpsc::UnboundedReceiver<String>) {
        Driver::new(store::shared(), Arc::new(EchoDispatcher), config)
    }

    #[tokio::test]
    async fn test_login_hydrates_session() {
        let (driver, _toasts) = driver();
        let persisted = driver.login("alice", "secret").await.unwrap();
        assert_eq!(persisted.token.as_deref(), Some("tok"));

        let store = driver.store().read().await;
        assert_eq!(store.snapshot().current_user(), Some(&EntityId::new("u1")));
        assert!(store.snapshot().users.contains_key(&EntityId::new("u1")));
    }

    #[tokio::test]
    async fn test_login_rejects_blank_credentials() {
        let (driver, _toasts) = driver();
        let err = driver.login("  ", "secret").await.unwrap_err();
        assert!(matches!(err, ActionError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_submit_confirms_in_background() {
        let (driver, _toasts) = driver();
        driver.login("alice", "secret").await.unwrap();

        let accepted = driver
            .submit(|store| store.create_post("hello", None))
            .await
            .unwrap();
        let provisional = accepted.entity_id.unwrap();

        // give the spawned resolve task a chance to run
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if driver.store().read().await.pending_count() == 0 {
                break;
            }
        }

        let store = driver.store().read().await;
        assert!(!store.snapshot().posts.contains_key(&provisional));
        assert!(store.snapshot().posts.contains_key(&EntityId::new("server-1")));
    }

    #[tokio::test]
    async fn test_failed_mutation_toasts_and_rolls_back() {
        let (driver, mut toasts) = driver();
        driver.login("alice", "secret").await.unwrap();

        driver
            .submit(|store| store.send_message(&EntityId::new("u2"), "hi", None, None))
            .await
            .unwrap();

        let toast = tokio::time::timeout(std::time::Duration::from_secs(1), toasts.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(toast.contains("unavailable") || toast.contains("Transport"));

        let store = driver.store().read().await;
        assert!(store.snapshot().messages.is_empty());
        assert_eq!(store.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_poller_merges_until_shutdown() {
        let (driver, _toasts) = driver_with(CoreConfig {
            poll_interval: std::time::Duration::from_millis(10),
            ..CoreConfig::default()
        });
        driver.login("alice", "secret").await.unwrap();

        let poller = driver.spawn_poller().unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                if driver
                    .store()
                    .read()
                    .await
                    .snapshot()
                    .users
                    .contains_key(&EntityId::new("u9"))
                {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        poller.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_only_one_poller_at_a_time() {
        let (driver, _toasts) = driver();

        let poller = driver.spawn_poller().unwrap();
        assert!(matches!(
            driver.spawn_poller(),
            Err(CoreError::AlreadyRunning)
        ));

        poller.shutdown().await.unwrap();
        // the slot frees up once the handle is gone
        let again = driver.spawn_poller().unwrap();
        drop(again);
    }

    #[tokio::test]
    async fn test_refresh_merges_payload() {
        let (driver, _toasts) = driver();
        driver.login("alice", "secret").await.unwrap();
        driver.refresh().await.unwrap();

        let store = driver.store().read().await;
        assert!(store.snapshot().users.contains_key(&EntityId::new("u9")));
    }
}
