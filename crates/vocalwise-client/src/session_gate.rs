//! Identity resolution and the account flows around it.
//!
//! Startup is two-stage: a cached user is trusted immediately so the shell
//! can render, and its token is refreshed in the background. Data operations
//! go through [`SessionGate::verified_user`], which waits for that refresh.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use vocalwise_shared::clock::Clock;
use vocalwise_shared::constants::AVATAR_KEY_PREFIX;
use vocalwise_shared::models::{PendingAttachment, ProfileUpdate, User, UserProfile};
use vocalwise_shared::validation::{validate_attachment, validate_email, RegistrationForm};
use vocalwise_shared::ValidationError;
use vocalwise_store::CredentialCache;

use crate::backend::{AuthProvider, BackendError, BlobStore, DocumentStore};
use crate::error::{ChatError, Result};
use crate::login_guard::{LockStatus, LoginGuard};
use crate::platform::{Navigator, Route};

/// Outcome of startup identity resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identity {
    /// Read from the local cache; the token has not been refreshed yet.
    CachedUnverified(User),
    Verified(User),
    Anonymous,
}

impl Identity {
    pub fn user(&self) -> Option<&User> {
        match self {
            Self::CachedUnverified(user) | Self::Verified(user) => Some(user),
            Self::Anonymous => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Unknown,
    Pending,
    Verified,
    Failed,
}

pub struct SessionGate {
    auth: Arc<dyn AuthProvider>,
    documents: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    credentials: CredentialCache,
    guard: LoginGuard,
    navigator: Arc<dyn Navigator>,
    clock: Arc<dyn Clock>,
    identity: Mutex<Identity>,
    status: watch::Sender<AuthStatus>,
    /// Held for the whole background refresh so concurrent callers share it.
    verifying: tokio::sync::Mutex<()>,
}

impl SessionGate {
    pub fn new(
        auth: Arc<dyn AuthProvider>,
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        credentials: CredentialCache,
        guard: LoginGuard,
        navigator: Arc<dyn Navigator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (status, _) = watch::channel(AuthStatus::Unknown);
        Self {
            auth,
            documents,
            blobs,
            credentials,
            guard,
            navigator,
            clock,
            identity: Mutex::new(Identity::Anonymous),
            status,
            verifying: tokio::sync::Mutex::new(()),
        }
    }

    pub fn guard(&self) -> &LoginGuard {
        &self.guard
    }

    pub fn status(&self) -> watch::Receiver<AuthStatus> {
        self.status.subscribe()
    }

    pub fn identity(&self) -> Identity {
        self.identity
            .lock()
            .map(|i| i.clone())
            .unwrap_or(Identity::Anonymous)
    }

    /// The signed-in user, verified or not.
    pub fn current_user(&self) -> Option<User> {
        self.identity().user().cloned()
    }

    fn set_identity(&self, identity: Identity) {
        let status = match &identity {
            Identity::CachedUnverified(_) => AuthStatus::Pending,
            Identity::Verified(_) => AuthStatus::Verified,
            Identity::Anonymous => AuthStatus::Failed,
        };
        if let Ok(mut current) = self.identity.lock() {
            *current = identity;
        }
        self.status.send_replace(status);
    }

    /// Resolve who is signed in without waiting on the network when a cached
    /// user exists.
    pub async fn resolve(&self) -> Identity {
        match self.credentials.load() {
            Ok(Some(user)) => {
                debug!(user = %user.id.short(), "using cached credential");
                let identity = Identity::CachedUnverified(user);
                self.set_identity(identity.clone());
                return identity;
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "could not read cached credential"),
        }

        match self.auth.current_user().await {
            Ok(Some(user)) => {
                if let Err(e) = self.credentials.save(&user) {
                    warn!(error = %e, "could not cache credential");
                }
                info!(user = %user.id.short(), "live session found");
                let identity = Identity::Verified(user);
                self.set_identity(identity.clone());
                identity
            }
            Ok(None) => {
                self.set_identity(Identity::Anonymous);
                self.navigator.navigate(Route::Login);
                Identity::Anonymous
            }
            Err(e) => {
                warn!(error = %e, "auth provider unavailable at startup");
                self.set_identity(Identity::Anonymous);
                self.navigator.navigate(Route::Login);
                Identity::Anonymous
            }
        }
    }

    /// Resolve and, for a cached user, start the token refresh in the
    /// background.
    pub async fn start(self: &Arc<Self>) -> (Identity, Option<JoinHandle<()>>) {
        let identity = self.resolve().await;
        let verification = match identity {
            Identity::CachedUnverified(_) => {
                let gate = Arc::clone(self);
                Some(tokio::spawn(async move {
                    let _ = gate.verify().await;
                }))
            }
            _ => None,
        };
        (identity, verification)
    }

    /// Refresh the token of the current user. A failure signs the user out
    /// locally and sends them to the login screen.
    ///
    /// At most one refresh runs at a time; callers arriving while it is in
    /// flight wait for it and then see its outcome.
    pub async fn verify(&self) -> Result<User> {
        let _single = self.verifying.lock().await;
        let user = match self.identity() {
            Identity::Verified(user) => return Ok(user),
            Identity::CachedUnverified(user) => user,
            Identity::Anonymous => return Err(ChatError::Unauthenticated),
        };

        let refreshed = self.auth.refresh_token(false).await;
        let mut current = self
            .identity
            .lock()
            .map_err(|_| ChatError::Unauthenticated)?;

        let unchanged = matches!(&*current, Identity::CachedUnverified(cached) if cached.id == user.id);
        match refreshed {
            Ok(_) if unchanged => {
                *current = Identity::Verified(user.clone());
                drop(current);
                self.status.send_replace(AuthStatus::Verified);
                info!(user = %user.id.short(), "credential verified");
                Ok(user)
            }
            Err(e) if unchanged => {
                drop(current);
                warn!(error = %e, "token refresh failed");
                self.invalidate();
                Err(ChatError::Unauthenticated)
            }
            // The session changed while the refresh was in flight.
            _ => match &*current {
                Identity::Verified(other) => Ok(other.clone()),
                _ => {
                    debug!(user = %user.id.short(), "session ended during verification");
                    Err(ChatError::Unauthenticated)
                }
            },
        }
    }

    /// The user for data operations, after verification.
    pub async fn verified_user(&self) -> Result<User> {
        match self.identity() {
            Identity::Verified(user) => Ok(user),
            Identity::CachedUnverified(_) => self.verify().await,
            Identity::Anonymous => Err(ChatError::Unauthenticated),
        }
    }

    /// Force a token refresh after a permission error. Failure is terminal
    /// for the session.
    pub async fn refresh_after_denied(&self) -> Result<()> {
        match self.auth.refresh_token(true).await {
            Ok(_) => {
                debug!("token refreshed after permission error");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "forced token refresh failed");
                self.invalidate();
                Err(ChatError::Unauthenticated)
            }
        }
    }

    fn invalidate(&self) {
        if let Err(e) = self.credentials.clear() {
            warn!(error = %e, "could not clear cached credential");
        }
        self.set_identity(Identity::Anonymous);
        self.navigator.navigate(Route::Login);
    }

    // -- account flows --------------------------------------------------

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<User> {
        if let LockStatus::Locked { remaining } = self.guard.check_status()? {
            self.navigator.navigate(Route::Recovery);
            return Err(ChatError::RateLimited { remaining });
        }

        let email = email.trim();
        validate_email(email)?;
        if password.is_empty() {
            return Err(ValidationError::EmptyPassword.into());
        }

        match self.auth.sign_in(email, password).await {
            Ok(user) => {
                self.guard.record_success()?;
                self.credentials.save(&user)?;
                info!(user = %user.id.short(), "signed in");
                self.set_identity(Identity::Verified(user.clone()));
                self.navigator.navigate(Route::Chat);
                Ok(user)
            }
            Err(e @ (BackendError::InvalidCredentials | BackendError::UserNotFound)) => {
                if let LockStatus::Locked { remaining } = self.guard.record_failure()? {
                    self.navigator.navigate(Route::Recovery);
                    return Err(ChatError::RateLimited { remaining });
                }
                Err(ChatError::AuthFailed(e))
            }
            Err(e) => Err(ChatError::Backend(e)),
        }
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.credentials.clear()?;
        if let Err(e) = self.auth.sign_out().await {
            warn!(error = %e, "sign-out at the auth provider failed");
        }
        self.set_identity(Identity::Anonymous);
        self.navigator.navigate(Route::Login);
        info!("signed out");
        Ok(())
    }

    /// Create an account, store its profile and sign it in.
    pub async fn register(
        &self,
        form: &RegistrationForm,
        avatar: Option<PendingAttachment>,
    ) -> Result<User> {
        if let Some(first) = form.validate().into_iter().next() {
            return Err(first.into());
        }
        if let Some(avatar) = &avatar {
            validate_attachment(avatar)?;
        }

        let email = form.email.trim();
        let display_name = form.display_name.trim().to_string();

        let created = match self.auth.create_user(email, &form.password).await {
            Ok(user) => user,
            Err(BackendError::EmailInUse) => return Err(ValidationError::EmailInUse.into()),
            Err(e) => return Err(ChatError::AuthFailed(e)),
        };

        let photo_url = match avatar {
            Some(avatar) => Some(self.upload_avatar(&created, avatar.bytes).await?),
            None => None,
        };

        let now = self.clock.now();
        self.documents
            .put_user_profile(&UserProfile {
                user_id: created.id.clone(),
                email: email.to_string(),
                display_name: display_name.clone(),
                photo_url: photo_url.clone(),
                created_at: now,
                last_login: now,
            })
            .await?;

        let user = self
            .auth
            .update_profile(&ProfileUpdate {
                display_name: Some(display_name),
                photo_url,
            })
            .await?;

        self.credentials.save(&user)?;
        info!(user = %user.id.short(), "account registered");
        self.set_identity(Identity::Verified(user.clone()));
        self.navigator.navigate(Route::Chat);
        Ok(user)
    }

    async fn upload_avatar(&self, user: &User, bytes: Bytes) -> Result<String> {
        let key = format!("{AVATAR_KEY_PREFIX}/{}", user.id);
        let blob = self
            .blobs
            .upload(&key, bytes)
            .await
            .map_err(|e| ChatError::UploadFailed(e.to_string()))?;
        self.blobs
            .download_url(&blob)
            .await
            .map_err(|e| ChatError::UploadFailed(e.to_string()))
    }

    /// Send a reset mail and lift any local lockout.
    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        let email = email.trim();
        if email.is_empty() {
            return Err(ValidationError::EmptyEmail.into());
        }

        self.auth
            .send_password_reset(email)
            .await
            .map_err(|e| match e {
                BackendError::UserNotFound => ChatError::AuthFailed(e),
                other => ChatError::from(other),
            })?;

        self.guard.reset()?;
        info!("password reset requested");
        self.navigator.navigate(Route::Landing);
        Ok(())
    }
}
