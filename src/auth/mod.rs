//! Account flows: sign-up with a profile, sign-in, profile edits.

pub mod identity;

use std::rc::Rc;

use serde_json::json;
use thiserror::Error;
use tracing::{info, warn};

pub use identity::{Identity, IdentityService, Listener, ListenerId, LocalIdentity};

use crate::database::{Backend, Collection, Query};
use crate::error::{Error, Result};
use crate::model::{now, UserProfile};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthFailure {
    #[error("no account for this email")]
    UserNotFound,
    #[error("wrong password")]
    WrongPassword,
    #[error("invalid email address")]
    InvalidEmail,
    #[error("email already in use")]
    EmailAlreadyInUse,
    #[error("password shorter than {} characters", identity::MIN_PASSWORD_LEN)]
    WeakPassword,
    #[error("screen name already taken")]
    ScreenNameTaken,
    #[error("screen name has invalid characters")]
    InvalidScreenName,
    #[error("not signed in")]
    NotSignedIn,
    #[error("authentication failed: {0}")]
    Other(String),
}

impl AuthFailure {
    pub fn user_message(&self) -> &'static str {
        match self {
            AuthFailure::UserNotFound => "No account found with this email address. Please sign up first.",
            AuthFailure::WrongPassword => "Invalid password. Please try again.",
            AuthFailure::InvalidEmail => "Invalid email address.",
            AuthFailure::EmailAlreadyInUse => "An account with this email address already exists.",
            AuthFailure::WeakPassword => "Password should be at least 6 characters.",
            AuthFailure::ScreenNameTaken => "Screen name already exists. Please choose a different one.",
            AuthFailure::InvalidScreenName => {
                "Screen names may only contain letters, numbers and underscores."
            }
            AuthFailure::NotSignedIn => "You are not signed in.",
            AuthFailure::Other(_) => "Sign in failed. Please try again.",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub screen_name: String,
}

/// Fields to change on the signed-in user's profile. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub screen_name: Option<String>,
    pub profile_picture: Option<String>,
}

pub struct AuthService {
    backend: Backend,
    identity: Rc<dyn IdentityService>,
}

impl AuthService {
    pub fn new(backend: Backend, identity: Rc<dyn IdentityService>) -> Self {
        Self { backend, identity }
    }

    /// Auth over the backend's own account collections.
    pub fn local(backend: Backend) -> Self {
        let identity = Rc::new(LocalIdentity::new(backend.clone()));
        Self::new(backend, identity)
    }

    pub fn identity(&self) -> &dyn IdentityService {
        self.identity.as_ref()
    }

    pub fn signup(&self, account: &NewAccount) -> Result<UserProfile> {
        let screen_name = validate_screen_name(&account.screen_name)?;
        if self.screen_name_exists(screen_name)? {
            return Err(AuthFailure::ScreenNameTaken.into());
        }

        let identity = self
            .identity
            .sign_up(&account.email, &account.password)
            .inspect_err(|e| warn!("Signup failed for {}: {}", account.email, e))?;

        let at = now();
        let profile = UserProfile {
            uid: identity.uid.clone(),
            email: identity.email,
            first_name: account.first_name.trim().to_string(),
            last_name: account.last_name.trim().to_string(),
            screen_name: screen_name.to_string(),
            profile_picture: None,
            created_at: at,
            updated_at: at,
        };
        self.backend.put(Collection::Users, &identity.uid, &profile)?;
        info!("Signed up {} as {}", profile.email, profile.screen_name);
        Ok(profile)
    }

    pub fn signin(&self, email: &str, password: &str) -> Result<UserProfile> {
        let identity = self
            .identity
            .sign_in(email, password)
            .inspect_err(|e| warn!("Signin failed for {}: {}", email, e))?;
        self.profile(&identity.uid)
    }

    pub fn logout(&self) -> Result<()> {
        self.identity.sign_out()
    }

    pub fn request_password_reset(&self, email: &str) -> Result<()> {
        self.identity.send_password_reset(email)
    }

    /// Profile of the signed-in user, if anyone is signed in.
    pub fn current_user(&self) -> Result<Option<UserProfile>> {
        match self.identity.current()? {
            Some(identity) => self.backend.fetch(Collection::Users, &identity.uid),
            None => Ok(None),
        }
    }

    pub fn require_user(&self) -> Result<UserProfile> {
        self.current_user()?
            .ok_or_else(|| AuthFailure::NotSignedIn.into())
    }

    pub fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile> {
        let mut profile = self.require_user()?;

        if let Some(screen_name) = &update.screen_name {
            let screen_name = validate_screen_name(screen_name)?;
            if screen_name != profile.screen_name && self.screen_name_exists(screen_name)? {
                return Err(AuthFailure::ScreenNameTaken.into());
            }
            profile.screen_name = screen_name.to_string();
        }
        if let Some(first) = &update.first_name {
            profile.first_name = first.trim().to_string();
        }
        if let Some(last) = &update.last_name {
            profile.last_name = last.trim().to_string();
        }
        if let Some(picture) = &update.profile_picture {
            profile.profile_picture = Some(picture.clone());
        }
        profile.updated_at = now();

        self.backend.patch(
            Collection::Users,
            &profile.uid,
            json!({
                "firstName": profile.first_name,
                "lastName": profile.last_name,
                "screenName": profile.screen_name,
                "profilePicture": profile.profile_picture,
                "updatedAt": profile.updated_at.timestamp_millis(),
            }),
        )?;
        Ok(profile)
    }

    pub fn screen_name_exists(&self, screen_name: &str) -> Result<bool> {
        let query = Query::new().eq("screenName", screen_name).limit(1);
        Ok(!self.backend.store().query(Collection::Users, &query)?.is_empty())
    }

    fn profile(&self, uid: &str) -> Result<UserProfile> {
        self.backend
            .fetch(Collection::Users, uid)?
            .ok_or_else(|| Error::not_found("user profile", uid))
    }
}

fn validate_screen_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(name)
    } else {
        Err(AuthFailure::InvalidScreenName.into())
    }
}
