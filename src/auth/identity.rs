use std::cell::{Cell, RefCell};
use std::rc::Rc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::auth::AuthFailure;
use crate::database::{Backend, Collection, Query};
use crate::error::Result;
use crate::model::now;

pub const MIN_PASSWORD_LEN: usize = 6;

/// Session record id. One identity is signed in per backend.
const CURRENT_SESSION: &str = "current";

/// A signed-in account, as the identity service knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub email: String,
}

pub type Listener = Box<dyn Fn(Option<&Identity>)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

/// Email/password accounts and the signed-in session.
pub trait IdentityService {
    /// Creates the account and signs it in.
    fn sign_up(&self, email: &str, password: &str) -> Result<Identity>;

    fn sign_in(&self, email: &str, password: &str) -> Result<Identity>;

    fn sign_out(&self) -> Result<()>;

    fn send_password_reset(&self, email: &str) -> Result<()>;

    fn current(&self) -> Result<Option<Identity>>;

    /// Calls `listener` right away with the current identity, then after
    /// every sign-in or sign-out.
    fn subscribe(&self, listener: Listener) -> Result<ListenerId>;

    fn unsubscribe(&self, id: ListenerId);
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Account {
    uid: String,
    email: String,
    salt: String,
    password_hash: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    #[serde(flatten)]
    identity: Identity,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    signed_in_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ResetRequest<'a> {
    uid: &'a str,
    email: &'a str,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    requested_at: DateTime<Utc>,
}

/// Identity kept in the backend's private `accounts` and `sessions`
/// collections. Passwords are stored as salted SHA-256 digests.
pub struct LocalIdentity {
    backend: Backend,
    listeners: RefCell<Vec<(ListenerId, Rc<dyn Fn(Option<&Identity>)>)>>,
    next_listener: Cell<u64>,
}

impl LocalIdentity {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            listeners: RefCell::new(Vec::new()),
            next_listener: Cell::new(0),
        }
    }

    fn account_by_email(&self, email: &str) -> Result<Option<Account>> {
        let query = Query::new().eq("email", email).limit(1);
        let mut found: Vec<Account> = self.backend.query_as(Collection::Accounts, &query)?;
        Ok(found.pop())
    }

    fn start_session(&self, identity: &Identity) -> Result<()> {
        let record = SessionRecord {
            identity: identity.clone(),
            signed_in_at: now(),
        };
        self.backend.put(Collection::Sessions, CURRENT_SESSION, &record)?;
        self.notify(Some(identity));
        Ok(())
    }

    /// Listeners run against a snapshot, so they may subscribe or
    /// unsubscribe while being notified.
    fn notify(&self, identity: Option<&Identity>) {
        let snapshot: Vec<_> = self.listeners.borrow().iter().map(|(_, l)| l.clone()).collect();
        for listener in snapshot {
            listener(identity);
        }
    }
}

impl IdentityService for LocalIdentity {
    fn sign_up(&self, email: &str, password: &str) -> Result<Identity> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthFailure::WeakPassword.into());
        }
        if self.account_by_email(&email)?.is_some() {
            return Err(AuthFailure::EmailAlreadyInUse.into());
        }

        let uid = self.backend.generate_id();
        let salt = self.backend.generate_id();
        let account = Account {
            uid: uid.clone(),
            email: email.clone(),
            password_hash: password_digest(&salt, password),
            salt,
            created_at: now(),
        };
        self.backend.put(Collection::Accounts, &uid, &account)?;
        info!("Created account {} for {}", uid, email);

        let identity = Identity { uid, email };
        self.start_session(&identity)?;
        Ok(identity)
    }

    fn sign_in(&self, email: &str, password: &str) -> Result<Identity> {
        let email = normalize_email(email)?;
        let account = self
            .account_by_email(&email)?
            .ok_or(AuthFailure::UserNotFound)?;
        if password_digest(&account.salt, password) != account.password_hash {
            debug!("Password mismatch for {}", email);
            return Err(AuthFailure::WrongPassword.into());
        }

        let identity = Identity {
            uid: account.uid,
            email: account.email,
        };
        self.start_session(&identity)?;
        info!("Signed in {}", identity.email);
        Ok(identity)
    }

    fn sign_out(&self) -> Result<()> {
        self.backend.remove(Collection::Sessions, CURRENT_SESSION)?;
        self.notify(None);
        info!("Signed out");
        Ok(())
    }

    fn send_password_reset(&self, email: &str) -> Result<()> {
        let email = normalize_email(email)?;
        let account = self
            .account_by_email(&email)?
            .ok_or(AuthFailure::UserNotFound)?;
        let request = ResetRequest {
            uid: &account.uid,
            email: &account.email,
            requested_at: now(),
        };
        self.backend.insert(Collection::PasswordResets, &request)?;
        // no mail transport; the request record is the hand-off point
        info!("Password reset email queued for {}", account.email);
        Ok(())
    }

    fn current(&self) -> Result<Option<Identity>> {
        let session: Option<SessionRecord> = self.backend.fetch(Collection::Sessions, CURRENT_SESSION)?;
        Ok(session.map(|s| s.identity))
    }

    fn subscribe(&self, listener: Listener) -> Result<ListenerId> {
        let id = ListenerId(self.next_listener.get());
        self.next_listener.set(id.0 + 1);
        listener(self.current()?.as_ref());
        self.listeners.borrow_mut().push((id, Rc::from(listener)));
        Ok(id)
    }

    fn unsubscribe(&self, id: ListenerId) {
        self.listeners.borrow_mut().retain(|(lid, _)| *lid != id);
    }
}

/// Lowercases a plausible address: one `@`, a non-empty local part and a
/// dotted domain, no whitespace.
fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_ascii_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(AuthFailure::InvalidEmail.into())
    }
}

fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use std::rc::Weak;

    use super::*;
    use crate::error::Error;
    use crate::testing::fixture;

    fn failure(result: Result<Identity>) -> AuthFailure {
        match result {
            Err(Error::Auth(f)) => f,
            other => panic!("expected auth failure, got {other:?}"),
        }
    }

    #[test]
    fn sign_up_validates_and_signs_in() -> Result<()> {
        let fx = fixture();
        let identity = LocalIdentity::new(fx.backend.clone());

        assert_eq!(failure(identity.sign_up("nope", "secret1")), AuthFailure::InvalidEmail);
        assert_eq!(failure(identity.sign_up("a@b.io", "12345")), AuthFailure::WeakPassword);

        let me = identity.sign_up("Ada@Example.com", "secret1")?;
        assert_eq!(me.email, "ada@example.com");
        assert_eq!(identity.current()?, Some(me));
        assert_eq!(
            failure(identity.sign_up("ada@example.com", "another")),
            AuthFailure::EmailAlreadyInUse
        );
        Ok(())
    }

    #[test]
    fn sign_in_checks_the_password() -> Result<()> {
        let fx = fixture();
        let identity = LocalIdentity::new(fx.backend.clone());
        identity.sign_up("ada@example.com", "secret1")?;
        identity.sign_out()?;
        assert_eq!(identity.current()?, None);

        assert_eq!(failure(identity.sign_in("bob@example.com", "secret1")), AuthFailure::UserNotFound);
        assert_eq!(failure(identity.sign_in("ada@example.com", "wrong!")), AuthFailure::WrongPassword);
        let me = identity.sign_in("ada@example.com", "secret1")?;

        // a second handle over the same backend sees the persisted session
        assert_eq!(LocalIdentity::new(fx.backend.clone()).current()?, Some(me));
        Ok(())
    }

    #[test]
    fn subscribers_see_current_state_then_changes() -> Result<()> {
        let fx = fixture();
        let identity = LocalIdentity::new(fx.backend.clone());
        let seen: Rc<RefCell<Vec<Option<String>>>> = Rc::default();

        let sink = seen.clone();
        let id = identity.subscribe(Box::new(move |who| {
            sink.borrow_mut().push(who.map(|i| i.email.clone()));
        }))?;
        identity.sign_up("ada@example.com", "secret1")?;
        identity.sign_out()?;
        identity.unsubscribe(id);
        identity.sign_in("ada@example.com", "secret1")?;

        assert_eq!(
            *seen.borrow(),
            vec![None, Some("ada@example.com".to_string()), None]
        );
        Ok(())
    }

    #[test]
    fn listeners_may_unsubscribe_while_notified() -> Result<()> {
        let fx = fixture();
        let identity = Rc::new(LocalIdentity::new(fx.backend.clone()));
        let own_id: Rc<Cell<Option<ListenerId>>> = Rc::default();
        let sign_ins = Rc::new(Cell::new(0));

        let handle: Weak<LocalIdentity> = Rc::downgrade(&identity);
        let (slot, count) = (own_id.clone(), sign_ins.clone());
        let id = identity.subscribe(Box::new(move |who| {
            if who.is_none() {
                return;
            }
            count.set(count.get() + 1);
            if let (Some(identity), Some(id)) = (handle.upgrade(), slot.get()) {
                identity.unsubscribe(id);
            }
        }))?;
        own_id.set(Some(id));

        identity.sign_up("ada@example.com", "secret1")?;
        identity.sign_out()?;
        identity.sign_in("ada@example.com", "secret1")?;

        assert_eq!(sign_ins.get(), 1);
        assert!(identity.listeners.borrow().is_empty());
        Ok(())
    }

    #[test]
    fn password_reset_requires_a_known_address() -> Result<()> {
        let fx = fixture();
        let identity = LocalIdentity::new(fx.backend.clone());
        identity.sign_up("ada@example.com", "secret1")?;

        identity.send_password_reset("ADA@example.com")?;
        let requests = fx
            .backend
            .store()
            .query(Collection::PasswordResets, &Query::new().eq("email", "ada@example.com"))?;
        assert_eq!(requests.len(), 1);
        assert!(matches!(
            identity.send_password_reset("bob@example.com"),
            Err(Error::Auth(AuthFailure::UserNotFound))
        ));
        Ok(())
    }
}
