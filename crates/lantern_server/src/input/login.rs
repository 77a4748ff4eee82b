//! The login and account creation dialog.

use super::prompt::{
    default_validator, prompt_handler, validate_email, validate_new_entry, validate_password,
    validate_password_verify, validate_username, PromptStep, Results, PASSWORD_NEW, PASSWORD_NEW_VERIFY,
};
use super::{Disconnect, InputHandler, SessionContext, SharedState};
use crate::error::AccountError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use lantern_event_system::LoginCompleted;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

pub const USERNAME: &str = "username";
pub const USERNAME_NEW: &str = "username-new";
pub const PASSWORD: &str = "password";
pub const EMAIL: &str = "email";

/// Name, password and email requirements for new accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoginRules {
    pub name_min: usize,
    pub name_max: usize,
    pub password_min: usize,
    pub password_max: usize,
    pub email_required: bool,
    /// Sent once before the first prompt
    pub banner: String,
}

impl Default for LoginRules {
    fn default() -> Self {
        Self {
            name_min: 2,
            name_max: 16,
            password_min: 4,
            password_max: 16,
            email_required: false,
            banner: "Welcome to Lantern!\n\n".to_string(),
        }
    }
}

/// Who logged in, recorded on the shared state when the dialog succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub username: String,
    pub new_account: bool,
}

/// Where accounts live. Persistence is up to the implementation.
pub trait AccountStore: Send + Sync {
    fn exists(&self, username: &str) -> bool;

    /// True when the account exists and the password matches.
    fn verify(&self, username: &str, password: &str) -> bool;

    fn create(&self, username: &str, password: &str, email: Option<&str>) -> Result<(), AccountError>;
}

#[derive(Debug, Clone)]
struct Account {
    password: String,
    email: Option<String>,
}

/// Process-local accounts keyed by lowercased name. Nothing is written to
/// disk; used by the standalone server and by tests.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: DashMap<String, Account>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    pub fn email(&self, username: &str) -> Option<String> {
        self.accounts.get(&username.to_lowercase())?.email.clone()
    }
}

impl AccountStore for MemoryAccountStore {
    fn exists(&self, username: &str) -> bool {
        self.accounts.contains_key(&username.to_lowercase())
    }

    fn verify(&self, username: &str, password: &str) -> bool {
        self.accounts
            .get(&username.to_lowercase())
            .is_some_and(|account| account.password == password)
    }

    fn create(&self, username: &str, password: &str, email: Option<&str>) -> Result<(), AccountError> {
        match self.accounts.entry(username.to_lowercase()) {
            Entry::Occupied(_) => Err(AccountError::UsernameTaken(username.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Account {
                    password: password.to_string(),
                    email: email.map(str::to_string),
                });
                Ok(())
            }
        }
    }
}

fn is_new(results: &Results) -> bool {
    results.get(USERNAME).map(String::as_str) == Some("new")
}

/// The username/password dialog, with a sign-up branch when the player
/// answers `new`.
pub fn login_steps(rules: &LoginRules, accounts: Arc<dyn AccountStore>) -> Vec<PromptStep> {
    let entry_rules = rules.clone();
    let name_rules = rules.clone();
    let password_rules = rules.clone();
    let email_rules = rules.clone();

    let email_prompt = if rules.email_required {
        "Email address: "
    } else {
        "Email address (optional): "
    };

    vec![
        PromptStep::new(USERNAME, "Username (or \"new\"): ")
            .validator(move |input, _| validate_new_entry(input, &entry_rules)),
        PromptStep::new(USERNAME_NEW, "Choose a username: ")
            .condition(is_new)
            .validator(move |input, _| {
                let name = validate_username(input, &name_rules)?;
                if accounts.exists(&name) {
                    return Err(format!("{} is already taken", name));
                }
                Ok(name)
            }),
        PromptStep::new(PASSWORD, "Password: ")
            .condition(|r| !is_new(r))
            .masked()
            .validator(default_validator),
        PromptStep::new(PASSWORD_NEW, "Choose a password: ")
            .condition(is_new)
            .masked()
            .validator(move |input, _| validate_password(input, &password_rules)),
        PromptStep::new(PASSWORD_NEW_VERIFY, "Confirm password: ")
            .condition(is_new)
            .masked()
            .validator(validate_password_verify),
        PromptStep::new(EMAIL, email_prompt)
            .condition(is_new)
            .validator(move |input, _| validate_email(input, &email_rules)),
    ]
}

/// Checks or creates the account once every answer is in.
pub fn complete_login(results: &Results, shared: &mut SharedState) -> bool {
    let accounts = shared.context.accounts.clone();
    let id = shared.connection_id();

    let outcome = if is_new(results) {
        let username = results.get(USERNAME_NEW).cloned().unwrap_or_default();
        let password = results.get(PASSWORD_NEW).map(String::as_str).unwrap_or_default();
        let email = results.get(EMAIL).map(String::as_str).filter(|e| !e.is_empty());

        if let Err(e) = accounts.create(&username, password, email) {
            warn!("Account creation for connection {} failed: {}", id, e);
            shared.send(format!("Could not create account: {}\n", e));
            shared.send(b"Oops, bye!\n".to_vec());
            shared.request_disconnect(Disconnect::Remove);
            return false;
        }
        info!("🆕 Account {} created by connection {}", username, id);
        LoginOutcome {
            username,
            new_account: true,
        }
    } else {
        let username = results.get(USERNAME).cloned().unwrap_or_default();
        let password = results.get(PASSWORD).map(String::as_str).unwrap_or_default();

        if !accounts.verify(&username, password) {
            warn!("Failed login for {} on connection {}", username, id);
            shared.send(b"Oops, bye!\n".to_vec());
            shared.request_disconnect(Disconnect::Remove);
            return false;
        }
        LoginOutcome {
            username,
            new_account: false,
        }
    };

    info!("🔑 {} logged in on connection {}", outcome.username, id);
    shared.send(format!("Welcome, {}!\n", outcome.username));
    shared.emit(LoginCompleted {
        connection_id: id,
        username: outcome.username.clone(),
        new_account: outcome.new_account,
    });
    shared.login = Some(outcome);
    true
}

/// The `login` handler for a session.
pub fn login_handler(context: &SessionContext) -> InputHandler {
    let steps = login_steps(&context.login_rules, context.accounts.clone());
    prompt_handler(steps, Arc::new(complete_login))
}
