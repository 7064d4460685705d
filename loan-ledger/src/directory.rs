//! Borrower directory
//!
//! User records with role and verification state. Credentials are hashed by
//! the auth layer before they reach this module.

use library_core::{
    storage::{Repositories, UserRepository},
    Address, Caller, Clock, Error, Result, Role, User, UserId,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};
use tracing::info;
use validator::Validate;

/// Registration request
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewUser {
    /// Display name
    #[validate(length(min = 1, max = 50, message = "name must be 1-50 characters"))]
    pub name: String,

    /// Email, stored lower-cased
    #[validate(length(min = 3, max = 254))]
    pub email: String,

    /// Phone number
    pub phone: String,

    /// Opaque credential hash
    #[validate(length(min = 1, message = "credential hash is required"))]
    pub password_hash: String,

    /// Postal address
    pub address: Address,

    /// Requested role; defaults to USER
    pub role: Option<Role>,
}

fn email_format() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("valid email regex")
    })
}

fn phone_format() -> &'static Regex {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    PHONE.get_or_init(|| {
        Regex::new(r"^(\+91[\-\s]?)?0?[6-9]\d{9}$").expect("valid phone regex")
    })
}

impl NewUser {
    fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::Validation(e.to_string()))?;

        if self.name.trim().is_empty() {
            return Err(Error::Validation("Name is required".to_string()));
        }
        if !email_format().is_match(self.email.trim()) {
            return Err(Error::Validation(format!("Invalid email format: {}", self.email)));
        }
        if !phone_format().is_match(self.phone.trim()) {
            return Err(Error::Validation(format!(
                "Invalid phone number format: {}",
                self.phone
            )));
        }

        let a = &self.address;
        let required = [
            ("country", &a.country),
            ("state", &a.state),
            ("city", &a.city),
            ("pincode", &a.pincode),
            ("address line 1", &a.line1),
        ];
        if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
            return Err(Error::Validation(format!("Address {} is required", field)));
        }

        if self.role == Some(Role::Admin) {
            return Err(Error::Validation("Admin cannot register".to_string()));
        }
        Ok(())
    }
}

/// User records consumed by the ledger
#[derive(Clone)]
pub struct BorrowerDirectory {
    users: Arc<dyn UserRepository>,
    clock: Arc<dyn Clock>,
}

impl BorrowerDirectory {
    /// Create directory
    pub fn new(repos: &Repositories, clock: Arc<dyn Clock>) -> Self {
        Self {
            users: repos.users.clone(),
            clock,
        }
    }

    /// Register an unverified user
    pub async fn register(&self, input: NewUser) -> Result<User> {
        input.check()?;

        let now = self.clock.now();
        let trim_opt = |s: Option<String>| {
            s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };
        let address = Address {
            country: input.address.country.trim().to_string(),
            state: input.address.state.trim().to_string(),
            city: input.address.city.trim().to_string(),
            pincode: input.address.pincode.trim().to_string(),
            line1: input.address.line1.trim().to_string(),
            line2: trim_opt(input.address.line2),
        };

        let user = User {
            id: UserId::new(),
            name: input.name.trim().to_string(),
            email: input.email.trim().to_lowercase(),
            phone: input.phone.trim().to_string(),
            password_hash: input.password_hash,
            address,
            role: input.role.unwrap_or(Role::User),
            verified: false,
            created_at: now,
            updated_at: now,
        };

        self.users.insert(user.clone()).await?;

        info!(user_id = %user.id, email = %user.email, role = %user.role, "User registered");
        Ok(user)
    }

    /// User by id
    pub async fn find_by_id(&self, id: UserId) -> Result<User> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("User {}", id)))
    }

    /// User by email, case-insensitive
    pub async fn find_by_email(&self, email: &str) -> Result<User> {
        let email = email.trim().to_lowercase();
        self.users
            .find_by_email(&email)
            .await?
            .ok_or_else(|| Error::NotFound(format!("User with email {}", email)))
    }

    /// Record the outcome of the auth layer's verification flow
    pub async fn set_verified(&self, id: UserId, verified: bool) -> Result<User> {
        let mut user = self.find_by_id(id).await?;
        if user.verified == verified {
            return Ok(user);
        }
        user.verified = verified;
        user.updated_at = self.clock.now();
        self.users.update(user.clone()).await?;

        info!(user_id = %user.id, verified, "Verification state changed");
        Ok(user)
    }

    /// Change a user's role. Admin only; nobody is promoted to admin here.
    pub async fn set_role(&self, caller: &Caller, id: UserId, role: Role) -> Result<User> {
        caller.require_admin()?;
        if role == Role::Admin {
            return Err(Error::Forbidden("Admin role cannot be granted".to_string()));
        }

        let mut user = self.find_by_id(id).await?;
        user.role = role;
        user.updated_at = self.clock.now();
        self.users.update(user.clone()).await?;

        info!(user_id = %user.id, role = %role, changed_by = %caller.id, "Role changed");
        Ok(user)
    }

    /// Record of the staff member behind `caller`
    pub async fn resolve_staff(&self, caller: &Caller) -> Result<User> {
        caller.require_staff()?;
        self.find_by_id(caller.id).await
    }
}

impl std::fmt::Debug for BorrowerDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BorrowerDirectory").finish_non_exhaustive()
    }
}
