//! Input rules for login names, emails and passwords.

use super::AuthError;
use crate::models::auth::normalize_email;

pub const LOGIN_NAME_MIN: usize = 2;
pub const LOGIN_NAME_MAX: usize = 24;
pub const EMAIL_MAX: usize = 100;
pub const PASSWORD_MIN: usize = 8;
/// bcrypt ignores everything past 72 bytes.
pub const PASSWORD_MAX_BYTES: usize = 72;

/// Longest seed taken from an email local part, leaving room for a
/// `_xxxxxxxx` suffix inside [`LOGIN_NAME_MAX`].
const SEED_MAX: usize = 15;

/// How a sign-in identifier was interpreted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginIdentifier {
    /// Normalized email address.
    Email(String),
    LoginName(String),
}

impl LoginIdentifier {
    /// Email if it parses as one, otherwise a login name if it matches the
    /// login-name pattern. `None` when it is neither.
    pub fn classify(input: &str) -> Option<Self> {
        let input = input.trim();
        if is_valid_email(input) {
            Some(LoginIdentifier::Email(normalize_email(input)))
        } else if is_valid_login_name(input) {
            Some(LoginIdentifier::LoginName(input.to_string()))
        } else {
            None
        }
    }
}

fn is_login_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '_'
}

/// 2 to 24 characters from `[A-Za-z0-9._]`.
pub fn is_valid_login_name(name: &str) -> bool {
    (LOGIN_NAME_MIN..=LOGIN_NAME_MAX).contains(&name.len()) && name.chars().all(is_login_name_char)
}

/// Bare `local@domain` address of at most 100 bytes.
pub fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || email.len() > EMAIL_MAX {
        return false;
    }
    let Some((local, domain)) = email.rsplit_once('@') else {
        return false;
    };
    is_valid_local_part(local) && is_valid_domain(domain)
}

fn is_valid_local_part(local: &str) -> bool {
    const SPECIALS: &str = "!#$%&'*+-/=?^_`{|}~.";
    !local.is_empty()
        && local.len() <= 64
        && !local.starts_with('.')
        && !local.ends_with('.')
        && !local.contains("..")
        && local
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || SPECIALS.contains(c))
}

fn is_valid_domain(domain: &str) -> bool {
    !domain.is_empty()
        && domain.split('.').all(|label| {
            !label.is_empty()
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

pub fn validate_login_name(name: &str) -> Result<(), AuthError> {
    if is_valid_login_name(name) {
        Ok(())
    } else {
        Err(AuthError::Validation(format!(
            "login name must be {LOGIN_NAME_MIN}-{LOGIN_NAME_MAX} characters of letters, digits, '.' or '_'"
        )))
    }
}

pub fn validate_email(email: &str) -> Result<(), AuthError> {
    if is_valid_email(email) {
        Ok(())
    } else {
        Err(AuthError::Validation("invalid email address".into()))
    }
}

/// At least 8 characters with a lowercase letter, an uppercase letter, a
/// digit and a symbol.
pub fn validate_password(password: &str) -> Result<(), AuthError> {
    let weak = |what: &str| Err(AuthError::Validation(format!("password must {what}")));

    if password.chars().count() < PASSWORD_MIN {
        return weak("be at least 8 characters");
    }
    if password.len() > PASSWORD_MAX_BYTES {
        return weak("be at most 72 bytes");
    }
    if !password.chars().any(|c| c.is_ascii_lowercase()) {
        return weak("contain a lowercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_uppercase()) {
        return weak("contain an uppercase letter");
    }
    if !password.chars().any(|c| c.is_ascii_digit()) {
        return weak("contain a digit");
    }
    if password.chars().all(|c| c.is_ascii_alphanumeric()) {
        return weak("contain a symbol");
    }
    Ok(())
}

/// Login-name base derived from an email's local part, for principals
/// created from an external identity.
pub fn login_name_seed(email: &str) -> String {
    let local = email.split('@').next().unwrap_or_default();
    let seed: String = local
        .chars()
        .filter(|c| is_login_name_char(*c))
        .take(SEED_MAX)
        .collect();
    if seed.len() < LOGIN_NAME_MIN {
        "user".to_string()
    } else {
        seed
    }
}
