//! Address handling for the individual-chat addresses the transport uses.

use crate::error::SessionError;

pub const INDIVIDUAL_SUFFIX: &str = "@s.whatsapp.net";
const LEGACY_INDIVIDUAL_SUFFIX: &str = "@c.us";
const SHARED_SUFFIXES: [&str; 3] = ["@g.us", "@broadcast", "@newsletter"];

const MIN_DIGITS: usize = 8;
const MAX_DIGITS: usize = 15;

/// Group, broadcast-list and channel addresses.
pub fn is_shared_address(address: &str) -> bool {
    SHARED_SUFFIXES
        .iter()
        .any(|suffix| address.ends_with(suffix))
}

/// Bare digits of an individual address, with device suffix and domain stripped.
///
/// ```
/// use gsm_core::sender_digits;
///
/// assert_eq!(sender_digits("5511999999999:12@s.whatsapp.net").as_deref(), Some("5511999999999"));
/// assert_eq!(sender_digits("120363025@g.us"), None);
/// ```
pub fn sender_digits(address: &str) -> Option<String> {
    if is_shared_address(address) {
        return None;
    }
    let local = address.split('@').next().unwrap_or_default();
    let user = local.split(':').next().unwrap_or_default();
    (!user.is_empty() && user.chars().all(|c| c.is_ascii_digit())).then(|| user.to_string())
}

/// Turns a caller-supplied destination into the transport's individual address.
///
/// Accepts E.164-style numbers with `+`, spaces, dashes or parentheses, and
/// individual addresses. Shared addresses are rejected.
pub fn normalize_outbound_address(raw: &str) -> Result<String, SessionError> {
    let invalid = || SessionError::InvalidAddress(raw.to_string());
    let trimmed = raw.trim();
    if trimmed.is_empty() || is_shared_address(trimmed) {
        return Err(invalid());
    }

    let digits = if let Some((user, domain)) = trimmed.split_once('@') {
        let domain = format!("@{domain}");
        if domain != INDIVIDUAL_SUFFIX && domain != LEGACY_INDIVIDUAL_SUFFIX {
            return Err(invalid());
        }
        let user = user.split(':').next().unwrap_or_default();
        if !user.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }
        user.to_string()
    } else {
        let body = trimmed.strip_prefix('+').unwrap_or(trimmed);
        if !body
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '(' | ')'))
        {
            return Err(invalid());
        }
        body.chars().filter(char::is_ascii_digit).collect()
    };

    if !(MIN_DIGITS..=MAX_DIGITS).contains(&digits.len()) {
        return Err(invalid());
    }
    Ok(format!("{digits}{INDIVIDUAL_SUFFIX}"))
}
