//! Recipient addresses in the messaging network's `user@server` format.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// A parsed recipient address.
///
/// Callers usually send a bare phone number (`"5511999999999"` or
/// `"+55 11..."` without spaces), which maps to the default user server.
/// Group chats and other servers are addressed explicitly:
/// `"120363000000000000@g.us"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    user: String,
    server: String,
}

impl Address {
    /// Server used when the caller passes a bare phone number.
    pub const DEFAULT_USER_SERVER: &'static str = "s.whatsapp.net";

    /// Parses a recipient address.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidAddress`] for empty input,
    /// embedded whitespace, more than one `@`, an empty user or server
    /// part, or a bare number containing non-digits.
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(invalid(input, "address is empty"));
        }
        if input.chars().any(char::is_whitespace) {
            return Err(invalid(input, "address contains whitespace"));
        }

        match input.split_once('@') {
            Some((user, server)) => {
                if server.contains('@') {
                    return Err(invalid(input, "more than one '@'"));
                }
                if user.is_empty() || server.is_empty() {
                    return Err(invalid(input, "empty user or server"));
                }
                if !user.chars().all(is_user_char) {
                    return Err(invalid(input, "unexpected character in user"));
                }
                Ok(Self {
                    user: user.to_string(),
                    server: server.to_ascii_lowercase(),
                })
            }
            None => {
                let digits = input.strip_prefix('+').unwrap_or(input);
                if digits.is_empty()
                    || !digits.chars().all(|c| c.is_ascii_digit())
                {
                    return Err(invalid(
                        input,
                        "phone number must contain only digits",
                    ));
                }
                Ok(Self {
                    user: digits.to_string(),
                    server: Self::DEFAULT_USER_SERVER.to_string(),
                })
            }
        }
    }

    /// The user part (phone number, group id, ...).
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The server part.
    pub fn server(&self) -> &str {
        &self.server
    }
}

fn is_user_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '-' | '_')
}

fn invalid(input: &str, reason: &str) -> ProtocolError {
    ProtocolError::InvalidAddress(format!("{reason}: {input:?}"))
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.server)
    }
}

impl FromStr for Address {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Address {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.to_string()
    }
}
