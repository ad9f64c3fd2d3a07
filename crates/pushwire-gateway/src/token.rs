//! Device tokens.
//!
//! A token is 32 raw bytes on the wire and a 64-character hex string
//! everywhere else.

use std::fmt;
use std::str::FromStr;

use data_encoding::{HEXLOWER, HEXLOWER_PERMISSIVE};

use crate::errors::EncodingError;

/// Raw token length in bytes.
pub const TOKEN_LEN: usize = 32;
/// Hex token length in characters.
pub const TOKEN_HEX_LEN: usize = TOKEN_LEN * 2;

/// Whether `token` can be delivered through this gateway.
///
/// True iff the token is exactly 64 hexadecimal characters (either case).
pub fn supports(token: &str) -> bool {
    token.len() == TOKEN_HEX_LEN && token.bytes().all(|b| b.is_ascii_hexdigit())
}

/// A validated 32-byte device token.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceToken([u8; TOKEN_LEN]);

impl DeviceToken {
    /// Parse a 64-character hex token.
    pub fn parse(hex: &str) -> Result<Self, EncodingError> {
        if !supports(hex) {
            return Err(invalid(hex));
        }
        let decoded = HEXLOWER_PERMISSIVE
            .decode(hex.as_bytes())
            .map_err(|_| invalid(hex))?;
        let bytes: [u8; TOKEN_LEN] = decoded.try_into().map_err(|_| invalid(hex))?;
        Ok(Self(bytes))
    }

    /// Build a token from raw bytes.
    pub const fn from_bytes(bytes: [u8; TOKEN_LEN]) -> Self {
        Self(bytes)
    }

    /// Raw token bytes, as written to the wire.
    pub const fn as_bytes(&self) -> &[u8; TOKEN_LEN] {
        &self.0
    }

    /// Lowercase hex form.
    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.0)
    }

    /// First eight hex characters, for logs.
    pub fn prefix(&self) -> String {
        HEXLOWER.encode(&self.0[..4])
    }
}

fn invalid(token: &str) -> EncodingError {
    EncodingError::InvalidToken {
        token: token.chars().take(TOKEN_HEX_LEN).collect(),
    }
}

impl FromStr for DeviceToken {
    type Err = EncodingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for DeviceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceToken({}…)", self.prefix())
    }
}
