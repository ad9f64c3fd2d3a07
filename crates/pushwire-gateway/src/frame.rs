//! Binary notification frames.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! [command=2 u8][body length u32][body]
//! body = item*5, item = [id u8][length u16][value]
//!   1 device token   32 bytes
//!   2 payload        JSON
//!   3 identifier     u32
//!   4 expiry         u32 Unix seconds
//!   5 priority       u8
//! ```

use std::time::Duration;

use bytes::{Buf, BufMut, BytesMut};
use chrono::Utc;
use rand::Rng;

use crate::errors::{DecodeError, EncodingError};
use crate::payload::NotificationPayload;
use crate::token::{DeviceToken, TOKEN_LEN};

/// Envelope marker for notification frames.
pub const FRAME_COMMAND: u8 = 2;
/// Envelope header: marker plus 32-bit length.
pub const ENVELOPE_HEADER_LEN: usize = 5;
/// Item header: id plus 16-bit length.
pub const ITEM_HEADER_LEN: usize = 3;
/// Largest payload an item can carry.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;
/// Priority sent with every notification (immediate delivery).
pub const DEFAULT_PRIORITY: u8 = 10;
/// Default time-to-live for undelivered notifications.
pub const DEFAULT_EXPIRY_TTL: Duration = Duration::from_secs(86_400);
/// Identifiers are drawn from this range.
pub const IDENTIFIER_RANGE: std::ops::RangeInclusive<u32> = 1..=9999;

/// Item ids.
pub mod item {
    /// Device token.
    pub const DEVICE_TOKEN: u8 = 1;
    /// JSON payload.
    pub const PAYLOAD: u8 = 2;
    /// Notification identifier.
    pub const IDENTIFIER: u8 = 3;
    /// Expiration date.
    pub const EXPIRY: u8 = 4;
    /// Priority.
    pub const PRIORITY: u8 = 5;
}

/// Draw a notification identifier.
pub fn random_identifier() -> u32 {
    rand::rng().random_range(IDENTIFIER_RANGE)
}

/// An encoded frame ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationFrame {
    bytes: Vec<u8>,
    token: DeviceToken,
    identifier: u32,
    expiry: u32,
}

impl NotificationFrame {
    /// Wire bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Device token carried in item 1.
    pub const fn token(&self) -> &DeviceToken {
        &self.token
    }

    /// Identifier carried in item 3.
    pub const fn identifier(&self) -> u32 {
        self.identifier
    }

    /// Expiry carried in item 4.
    pub const fn expiry(&self) -> u32 {
        self.expiry
    }

    /// Total frame length.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the frame is empty (never true for an encoded frame).
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Builds notification frames.
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    expiry_ttl: Duration,
    priority: u8,
}

impl Default for FrameEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY_TTL)
    }
}

impl FrameEncoder {
    /// Encoder with the given expiry TTL.
    pub const fn new(expiry_ttl: Duration) -> Self {
        Self {
            expiry_ttl,
            priority: DEFAULT_PRIORITY,
        }
    }

    /// Configured expiry TTL.
    pub const fn expiry_ttl(&self) -> Duration {
        self.expiry_ttl
    }

    /// Encode a notification with a random identifier and `now + ttl` expiry.
    pub fn encode(
        &self,
        token: &str,
        payload: &NotificationPayload,
    ) -> Result<NotificationFrame, EncodingError> {
        self.encode_as(token, payload, random_identifier())
    }

    /// Encode a notification under `identifier` with `now + ttl` expiry.
    pub fn encode_as(
        &self,
        token: &str,
        payload: &NotificationPayload,
        identifier: u32,
    ) -> Result<NotificationFrame, EncodingError> {
        let token = DeviceToken::parse(token)?;
        let json = payload.to_json()?;
        self.encode_with(&token, &json, identifier, self.expiry_from_now()?)
    }

    /// Expiry timestamp for a frame built now.
    pub fn expiry_from_now(&self) -> Result<u32, EncodingError> {
        let ttl = i64::try_from(self.expiry_ttl.as_secs()).unwrap_or(i64::MAX);
        let expiry = Utc::now().timestamp().saturating_add(ttl);
        u32::try_from(expiry).map_err(|_| EncodingError::ExpiryOutOfRange(expiry))
    }

    /// Encode with explicit identifier and expiry.
    #[allow(clippy::cast_possible_truncation)]
    pub fn encode_with(
        &self,
        token: &DeviceToken,
        payload_json: &[u8],
        identifier: u32,
        expiry: u32,
    ) -> Result<NotificationFrame, EncodingError> {
        if payload_json.len() > MAX_PAYLOAD_LEN {
            return Err(EncodingError::PayloadTooLarge {
                len: payload_json.len(),
                max: MAX_PAYLOAD_LEN,
            });
        }

        let body_len = ITEM_HEADER_LEN * 5 + TOKEN_LEN + payload_json.len() + 4 + 4 + 1;
        let mut buf = BytesMut::with_capacity(ENVELOPE_HEADER_LEN + body_len);

        buf.put_u8(FRAME_COMMAND);
        // Bounded by MAX_PAYLOAD_LEN plus fixed items.
        buf.put_u32(body_len as u32);

        put_item(&mut buf, item::DEVICE_TOKEN, token.as_bytes());
        put_item(&mut buf, item::PAYLOAD, payload_json);
        put_item(&mut buf, item::IDENTIFIER, &identifier.to_be_bytes());
        put_item(&mut buf, item::EXPIRY, &expiry.to_be_bytes());
        put_item(&mut buf, item::PRIORITY, &[self.priority]);

        debug_assert_eq!(buf.len(), ENVELOPE_HEADER_LEN + body_len);

        Ok(NotificationFrame {
            bytes: buf.to_vec(),
            token: *token,
            identifier,
            expiry,
        })
    }
}

#[allow(clippy::cast_possible_truncation)]
fn put_item(buf: &mut BytesMut, id: u8, value: &[u8]) {
    buf.put_u8(id);
    buf.put_u16(value.len() as u16);
    buf.put_slice(value);
}

/// Items recovered from a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    /// Device token.
    pub token: DeviceToken,
    /// Raw payload JSON.
    pub payload: Vec<u8>,
    /// Notification identifier.
    pub identifier: u32,
    /// Expiry timestamp.
    pub expiry: u32,
    /// Priority byte.
    pub priority: u8,
}

/// Parse a complete notification frame.
pub fn decode_frame(mut bytes: &[u8]) -> Result<DecodedFrame, DecodeError> {
    ensure(bytes, ENVELOPE_HEADER_LEN)?;
    let command = bytes.get_u8();
    if command != FRAME_COMMAND {
        return Err(DecodeError::UnexpectedCommand {
            expected: FRAME_COMMAND,
            actual: command,
        });
    }
    let declared = bytes.get_u32() as usize;
    if declared != bytes.len() {
        return Err(DecodeError::LengthMismatch {
            declared,
            actual: bytes.len(),
        });
    }

    let mut token = None;
    let mut payload = None;
    let mut identifier = None;
    let mut expiry = None;
    let mut priority = None;

    while bytes.has_remaining() {
        ensure(bytes, ITEM_HEADER_LEN)?;
        let id = bytes.get_u8();
        let len = bytes.get_u16() as usize;
        ensure(bytes, len)?;
        let (value, rest) = bytes.split_at(len);
        bytes = rest;

        match id {
            item::DEVICE_TOKEN => {
                let raw: [u8; TOKEN_LEN] = value.try_into().map_err(|_| DecodeError::MalformedItem {
                    id,
                    reason: "token must be 32 bytes",
                })?;
                set_once(&mut token, DeviceToken::from_bytes(raw), id)?;
            }
            item::PAYLOAD => set_once(&mut payload, value.to_vec(), id)?,
            item::IDENTIFIER => set_once(&mut identifier, read_u32(value, id)?, id)?,
            item::EXPIRY => set_once(&mut expiry, read_u32(value, id)?, id)?,
            item::PRIORITY => {
                let [p] = value else {
                    return Err(DecodeError::MalformedItem {
                        id,
                        reason: "priority must be 1 byte",
                    });
                };
                set_once(&mut priority, *p, id)?;
            }
            _ => {
                return Err(DecodeError::MalformedItem {
                    id,
                    reason: "unknown item id",
                });
            }
        }
    }

    Ok(DecodedFrame {
        token: token.ok_or(missing(item::DEVICE_TOKEN))?,
        payload: payload.ok_or(missing(item::PAYLOAD))?,
        identifier: identifier.ok_or(missing(item::IDENTIFIER))?,
        expiry: expiry.ok_or(missing(item::EXPIRY))?,
        priority: priority.ok_or(missing(item::PRIORITY))?,
    })
}

fn ensure(bytes: &[u8], needed: usize) -> Result<(), DecodeError> {
    if bytes.len() < needed {
        return Err(DecodeError::Truncated {
            needed,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn read_u32(value: &[u8], id: u8) -> Result<u32, DecodeError> {
    let raw: [u8; 4] = value.try_into().map_err(|_| DecodeError::MalformedItem {
        id,
        reason: "expected 4 bytes",
    })?;
    Ok(u32::from_be_bytes(raw))
}

fn set_once<T>(slot: &mut Option<T>, value: T, id: u8) -> Result<(), DecodeError> {
    if slot.replace(value).is_some() {
        return Err(DecodeError::MalformedItem {
            id,
            reason: "repeated item",
        });
    }
    Ok(())
}

const fn missing(id: u8) -> DecodeError {
    DecodeError::MalformedItem {
        id,
        reason: "missing item",
    }
}
