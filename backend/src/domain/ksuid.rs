//! Sortable unique identifiers.
//!
//! A [`Ksuid`] packs a 4-byte big-endian timestamp (seconds since
//! [`EPOCH`]) and 16 random bytes. Its text form is always 27 base62
//! characters, zero padded, so string order and byte order agree and the
//! identifier can be used directly as a storage sort-key suffix.

use std::fmt;
use std::str::FromStr;

use mockable::{Clock, DefaultClock};
use rand::RngCore;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use super::Error;

/// Custom epoch in Unix seconds (2014-05-13T16:53:20Z).
pub const EPOCH: i64 = 1_400_000_000;
/// Length of the encoded form.
pub const ENCODED_LEN: usize = 27;

const TIMESTAMP_LEN: usize = 4;
const PAYLOAD_LEN: usize = 16;
const BYTE_LEN: usize = TIMESTAMP_LEN + PAYLOAD_LEN;
const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Decoding failures for [`Ksuid`] strings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KsuidError {
    /// Input was not exactly [`ENCODED_LEN`] characters.
    #[error("identifier must be {ENCODED_LEN} characters, got {length}")]
    InvalidLength { length: usize },
    /// Input contained a character outside the base62 alphabet.
    #[error("identifier contains non-base62 character {character:?}")]
    InvalidCharacter { character: char },
    /// Input decodes to more than 20 bytes.
    #[error("identifier value exceeds 20 bytes")]
    Overflow,
}

impl From<KsuidError> for Error {
    fn from(err: KsuidError) -> Self {
        Self::malformed_identifier(err.to_string())
    }
}

/// 20-byte time-sortable identifier.
///
/// # Examples
/// ```
/// use gateway::domain::Ksuid;
///
/// let id = Ksuid::from_parts(0, [0; 16]);
/// assert_eq!(id.to_string(), "000000000000000000000000000");
/// let parsed: Ksuid = id.to_string().parse().expect("valid identifier");
/// assert_eq!(parsed, id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ksuid([u8; BYTE_LEN]);

impl Ksuid {
    /// Fresh identifier from the system clock and thread-local randomness.
    pub fn new() -> Self {
        Self::generate(&DefaultClock, &mut rand::thread_rng())
    }

    /// Fresh identifier from the supplied clock and random source.
    pub fn generate<R: RngCore + ?Sized>(clock: &dyn Clock, rng: &mut R) -> Self {
        let seconds = clock.utc().timestamp().saturating_sub(EPOCH);
        let timestamp = u32::try_from(seconds.max(0)).unwrap_or(u32::MAX);
        let mut payload = [0_u8; PAYLOAD_LEN];
        rng.fill_bytes(&mut payload);
        Self::from_parts(timestamp, payload)
    }

    /// Assemble an identifier from its epoch-relative timestamp and payload.
    pub fn from_parts(timestamp: u32, payload: [u8; PAYLOAD_LEN]) -> Self {
        let mut bytes = [0_u8; BYTE_LEN];
        let (head, tail) = bytes.split_at_mut(TIMESTAMP_LEN);
        head.copy_from_slice(&timestamp.to_be_bytes());
        tail.copy_from_slice(&payload);
        Self(bytes)
    }

    /// Seconds since [`EPOCH`] at creation.
    pub fn timestamp(&self) -> u32 {
        let [a, b, c, d, ..] = self.0;
        u32::from_be_bytes([a, b, c, d])
    }

    /// Creation time as Unix seconds.
    pub fn unix_seconds(&self) -> i64 {
        EPOCH + i64::from(self.timestamp())
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; BYTE_LEN] {
        &self.0
    }

    /// Fixed-width base62 form.
    pub fn encode(&self) -> String {
        let mut out = [ALPHABET[0]; ENCODED_LEN];
        let mut digits: Vec<u32> = self.0.iter().map(|b| u32::from(*b)).collect();
        let mut slots = out.iter_mut().rev();
        while !digits.is_empty() {
            let (quotient, remainder) = divide(&digits, 256, 62);
            let symbol = usize::try_from(remainder)
                .ok()
                .and_then(|index| ALPHABET.get(index));
            if let (Some(slot), Some(symbol)) = (slots.next(), symbol) {
                *slot = *symbol;
            }
            digits = quotient;
        }
        out.iter().map(|b| char::from(*b)).collect()
    }

    /// Parse the fixed-width base62 form.
    pub fn decode(text: &str) -> Result<Self, KsuidError> {
        let length = text.chars().count();
        if length != ENCODED_LEN {
            return Err(KsuidError::InvalidLength { length });
        }
        let mut digits = text
            .chars()
            .map(digit_value)
            .collect::<Result<Vec<u32>, _>>()?;
        let mut bytes = [0_u8; BYTE_LEN];
        let mut slots = bytes.iter_mut().rev();
        while !digits.is_empty() {
            let (quotient, remainder) = divide(&digits, 62, 256);
            let slot = slots.next().ok_or(KsuidError::Overflow)?;
            *slot = u8::try_from(remainder).map_err(|_| KsuidError::Overflow)?;
            digits = quotient;
        }
        Ok(Self(bytes))
    }
}

/// Long division of a big-endian digit string, dropping leading zeros.
fn divide(digits: &[u32], from_base: u32, divisor: u32) -> (Vec<u32>, u32) {
    let mut quotient = Vec::with_capacity(digits.len());
    let mut remainder = 0_u32;
    for digit in digits {
        let acc = remainder * from_base + digit;
        let q = acc / divisor;
        remainder = acc % divisor;
        if !quotient.is_empty() || q != 0 {
            quotient.push(q);
        }
    }
    (quotient, remainder)
}

fn digit_value(character: char) -> Result<u32, KsuidError> {
    let value = match character {
        '0'..='9' => u32::from(character) - u32::from('0'),
        'A'..='Z' => u32::from(character) - u32::from('A') + 10,
        'a'..='z' => u32::from(character) - u32::from('a') + 36,
        _ => return Err(KsuidError::InvalidCharacter { character }),
    };
    Ok(value)
}

impl fmt::Display for Ksuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Ksuid {
    type Err = KsuidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for Ksuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Ksuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::decode(&text).map_err(serde::de::Error::custom)
    }
}
