use std::fmt;
use std::str::FromStr;

use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Length of the encoded unique segment of every identifier.
pub const ENCODED_LEN: usize = 27;

/// Separator placed between a caller prefix and the unique segment.
pub const DELIMITER: char = '-';

/// Raw payload: 4 timestamp bytes followed by 16 random bytes.
const RAW_LEN: usize = 20;
const TIMESTAMP_LEN: usize = 4;

/// Offset applied to unix seconds so the 32-bit counter lasts past 2106.
const EPOCH: i64 = 1_400_000_000;

/// Base62 digits in ASCII order, so string order matches numeric order.
const ALPHABET: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdError {
	#[error("identifier must be at least {ENCODED_LEN} characters, got {0}")]
	TooShort(usize),

	#[error("invalid character {0:?} in identifier")]
	InvalidCharacter(char),

	#[error("identifier value does not fit in 160 bits")]
	Overflow,
}

/// Unique, time-sortable identifier for credentials and activity log entries.
///
/// The unique segment is a 27 character base62 string encoding a big-endian
/// seconds counter followed by random bytes, so two ids sharing a prefix sort
/// by creation second. An optional prefix (e.g. `cred-`) is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Id(String);

impl Id {
	/// Generate a fresh identifier stamped with the current time.
	pub fn new() -> Self {
		Self(encode(&generate(chrono::Utc::now().timestamp())))
	}

	/// Generate a fresh identifier under `prefix`, e.g. `cred-2J...`.
	pub fn with_prefix(prefix: &str) -> Self {
		let mut out = String::with_capacity(prefix.len() + 1 + ENCODED_LEN);
		out.push_str(prefix);
		if !prefix.ends_with(DELIMITER) {
			out.push(DELIMITER);
		}
		out.push_str(&encode(&generate(chrono::Utc::now().timestamp())));
		Self(out)
	}

	/// Validate the trailing unique segment of `value` and rebuild the id,
	/// keeping whatever prefix precedes it.
	pub fn parse(value: &str) -> Result<Self, IdError> {
		if value.len() < ENCODED_LEN {
			return Err(IdError::TooShort(value.len()));
		}

		let split = value.len() - ENCODED_LEN;
		if !value.is_char_boundary(split) {
			let bad = value
				.char_indices()
				.find(|(i, c)| i + c.len_utf8() > split)
				.map_or(DELIMITER, |(_, c)| c);
			return Err(IdError::InvalidCharacter(bad));
		}

		let (prefix, unique) = value.split_at(split);
		let raw = decode(unique)?;
		Ok(Self(format!("{prefix}{}", encode(&raw))))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}

	/// Caller prefix including the delimiter, or `""` for unprefixed ids.
	pub fn prefix(&self) -> &str {
		&self.0[..self.0.len() - ENCODED_LEN]
	}

	pub fn unique_part(&self) -> &str {
		&self.0[self.0.len() - ENCODED_LEN..]
	}

	/// Unix seconds at which the id was generated.
	pub fn timestamp(&self) -> i64 {
		// Construction always goes through `encode`/`parse`, so this decodes.
		let raw = decode(self.unique_part()).unwrap_or([0; RAW_LEN]);
		let mut secs = [0u8; TIMESTAMP_LEN];
		secs.copy_from_slice(&raw[..TIMESTAMP_LEN]);
		i64::from(u32::from_be_bytes(secs)) + EPOCH
	}
}

impl Default for Id {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for Id {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl FromStr for Id {
	type Err = IdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::parse(s)
	}
}

impl TryFrom<String> for Id {
	type Error = IdError;

	fn try_from(value: String) -> Result<Self, Self::Error> {
		Self::parse(&value)
	}
}

impl From<Id> for String {
	fn from(id: Id) -> Self {
		id.0
	}
}

fn generate(unix_secs: i64) -> [u8; RAW_LEN] {
	let mut raw = [0u8; RAW_LEN];
	let secs = (unix_secs - EPOCH).clamp(0, i64::from(u32::MAX)) as u32;
	raw[..TIMESTAMP_LEN].copy_from_slice(&secs.to_be_bytes());
	rand::thread_rng().fill_bytes(&mut raw[TIMESTAMP_LEN..]);
	raw
}

fn encode(raw: &[u8; RAW_LEN]) -> String {
	let mut digits = [ALPHABET[0]; ENCODED_LEN];
	let mut num = *raw;
	let mut pos = ENCODED_LEN;

	// Long division by 62; 62^27 > 2^160 so `pos` never underflows.
	loop {
		let mut rem = 0u32;
		let mut is_zero = true;
		for byte in num.iter_mut() {
			let acc = (rem << 8) | u32::from(*byte);
			*byte = (acc / 62) as u8;
			rem = acc % 62;
			is_zero &= *byte == 0;
		}
		pos -= 1;
		digits[pos] = ALPHABET[rem as usize];
		if is_zero {
			break;
		}
	}

	digits.iter().map(|&b| b as char).collect()
}

fn decode(encoded: &str) -> Result<[u8; RAW_LEN], IdError> {
	let mut out = [0u8; RAW_LEN];
	for c in encoded.chars() {
		let digit = digit_value(c).ok_or(IdError::InvalidCharacter(c))?;
		let mut carry = digit;
		for byte in out.iter_mut().rev() {
			let acc = u32::from(*byte) * 62 + carry;
			*byte = (acc & 0xff) as u8;
			carry = acc >> 8;
		}
		if carry != 0 {
			return Err(IdError::Overflow);
		}
	}
	Ok(out)
}

fn digit_value(c: char) -> Option<u32> {
	match c {
		'0'..='9' => Some(c as u32 - '0' as u32),
		'A'..='Z' => Some(c as u32 - 'A' as u32 + 10),
		'a'..='z' => Some(c as u32 - 'a' as u32 + 36),
		_ => None,
	}
}
