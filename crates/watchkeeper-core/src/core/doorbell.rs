// crates/watchkeeper-core/src/core/doorbell.rs
// ============================================================================
// Module: Watchkeeper Doorbell Tokens
// Description: UDP doorbell token parser for stream-event ingest.
// Purpose: Parse the pipe-delimited and packed numeric wire forms into typed
//          tokens, failing closed on malformed input.
// Dependencies: serde, thiserror
// ============================================================================

//! ## Overview
//! A doorbell is a small ASCII datagram announcing that a stream event's
//! variables are ready to be read from the bridge. Two wire forms exist:
//! `<CATEGORY>|<timestamp>[|<seq>]` and the packed numeric `CCC<timestamp>`
//! where `CCC` is a three-digit category code. Malformed tokens parse to an
//! error and are dropped by the gate. The optional trailing sequence is
//! retained for logging only and never used for dedupe.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Categories
// ============================================================================

/// Stream event categories with their fixed packed codes.
///
/// # Invariants
/// - Codes are stable three-digit values from the fixed wire table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TwitchCategory {
    /// Chat message trigger.
    Chat,
    /// Channel-point redeem.
    Redeem,
    /// Bits cheer.
    Bits,
    /// New follow.
    Follow,
    /// Subscription.
    Sub,
    /// Incoming raid.
    Raid,
    /// Hype train progress.
    HypeTrain,
    /// Poll lifecycle.
    Poll,
    /// Prediction lifecycle.
    Prediction,
    /// Shoutout.
    Shoutout,
    /// Power-ups redemption.
    PowerUps,
    /// Hype chat.
    Hype,
}

impl TwitchCategory {
    /// All categories in packed-code order.
    pub const ALL: &'static [Self] = &[
        Self::Chat,
        Self::Redeem,
        Self::Bits,
        Self::Follow,
        Self::Sub,
        Self::Raid,
        Self::HypeTrain,
        Self::Poll,
        Self::Prediction,
        Self::Shoutout,
        Self::PowerUps,
        Self::Hype,
    ];

    /// Returns the stable wire label for the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "CHAT",
            Self::Redeem => "REDEEM",
            Self::Bits => "BITS",
            Self::Follow => "FOLLOW",
            Self::Sub => "SUB",
            Self::Raid => "RAID",
            Self::HypeTrain => "HYPE_TRAIN",
            Self::Poll => "POLL",
            Self::Prediction => "PREDICTION",
            Self::Shoutout => "SHOUTOUT",
            Self::PowerUps => "POWER_UPS",
            Self::Hype => "HYPE",
        }
    }

    /// Returns the fixed three-digit packed code.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            Self::Chat => 101,
            Self::Redeem => 102,
            Self::Bits => 103,
            Self::Follow => 104,
            Self::Sub => 105,
            Self::Raid => 106,
            Self::HypeTrain => 107,
            Self::Poll => 108,
            Self::Prediction => 109,
            Self::Shoutout => 110,
            Self::PowerUps => 111,
            Self::Hype => 112,
        }
    }

    /// Resolves a packed code into a category.
    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            101 => Some(Self::Chat),
            102 => Some(Self::Redeem),
            103 => Some(Self::Bits),
            104 => Some(Self::Follow),
            105 => Some(Self::Sub),
            106 => Some(Self::Raid),
            107 => Some(Self::HypeTrain),
            108 => Some(Self::Poll),
            109 => Some(Self::Prediction),
            110 => Some(Self::Shoutout),
            111 => Some(Self::PowerUps),
            112 => Some(Self::Hype),
            _ => None,
        }
    }

    /// Resolves a wire label into a category.
    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|category| category.as_str() == label)
    }
}

impl fmt::Display for TwitchCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Doorbell token parse errors.
///
/// # Invariants
/// - Variants are stable for programmatic handling; the gate drops all of
///   them silently.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DoorbellError {
    /// Token is empty or not ASCII.
    #[error("doorbell token malformed")]
    Malformed,
    /// Category label or code is not in the fixed table.
    #[error("doorbell category unknown: {0}")]
    UnknownCategory(String),
    /// Timestamp field is not a positive integer.
    #[error("doorbell timestamp invalid: {0}")]
    InvalidTimestamp(String),
    /// Sequence field is not a non-negative integer.
    #[error("doorbell sequence invalid: {0}")]
    InvalidSequence(String),
}

// ============================================================================
// SECTION: Token
// ============================================================================

/// Parsed doorbell token.
///
/// # Invariants
/// - `timestamp_ms` is positive.
/// - `seq` is informational only; dedupe uses the commit marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoorbellToken {
    /// Event category.
    pub category: TwitchCategory,
    /// Packet commit-marker candidate in unix milliseconds.
    pub timestamp_ms: i64,
    /// Optional trailing sequence field.
    pub seq: Option<u64>,
}

impl DoorbellToken {
    /// Parses a doorbell token in either wire form.
    ///
    /// # Errors
    ///
    /// Returns a [`DoorbellError`] for empty, non-ASCII, unknown-category, or
    /// non-numeric inputs.
    pub fn parse(raw: &str) -> Result<Self, DoorbellError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.is_ascii() {
            return Err(DoorbellError::Malformed);
        }
        if trimmed.contains('|') {
            return Self::parse_piped(trimmed);
        }
        Self::parse_packed(trimmed)
    }

    /// Parses the `<CATEGORY>|<timestamp>[|<seq>]` form.
    fn parse_piped(token: &str) -> Result<Self, DoorbellError> {
        let mut fields = token.split('|');
        let category_field = fields.next().unwrap_or_default();
        let Some(timestamp_field) = fields.next() else {
            return Err(DoorbellError::Malformed);
        };
        let seq_field = fields.next();
        if fields.next().is_some() {
            return Err(DoorbellError::Malformed);
        }

        let category = resolve_category(category_field)?;
        let timestamp_ms = parse_timestamp(timestamp_field)?;
        let seq = match seq_field {
            None => None,
            Some(raw_seq) => Some(
                raw_seq
                    .parse::<u64>()
                    .map_err(|_| DoorbellError::InvalidSequence(raw_seq.to_string()))?,
            ),
        };
        Ok(Self {
            category,
            timestamp_ms,
            seq,
        })
    }

    /// Parses the packed numeric `CCC<timestamp>` form.
    fn parse_packed(token: &str) -> Result<Self, DoorbellError> {
        if token.len() <= 3 || !token.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DoorbellError::Malformed);
        }
        let (code_part, timestamp_part) = token.split_at(3);
        let code = code_part
            .parse::<u16>()
            .map_err(|_| DoorbellError::UnknownCategory(code_part.to_string()))?;
        let category = TwitchCategory::from_code(code)
            .ok_or_else(|| DoorbellError::UnknownCategory(code_part.to_string()))?;
        let timestamp_ms = parse_timestamp(timestamp_part)?;
        Ok(Self {
            category,
            timestamp_ms,
            seq: None,
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves a category field (label or three-digit code).
fn resolve_category(field: &str) -> Result<TwitchCategory, DoorbellError> {
    if let Some(category) = TwitchCategory::from_label(field) {
        return Ok(category);
    }
    if field.len() == 3
        && field.bytes().all(|b| b.is_ascii_digit())
        && let Ok(code) = field.parse::<u16>()
        && let Some(category) = TwitchCategory::from_code(code)
    {
        return Ok(category);
    }
    Err(DoorbellError::UnknownCategory(field.to_string()))
}

/// Parses a positive millisecond timestamp field.
fn parse_timestamp(field: &str) -> Result<i64, DoorbellError> {
    let value = field
        .parse::<i64>()
        .map_err(|_| DoorbellError::InvalidTimestamp(field.to_string()))?;
    if value <= 0 {
        return Err(DoorbellError::InvalidTimestamp(field.to_string()));
    }
    Ok(value)
}
