//! Deterministic byte patterns for bulk transfer payloads
//!
//! Both ends of a transfer agree on the pattern, so received data can be
//! verified without a side channel. Every buffer starts at pattern offset 0.

use serde::Serialize;
use std::fmt;

/// Byte pattern written on OUT transfers and expected on IN transfers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternMode {
    /// All zero bytes, no synchronization issues
    #[default]
    Zero,
    /// Byte `i % 63` at offset `i`
    ///
    /// Stays in sync with short-terminated transfers, or otherwise when host
    /// and gadget agree on how large each transfer request is.
    Mod63,
    /// Any other mode number; verification always fails
    Unsupported(u32),
}

impl PatternMode {
    /// Map a mode number (0 = zero, 1 = mod63) to a pattern mode
    pub fn from_number(mode: u32) -> Self {
        match mode {
            0 => PatternMode::Zero,
            1 => PatternMode::Mod63,
            other => PatternMode::Unsupported(other),
        }
    }

    /// Mode number of this pattern
    pub fn number(self) -> u32 {
        match self {
            PatternMode::Zero => 0,
            PatternMode::Mod63 => 1,
            PatternMode::Unsupported(other) => other,
        }
    }

    /// Byte expected at `offset` for modes with a defined pattern
    fn byte_at(self, offset: usize) -> Option<u8> {
        match self {
            PatternMode::Zero => Some(0),
            PatternMode::Mod63 => Some((offset % 63) as u8),
            PatternMode::Unsupported(_) => None,
        }
    }
}

impl fmt::Display for PatternMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternMode::Zero => write!(f, "zero"),
            PatternMode::Mod63 => write!(f, "mod63"),
            PatternMode::Unsupported(mode) => write!(f, "unsupported({})", mode),
        }
    }
}

/// Verification failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    /// First byte that differs from the pattern
    #[error("buf[{offset}] = {actual} (not {expected})")]
    Mismatch {
        /// Offset of the byte within the transfer
        offset: usize,
        /// Byte received
        actual: u8,
        /// Byte the pattern requires
        expected: u8,
    },
    /// Unsupported mode on an empty buffer, where no byte can mismatch
    #[error("pattern mode {0} is not supported")]
    Unsupported(u32),
}

/// Fill `buf` with the pattern
///
/// Unsupported modes fill with zeros.
pub fn fill(mode: PatternMode, buf: &mut [u8]) {
    match mode {
        PatternMode::Mod63 => {
            for (i, byte) in buf.iter_mut().enumerate() {
                *byte = (i % 63) as u8;
            }
        }
        PatternMode::Zero | PatternMode::Unsupported(_) => buf.fill(0),
    }
}

/// Check `buf` against the pattern, stopping at the first mismatch
///
/// # Errors
/// Returns [`PatternError::Mismatch`] for the first differing byte. An
/// unsupported mode never verifies: each byte is compared against its own
/// logical negation, and an empty buffer yields [`PatternError::Unsupported`].
pub fn check(mode: PatternMode, buf: &[u8]) -> Result<(), PatternError> {
    if let PatternMode::Unsupported(number) = mode {
        return match buf.first() {
            Some(&actual) => Err(PatternError::Mismatch {
                offset: 0,
                actual,
                expected: u8::from(actual == 0),
            }),
            None => Err(PatternError::Unsupported(number)),
        };
    }

    for (offset, &actual) in buf.iter().enumerate() {
        let expected = mode.byte_at(offset).unwrap_or(0);
        if actual != expected {
            log::error!("buf[{}] = {} (not {})", offset, actual, expected);
            return Err(PatternError::Mismatch {
                offset,
                actual,
                expected,
            });
        }
    }

    Ok(())
}
