//! Decimal-split job numbers
//!
//! A job number is stored in two words as `value / 10000` and
//! `value % 10000`, so each word reads as a group of decimal digits.

use crate::core::{Error, Result};

/// Largest job number that fits the two-word layout
pub const MAX_JOB: u32 = 999_999;

/// Divisor separating the two digit groups
pub const GROUP: u32 = 10_000;

/// Splits a job number into its two words
pub fn split_job(value: u32) -> Result<[u16; 2]> {
    if value > MAX_JOB {
        return Err(Error::encoding(format!(
            "job number {} exceeds {}",
            value, MAX_JOB
        )));
    }
    Ok([(value / GROUP) as u16, (value % GROUP) as u16])
}

/// Joins two words into a job number; both words zero means no job
pub fn join_job(words: [u16; 2]) -> Result<Option<u32>> {
    let [high, low] = words;
    if high == 0 && low == 0 {
        return Ok(None);
    }
    if low as u32 >= GROUP {
        return Err(Error::encoding(format!(
            "job low group {} exceeds 9999",
            low
        )));
    }

    let value = high as u32 * GROUP + low as u32;
    if value > MAX_JOB {
        return Err(Error::encoding(format!(
            "job number {} exceeds {}",
            value, MAX_JOB
        )));
    }
    Ok(Some(value))
}
