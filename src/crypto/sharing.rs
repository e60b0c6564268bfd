//! N-of-N sharing primitives
//!
//! - XOR sharing over byte strings: N-1 random masks plus one share that
//!   XORs back to the secret
//! - Additive sharing of 32-bit signed integers modulo a prime, so that
//!   nodes can add shares of different records without learning them

use crate::error::{Error, Result};
use rand::{Rng, RngCore};

/// Prime modulus for additive shares (smallest prime above 2^32)
pub const SUM_MODULUS: u64 = 4_294_967_311;

const SUM_MIN: i64 = -(1 << 31);
const SUM_MAX: i64 = (1 << 31) - 1;

/// Split `secret` into `count` XOR shares
pub fn xor_split(secret: &[u8], count: usize) -> Result<Vec<Vec<u8>>> {
    if count == 0 {
        return Err(Error::InvalidShare("share count must be at least 1".to_string()));
    }

    let mut rng = rand::thread_rng();
    let mut last = secret.to_vec();
    let mut shares = Vec::with_capacity(count);

    for _ in 1..count {
        let mut mask = vec![0u8; secret.len()];
        rng.fill_bytes(&mut mask);
        for (acc, m) in last.iter_mut().zip(&mask) {
            *acc ^= m;
        }
        shares.push(mask);
    }

    shares.push(last);
    Ok(shares)
}

/// Recombine XOR shares; all shares must have the same length
pub fn xor_combine(shares: &[Vec<u8>]) -> Result<Vec<u8>> {
    let first = shares
        .first()
        .ok_or_else(|| Error::InvalidShare("no shares to combine".to_string()))?;

    let mut secret = vec![0u8; first.len()];
    for share in shares {
        if share.len() != secret.len() {
            return Err(Error::InvalidShare(format!(
                "share length mismatch: {} vs {}",
                share.len(),
                secret.len()
            )));
        }
        for (acc, b) in secret.iter_mut().zip(share) {
            *acc ^= b;
        }
    }

    Ok(secret)
}

/// Split a 32-bit signed integer into `count` additive shares modulo [`SUM_MODULUS`]
pub fn additive_split(value: i64, count: usize) -> Result<Vec<u64>> {
    if !(SUM_MIN..=SUM_MAX).contains(&value) {
        return Err(Error::UnsupportedValue(format!(
            "{} is outside the 32-bit signed range",
            value
        )));
    }
    if count == 0 {
        return Err(Error::InvalidShare("share count must be at least 1".to_string()));
    }

    let mut remaining = to_field(value);
    let mut rng = rand::thread_rng();
    let mut shares = Vec::with_capacity(count);

    for _ in 1..count {
        let share = rng.gen_range(0..SUM_MODULUS);
        remaining = (remaining + SUM_MODULUS - share) % SUM_MODULUS;
        shares.push(share);
    }

    shares.push(remaining);
    Ok(shares)
}

/// Recombine additive shares into the signed integer they encode
pub fn additive_combine(shares: &[u64]) -> Result<i64> {
    if shares.is_empty() {
        return Err(Error::InvalidShare("no shares to combine".to_string()));
    }

    let mut total = 0u64;
    for &share in shares {
        if share >= SUM_MODULUS {
            return Err(Error::InvalidShare(format!(
                "additive share {} exceeds modulus",
                share
            )));
        }
        total = (total + share) % SUM_MODULUS;
    }

    Ok(from_field(total))
}

fn to_field(value: i64) -> u64 {
    if value < 0 {
        SUM_MODULUS - value.unsigned_abs()
    } else {
        value as u64
    }
}

fn from_field(element: u64) -> i64 {
    if element > SUM_MAX as u64 {
        element as i64 - SUM_MODULUS as i64
    } else {
        element as i64
    }
}
