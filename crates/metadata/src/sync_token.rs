//! Sync token generation for optimistic metadata updates.

use filecache_core::SYNC_TOKEN_LENGTH;
use rand::TryRngCore;
use rand::rngs::OsRng;

/// Characters a sync token is drawn from.
const TOKEN_CHARS: &[u8] = b"qwertyuiopasdfghjklzxcvbnmQWERTYUIOPASDFGHJKLZXCVBNM1234567890";

/// Draws at or above this bound are rejected so every character is equally
/// likely.
const ACCEPT_BELOW: u32 = u32::MAX - (u32::MAX % TOKEN_CHARS.len() as u32);

/// Generate a sync token from the given randomness source.
///
/// A failed draw is logged and skipped, so the token can come out shorter
/// than [`SYNC_TOKEN_LENGTH`].
pub fn generate_sync_token<R: TryRngCore + ?Sized>(rng: &mut R) -> String {
    let mut token = String::with_capacity(SYNC_TOKEN_LENGTH);
    for _ in 0..SYNC_TOKEN_LENGTH {
        if let Some(index) = draw_index(rng) {
            token.push(char::from(TOKEN_CHARS[index]));
        }
    }
    token
}

fn draw_index<R: TryRngCore + ?Sized>(rng: &mut R) -> Option<usize> {
    loop {
        match rng.try_next_u32() {
            Ok(value) if value < ACCEPT_BELOW => {
                return Some(value as usize % TOKEN_CHARS.len());
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to draw sync token character");
                return None;
            }
        }
    }
}

/// Source of fresh sync tokens.
pub trait SyncTokenGenerator: Send + Sync {
    fn generate(&self) -> String;
}

/// Tokens drawn from the operating system's RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsRngTokens;

impl SyncTokenGenerator for OsRngTokens {
    fn generate(&self) -> String {
        generate_sync_token(&mut OsRng)
    }
}
