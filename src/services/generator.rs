//! Key identifier generation.
//!
//! Identifiers are 20 characters drawn uniformly from `[A-Z0-9]`, roughly
//! 103 bits of entropy. The thread-local RNG is a CSPRNG seeded from the OS;
//! if the OS cannot supply entropy it panics, which takes the process down
//! rather than failing a single issuance.

use std::fmt;

use rand::Rng;

/// Length of a generated identifier.
pub const IDENTIFIER_LEN: usize = 20;

const ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Produces fresh key identifiers.
pub trait IdentifierSource: Send + Sync + fmt::Debug {
    fn generate(&self) -> String;
}

/// Identifier source backed by the thread-local CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomIdentifiers;

impl IdentifierSource for RandomIdentifiers {
    fn generate(&self) -> String {
        generate_with(&mut rand::rng())
    }
}

/// Generates an identifier from the given randomness source.
pub fn generate_with<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..IDENTIFIER_LEN)
        .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
        .collect()
}

/// Whether `candidate` has the shape of a generated identifier.
pub fn is_well_formed(candidate: &str) -> bool {
    candidate.len() == IDENTIFIER_LEN
        && candidate
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}
