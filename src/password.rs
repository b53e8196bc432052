//! Root password generation.
//!
//! Instances are created with a random root password that is used at most
//! twice: once when the root disk is written and, for remote bootstrap, once
//! to authenticate the first SSH session. The value is never logged or
//! persisted.

use std::fmt;

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use rand::{CryptoRng, Rng, RngCore};
use thiserror::Error;

/// Lowercase letters.
pub const LOWER_LETTERS: &str = "abcdefghijklmnopqrstuvwxyz";
/// Uppercase letters.
pub const UPPER_LETTERS: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
/// Decimal digits.
pub const DIGITS: &str = "0123456789";
/// Symbols accepted by the provider's root password rules.
pub const SYMBOLS: &str = "!\"#$%&'()*+,-./:;<=>?@[]^_`{|}~\\";

/// A generated root password.
///
/// The type is deliberately not `Clone` and its `Debug` output is redacted.
pub struct Credential(String);

impl Credential {
    /// Wraps an existing secret.
    #[must_use]
    pub fn from_secret(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Returns the secret text.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Errors raised while generating a password.
#[derive(Debug, Error)]
pub enum PasswordError {
    /// The policy cannot be satisfied with the available character classes.
    #[error("unsatisfiable password policy: {0}")]
    Policy(String),
    /// The random source failed.
    #[error("random source unavailable: {0}")]
    Rng(#[from] rand::Error),
}

/// Complexity rules applied to generated passwords.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct PasswordPolicy {
    /// Total number of characters.
    pub length: usize,
    /// Exact number of digits.
    pub digits: usize,
    /// Exact number of symbols.
    pub symbols: usize,
    /// Minimum number of lowercase letters.
    pub lowercase: usize,
    /// Minimum number of uppercase letters.
    pub uppercase: usize,
    /// Whether a character may appear more than once.
    pub allow_repeat: bool,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self {
            length: 40,
            digits: 10,
            symbols: 10,
            lowercase: 1,
            uppercase: 1,
            allow_repeat: true,
        }
    }
}

impl PasswordPolicy {
    /// Checks that the policy can be satisfied.
    ///
    /// # Errors
    ///
    /// Returns [`PasswordError::Policy`] describing the first violated rule.
    pub fn validate(&self) -> Result<(), PasswordError> {
        let required = self.digits + self.symbols + self.lowercase + self.uppercase;
        if required > self.length {
            return Err(PasswordError::Policy(format!(
                "{required} required characters exceed total length {}",
                self.length
            )));
        }
        if self.allow_repeat {
            return Ok(());
        }
        let letters = self.length - self.digits - self.symbols;
        let limits = [
            ("digits", self.digits, DIGITS.len()),
            ("symbols", self.symbols, SYMBOLS.len()),
            ("lowercase", self.lowercase, LOWER_LETTERS.len()),
            ("uppercase", self.uppercase, UPPER_LETTERS.len()),
            ("letters", letters, LOWER_LETTERS.len() + UPPER_LETTERS.len()),
        ];
        for (class, wanted, available) in limits {
            if wanted > available {
                return Err(PasswordError::Policy(format!(
                    "{wanted} unique {class} requested but only {available} exist"
                )));
            }
        }
        Ok(())
    }

    /// Returns `true` when `candidate` satisfies every rule of the policy.
    #[must_use]
    pub fn is_satisfied_by(&self, candidate: &str) -> bool {
        let count = |class: &str| candidate.chars().filter(|ch| class.contains(*ch)).count();
        let length_ok = candidate.chars().count() == self.length;
        let classes_ok = count(DIGITS) == self.digits
            && count(SYMBOLS) == self.symbols
            && count(LOWER_LETTERS) >= self.lowercase
            && count(UPPER_LETTERS) >= self.uppercase;
        let repeat_ok = self.allow_repeat || {
            let mut seen: Vec<char> = candidate.chars().collect();
            seen.sort_unstable();
            seen.windows(2).all(|pair| pair.first() != pair.get(1))
        };
        length_ok && classes_ok && repeat_ok
    }
}

/// Generates passwords from a cryptographically secure random source.
#[derive(Clone, Copy, Debug)]
pub struct PasswordGenerator {
    policy: PasswordPolicy,
}

impl PasswordGenerator {
    /// Creates a generator for `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`PasswordError::Policy`] when the policy is unsatisfiable.
    pub fn new(policy: PasswordPolicy) -> Result<Self, PasswordError> {
        policy.validate()?;
        Ok(Self { policy })
    }

    /// Returns the active policy.
    #[must_use]
    pub const fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    /// Generates a fresh credential from the operating system's CSPRNG.
    ///
    /// # Errors
    ///
    /// Returns [`PasswordError::Rng`] when the random source fails.
    pub fn generate(&self) -> Result<Credential, PasswordError> {
        self.generate_with(&mut OsRng)
    }

    /// Generates a fresh credential from an explicit random source.
    ///
    /// # Errors
    ///
    /// Returns [`PasswordError::Rng`] when the random source fails.
    pub fn generate_with<R: RngCore + CryptoRng>(
        &self,
        rng: &mut R,
    ) -> Result<Credential, PasswordError> {
        // The infallible draws below would panic on a broken source.
        rng.try_fill_bytes(&mut [0_u8; 1])?;
        let policy = &self.policy;
        let mut drawn: Vec<char> = Vec::with_capacity(policy.length);

        let letters = format!("{LOWER_LETTERS}{UPPER_LETTERS}");
        let remaining_letters =
            policy.length - policy.digits - policy.symbols - policy.lowercase - policy.uppercase;
        let plan = [
            (DIGITS, policy.digits),
            (SYMBOLS, policy.symbols),
            (LOWER_LETTERS, policy.lowercase),
            (UPPER_LETTERS, policy.uppercase),
            (letters.as_str(), remaining_letters),
        ];

        for (alphabet, count) in plan {
            let pool: Vec<char> = alphabet.chars().collect();
            for _ in 0..count {
                let ch = draw(rng, &pool, &drawn, policy.allow_repeat)?;
                drawn.push(ch);
            }
        }

        drawn.shuffle(rng);
        Ok(Credential(drawn.into_iter().collect()))
    }
}

fn draw<R: RngCore + CryptoRng>(
    rng: &mut R,
    pool: &[char],
    drawn: &[char],
    allow_repeat: bool,
) -> Result<char, PasswordError> {
    let candidates: Vec<char> = if allow_repeat {
        pool.to_vec()
    } else {
        pool.iter()
            .copied()
            .filter(|ch| !drawn.contains(ch))
            .collect()
    };
    if candidates.is_empty() {
        return Err(PasswordError::Policy(String::from("character class exhausted")));
    }
    let index = rng.gen_range(0..candidates.len());
    candidates
        .get(index)
        .copied()
        .ok_or_else(|| PasswordError::Policy(String::from("character class exhausted")))
}
