//! Master-password policy and unlock-attempt rate limiting.
//!
//! Both are plain, explicitly-constructed structs rather than global state:
//! a `Vault` owns one `RateLimiter` for its own unlock attempts, so two
//! vaults opened in the same process never share a lockout clock.

use std::time::{Duration, Instant};

use crate::error::PolicyError;

/// Minimum master-password length, counted in Unicode scalar values so a
/// password made of multi-byte characters isn't penalized for its UTF-8
/// byte length.
pub const MIN_LENGTH: usize = 12;

/// Failures allowed inside the rolling window before a cooldown kicks in.
pub const MAX_FAILURES: u32 = 3;
/// Width of the rolling window in which failures accumulate.
pub const WINDOW: Duration = Duration::from_secs(30);
/// Cooldown imposed once `MAX_FAILURES` is reached inside `WINDOW`.
pub const COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Strength {
    Weak,
    Medium,
    Strong,
}

/// Validate a candidate master password, returning the first rule it
/// fails (length first, then character-class coverage).
pub fn validate(password: &str) -> Result<(), PolicyError> {
    let len = password.chars().count();
    if len < MIN_LENGTH {
        return Err(PolicyError::Violation {
            rule: "length".into(),
            message: format!("password has {} characters, needs at least {}", len, MIN_LENGTH),
        });
    }

    let classes = classes_present(password);
    let count = classes.iter().filter(|p| **p).count();
    if count < 4 {
        return Err(PolicyError::Violation {
            rule: "character_classes".into(),
            message: format!(
                "password uses {} of 4 required character classes (lowercase, uppercase, digit, symbol)",
                count
            ),
        });
    }

    Ok(())
}

fn classes_present(password: &str) -> [bool; 4] {
    let mut lower = false;
    let mut upper = false;
    let mut digit = false;
    let mut symbol = false;
    for c in password.chars() {
        if c.is_lowercase() {
            lower = true;
        } else if c.is_uppercase() {
            upper = true;
        } else if c.is_ascii_digit() {
            digit = true;
        } else if !c.is_alphanumeric() {
            symbol = true;
        }
    }
    [lower, upper, digit, symbol]
}

/// Strength tier of a password, independent of [`validate`]'s pass/fail
/// floor. Weak: under 12 runes, or not all four character classes present.
/// Medium: 16+ runes with all four classes (otherwise falls back to Weak).
/// Strong: 25+ runes with all four classes, or 20+ runes with at least
/// three symbol runes.
pub fn strength(password: &str) -> Strength {
    let len = password.chars().count();
    let classes = classes_present(password);
    let all_four = classes.iter().all(|present| *present);
    let symbol_runes = password.chars().filter(|c| !c.is_alphanumeric()).count();

    if len >= 25 && all_four {
        return Strength::Strong;
    }
    if len >= 20 && symbol_runes >= 3 {
        return Strength::Strong;
    }
    if len >= 16 && all_four {
        return Strength::Medium;
    }
    Strength::Weak
}

/// Tracks failed unlock attempts in a rolling window and imposes a fixed
/// cooldown once the threshold is crossed. One instance per open vault
/// handle; not shared across processes.
pub struct RateLimiter {
    failures: Vec<Instant>,
    cooldown_until: Option<Instant>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            failures: Vec::new(),
            cooldown_until: None,
        }
    }

    /// Call before attempting an unlock. Errs if still in cooldown.
    pub fn check(&mut self) -> Result<(), PolicyError> {
        self.check_at(Instant::now())
    }

    fn check_at(&mut self, now: Instant) -> Result<(), PolicyError> {
        if let Some(until) = self.cooldown_until {
            if now < until {
                return Err(PolicyError::RateLimited {
                    remaining_secs: (until - now).as_secs().max(1),
                });
            }
            self.cooldown_until = None;
            self.failures.clear();
        }
        Ok(())
    }

    /// Record a failed unlock attempt, entering cooldown if this pushes
    /// the rolling count to `MAX_FAILURES`.
    pub fn record_failure(&mut self) {
        self.record_failure_at(Instant::now());
    }

    fn record_failure_at(&mut self, now: Instant) {
        self.failures.retain(|t| now.duration_since(*t) <= WINDOW);
        self.failures.push(now);
        if self.failures.len() as u32 >= MAX_FAILURES {
            self.cooldown_until = Some(now + COOLDOWN);
        }
    }

    /// Clear all recorded failures after a successful unlock.
    pub fn record_success(&mut self) {
        self.failures.clear();
        self.cooldown_until = None;
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
