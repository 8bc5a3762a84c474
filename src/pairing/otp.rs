//! One-time pairing codes.
//!
//! Codes are four digits drawn uniformly from 1000..=9999 with the thread
//! RNG. They only need to survive casual guessing for the length of one
//! listening window; the bot token is the real secret.

use rand::Rng;
use subtle::ConstantTimeEq;

use crate::error::MalformedCode;

/// Number of digits in a pairing code.
pub const OTP_LENGTH: usize = 4;

const OTP_MIN: u16 = 1000;
const OTP_MAX: u16 = 9999;

/// A four-digit pairing code.
#[derive(Clone, PartialEq, Eq)]
pub struct Otp(String);

impl Otp {
    /// Accept `code` if it is a four-digit number in 1000..=9999.
    pub fn parse(code: &str) -> Option<Self> {
        let value: u16 = code.parse().ok()?;
        (looks_like_code(code) && (OTP_MIN..=OTP_MAX).contains(&value))
            .then(|| Self(code.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Compare a candidate (surrounding whitespace ignored) against this
    /// code in constant time.
    pub fn check(&self, candidate: &str) -> Result<(), MalformedCode> {
        let candidate = candidate.trim();
        if !looks_like_code(candidate) {
            return Err(MalformedCode::NotACode);
        }
        if bool::from(candidate.as_bytes().ct_eq(self.0.as_bytes())) {
            Ok(())
        } else {
            Err(MalformedCode::Mismatch)
        }
    }
}

impl std::fmt::Display for Otp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Keep codes out of debug logs.
impl std::fmt::Debug for Otp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Otp(****)")
    }
}

fn looks_like_code(s: &str) -> bool {
    s.len() == OTP_LENGTH && s.bytes().all(|b| b.is_ascii_digit())
}

/// Source of pairing codes.
pub trait OtpGenerator: Send + Sync {
    fn generate(&self) -> Otp;
}

/// Uniform random codes.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomOtp;

impl OtpGenerator for RandomOtp {
    fn generate(&self) -> Otp {
        generate_otp()
    }
}

/// Always returns the same code. For harnesses and tests.
#[derive(Debug, Clone)]
pub struct FixedOtp(Otp);

impl FixedOtp {
    pub fn new(code: &str) -> Option<Self> {
        Otp::parse(code).map(Self)
    }
}

impl OtpGenerator for FixedOtp {
    fn generate(&self) -> Otp {
        self.0.clone()
    }
}

/// Draw a fresh random code.
pub fn generate_otp() -> Otp {
    let mut rng = rand::thread_rng();
    let code: u16 = rng.gen_range(OTP_MIN..=OTP_MAX);
    Otp(code.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_are_four_digits_in_range() {
        for _ in 0..500 {
            let otp = generate_otp();
            assert_eq!(otp.as_str().len(), OTP_LENGTH);
            let value: u16 = otp.as_str().parse().unwrap();
            assert!((1000..=9999).contains(&value));
        }
    }

    #[test]
    fn test_parse_rejects_out_of_range_and_garbage() {
        assert!(Otp::parse("4821").is_some());
        assert!(Otp::parse("1000").is_some());
        assert!(Otp::parse("9999").is_some());
        assert!(Otp::parse("0999").is_none());
        assert!(Otp::parse("482").is_none());
        assert!(Otp::parse("48210").is_none());
        assert!(Otp::parse("+482").is_none());
        assert!(Otp::parse("abcd").is_none());
    }

    #[test]
    fn test_check_classifies_candidates() {
        let otp = Otp::parse("4821").unwrap();
        assert_eq!(otp.check("4821"), Ok(()));
        assert_eq!(otp.check("  4821\n"), Ok(()));
        assert_eq!(otp.check("9999"), Err(MalformedCode::Mismatch));
        assert_eq!(otp.check("0000"), Err(MalformedCode::Mismatch));
        assert_eq!(otp.check("48210"), Err(MalformedCode::NotACode));
        assert_eq!(otp.check("hello"), Err(MalformedCode::NotACode));
        assert_eq!(otp.check(""), Err(MalformedCode::NotACode));
        assert_eq!(otp.check("48 21"), Err(MalformedCode::NotACode));
    }

    #[test]
    fn test_debug_is_redacted() {
        let otp = Otp::parse("4821").unwrap();
        assert!(!format!("{:?}", otp).contains("4821"));
        assert_eq!(otp.to_string(), "4821");
    }

    #[test]
    fn test_fixed_generator() {
        let generator = FixedOtp::new("4821").unwrap();
        assert_eq!(generator.generate().as_str(), "4821");
        assert!(FixedOtp::new("12").is_none());
    }
}
