use std::fmt;

use serde::{Deserialize, Serialize};

/// Exact unsigned fraction used for rates, durations and aspect ratios.
///
/// Values are kept in lowest terms.  Any fraction with a zero numerator
/// *or* a zero denominator is the zero rational `0/1`; a zero denominator
/// never signals a division by zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawRational")]
pub struct Rational {
    numerator:   u32,
    denominator: u32,
}

#[derive(Deserialize)]
struct RawRational {
    numerator:   u32,
    denominator: u32,
}

impl From<RawRational> for Rational {
    fn from(raw: RawRational) -> Self {
        Rational::new(raw.numerator, raw.denominator)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl Rational {
    pub const ZERO: Rational = Rational { numerator: 0, denominator: 1 };

    pub fn new(numerator: u32, denominator: u32) -> Self {
        if numerator == 0 || denominator == 0 {
            return Self::ZERO;
        }
        let g = gcd(numerator, denominator);
        Self { numerator: numerator / g, denominator: denominator / g }
    }

    pub fn numerator(&self) -> u32 { self.numerator }
    pub fn denominator(&self) -> u32 { self.denominator }

    pub fn is_zero(&self) -> bool {
        self.numerator == 0
    }

    /// `None` for the zero rational, used for fields that are omitted
    /// when zero.
    pub fn non_zero(self) -> Option<Self> {
        if self.is_zero() { None } else { Some(self) }
    }

    pub fn to_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }
}

impl Default for Rational {
    fn default() -> Self {
        Self::ZERO
    }
}

impl From<u32> for Rational {
    fn from(n: u32) -> Self {
        Rational::new(n, 1)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowest_terms() {
        let r = Rational::new(50, 2);
        assert_eq!((r.numerator(), r.denominator()), (25, 1));
        assert_eq!(Rational::new(30000, 1001), Rational::new(60000, 2002));
    }

    #[test]
    fn test_zero_on_either_side() {
        assert_eq!(Rational::new(0, 25), Rational::ZERO);
        assert_eq!(Rational::new(25, 0), Rational::ZERO);
        assert!(Rational::new(7, 0).is_zero());
        assert_eq!(Rational::new(16, 9).non_zero(), Some(Rational::new(16, 9)));
        assert_eq!(Rational::ZERO.non_zero(), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Rational::new(30000, 1001).to_string(), "30000/1001");
        assert_eq!(Rational::from(25).to_string(), "25/1");
    }

    #[test]
    fn test_deserialize_normalises() {
        let r: Rational = serde_json::from_str(r#"{"numerator":5,"denominator":0}"#).unwrap();
        assert_eq!(r, Rational::ZERO);
        let r: Rational = serde_json::from_str(r#"{"numerator":50,"denominator":2}"#).unwrap();
        assert_eq!((r.numerator(), r.denominator()), (25, 1));
    }
}
