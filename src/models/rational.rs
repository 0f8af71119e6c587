//! Exact frame-rate values.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// A non-negative rational number, used for frame rates and fps bounds.
///
/// Comparison is exact (cross-multiplied), so `24000/1001` never rounds into `23.976`.
#[derive(Debug, Clone, Copy)]
pub struct Rational {
    num: u64,
    den: u64,
}

impl Rational {
    /// Create a rational. Returns `None` for a zero denominator.
    pub fn new(num: u64, den: u64) -> Option<Self> {
        if den == 0 {
            return None;
        }
        Some(Self { num, den }.reduced())
    }

    /// Create a whole-number rational.
    pub fn integer(value: u64) -> Self {
        Self { num: value, den: 1 }
    }

    pub fn numerator(&self) -> u64 {
        self.num
    }

    pub fn denominator(&self) -> u64 {
        self.den
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Multiply by `num / den`. A zero denominator leaves the value unchanged.
    pub fn scaled(&self, num: u32, den: u32) -> Self {
        if den == 0 {
            return *self;
        }
        let n = self.num as u128 * num as u128;
        let d = self.den as u128 * den as u128;
        let g = gcd_u128(n, d).max(1);
        Self {
            num: (n / g).min(u64::MAX as u128) as u64,
            den: (d / g).min(u64::MAX as u128) as u64,
        }
    }

    fn reduced(self) -> Self {
        let g = gcd(self.num, self.den).max(1);
        Self {
            num: self.num / g,
            den: self.den / g,
        }
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

fn gcd_u128(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

impl PartialEq for Rational {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Rational {}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.num as u128 * other.den as u128;
        let rhs = other.num as u128 * self.den as u128;
        lhs.cmp(&rhs)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Error returned when a frame rate string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid frame rate: {0:?}")]
pub struct ParseRationalError(pub String);

impl FromStr for Rational {
    type Err = ParseRationalError;

    /// Accepts `"24"`, `"23.976"` and `"24000/1001"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseRationalError(s.to_string());
        let s = s.trim();

        if let Some((num, den)) = s.split_once('/') {
            let num = num.trim().parse::<u64>().map_err(|_| err())?;
            let den = den.trim().parse::<u64>().map_err(|_| err())?;
            return Rational::new(num, den).ok_or_else(err);
        }

        let (whole, frac) = s.split_once('.').unwrap_or((s, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(err());
        }
        if !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(err());
        }
        // Nine fractional digits is more than any container reports.
        let frac = &frac[..frac.len().min(9)];

        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| err())?
        };
        let den = 10u64.pow(frac.len() as u32);
        let frac_value: u64 = if frac.is_empty() { 0 } else { frac.parse().map_err(|_| err())? };
        let num = whole
            .checked_mul(den)
            .and_then(|n| n.checked_add(frac_value))
            .ok_or_else(err)?;

        Rational::new(num, den).ok_or_else(err)
    }
}

impl Serialize for Rational {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RationalRepr {
    Int(u64),
    Float(f64),
    Text(String),
}

impl<'de> Deserialize<'de> for Rational {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match RationalRepr::deserialize(deserializer)? {
            RationalRepr::Int(value) => Ok(Rational::integer(value)),
            RationalRepr::Float(value) if value.is_finite() && value >= 0.0 => {
                value.to_string().parse().map_err(serde::de::Error::custom)
            }
            RationalRepr::Float(value) => Err(serde::de::Error::custom(format!(
                "invalid frame rate: {}",
                value
            ))),
            RationalRepr::Text(text) => text.parse().map_err(serde::de::Error::custom),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!("24".parse::<Rational>().unwrap(), Rational::integer(24));
        assert_eq!(
            "23.976".parse::<Rational>().unwrap(),
            Rational::new(23976, 1000).unwrap()
        );
        let ntsc = "24000/1001".parse::<Rational>().unwrap();
        assert_eq!(ntsc.numerator(), 24000);
        assert_eq!(ntsc.denominator(), 1001);
        assert!("abc".parse::<Rational>().is_err());
        assert!("24/0".parse::<Rational>().is_err());
    }

    #[test]
    fn test_malformed_fraction_rejected() {
        assert!("1.ééééé".parse::<Rational>().is_err());
        assert!("23.97é".parse::<Rational>().is_err());
        assert!("1.5x".parse::<Rational>().is_err());
        assert_eq!(
            "23.9760000000001".parse::<Rational>().unwrap(),
            Rational::new(23976, 1000).unwrap()
        );
    }

    #[test]
    fn test_exact_comparison() {
        let ntsc = Rational::new(24000, 1001).unwrap();
        let rounded = "23.976".parse::<Rational>().unwrap();
        assert!(ntsc > rounded);
        assert_eq!(Rational::new(48, 2).unwrap(), Rational::integer(24));
    }

    #[test]
    fn test_scaled() {
        let fps = Rational::new(24000, 1001).unwrap();
        let doubled = fps.scaled(2, 1);
        assert_eq!(doubled, Rational::new(48000, 1001).unwrap());
        assert_eq!(fps.scaled(5, 0), fps);
    }

    #[test]
    fn test_deserialize_number_and_string() {
        let a: Rational = serde_json::from_str("60").unwrap();
        let b: Rational = serde_json::from_str("29.97").unwrap();
        let c: Rational = serde_json::from_str("\"30000/1001\"").unwrap();
        assert_eq!(a, Rational::integer(60));
        assert_eq!(b, Rational::new(2997, 100).unwrap());
        assert_eq!(c, Rational::new(30000, 1001).unwrap());
    }
}
