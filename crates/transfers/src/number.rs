//! Human-readable transfer numbers: `TR-YYYYMM-NNNN`, sequential per month.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use depot_core::DomainError;

const PREFIX: &str = "TR";

/// Numbering scope: one calendar month (UTC), rendered as `YYYYMM`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeriodKey(String);

impl PeriodKey {
    pub fn for_date(at: DateTime<Utc>) -> Self {
        Self(format!("{:04}{:02}", at.year(), at.month()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl core::str::FromStr for PeriodKey {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("invalid period key '{s}' (expected YYYYMM)"));
        if s.len() != 6 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let month: u32 = s[4..].parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for PeriodKey {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PeriodKey> for String {
    fn from(value: PeriodKey) -> Self {
        value.0
    }
}

/// A transfer number. Orders by period, then by sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferNumber {
    period: PeriodKey,
    sequence: u64,
}

impl TransferNumber {
    pub fn new(period: PeriodKey, sequence: u64) -> Result<Self, DomainError> {
        if sequence == 0 {
            return Err(DomainError::validation("transfer number sequence starts at 1"));
        }
        Ok(Self { period, sequence })
    }

    pub fn period(&self) -> &PeriodKey {
        &self.period
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl core::fmt::Display for TransferNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{PREFIX}-{}-{:04}", self.period, self.sequence)
    }
}

impl core::str::FromStr for TransferNumber {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation(format!("invalid transfer number '{s}'"));
        let mut parts = s.splitn(3, '-');
        let (Some(prefix), Some(period), Some(seq)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };
        if prefix != PREFIX || !seq.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let sequence = seq.parse::<u64>().map_err(|_| invalid())?;
        Self::new(period.parse()?, sequence)
    }
}

impl Serialize for TransferNumber {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TransferNumber {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn period_key_is_year_and_month() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 12, 0, 0).unwrap();
        assert_eq!(PeriodKey::for_date(at).as_str(), "202603");
    }

    #[test]
    fn period_key_rejects_bad_months() {
        assert!("202613".parse::<PeriodKey>().is_err());
        assert!("2026-1".parse::<PeriodKey>().is_err());
    }

    #[test]
    fn number_renders_and_parses() {
        let n = TransferNumber::new("202610".parse().unwrap(), 42).unwrap();
        assert_eq!(n.to_string(), "TR-202610-0042");
        assert_eq!("TR-202610-0042".parse::<TransferNumber>().unwrap(), n);
    }

    #[test]
    fn ordering_is_numeric_past_four_digits() {
        let p: PeriodKey = "202610".parse().unwrap();
        let a = TransferNumber::new(p.clone(), 9_999).unwrap();
        let b = TransferNumber::new(p, 10_000).unwrap();
        assert!(a < b);
        assert_eq!(b.to_string(), "TR-202610-10000");
    }

    #[test]
    fn sequence_zero_is_rejected() {
        assert!(TransferNumber::new("202610".parse().unwrap(), 0).is_err());
    }
}
