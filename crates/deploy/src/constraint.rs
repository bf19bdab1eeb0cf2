//! Address placement rules for sharded chains.
//!
//! Checking a constraint is pure and advisory: a violation is reported to the
//! caller next to the deployment record, never turned into a failure.

use std::fmt;

use alloy_core::primitives::Address;
use serde::{Deserialize, Serialize};

/// Inclusive bounds on one byte of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRule {
    pub index: usize,
    pub min: u8,
    pub max: u8,
}

impl ByteRule {
    pub fn exact(index: usize, value: u8) -> Self {
        Self {
            index,
            min: value,
            max: value,
        }
    }
}

/// A conjunction of byte rules over a raw address.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressConstraint {
    pub rules: Vec<ByteRule>,
}

impl AddressConstraint {
    /// Quai ledger scope of a zone: first byte is the zone prefix, second byte
    /// at most `0x7F`.
    pub fn quai_zone(region: u8, zone: u8) -> Self {
        Self {
            rules: vec![
                ByteRule::exact(0, (region << 4) | (zone & 0x0F)),
                ByteRule {
                    index: 1,
                    min: 0x00,
                    max: 0x7F,
                },
            ],
        }
    }

    pub fn validate(&self, address: Address) -> Validation {
        validate(address, self)
    }
}

/// Details of the first rule an address breaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstraintViolation {
    pub address: Address,
    pub byte_index: usize,
    /// `None` when the rule points past the end of the address.
    pub actual: Option<u8>,
    pub min: u8,
    pub max: u8,
}

impl fmt::Display for ConstraintViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.actual {
            Some(actual) => write!(
                f,
                "address {} byte {} is {:#04x}, expected {:#04x}..={:#04x}",
                self.address, self.byte_index, actual, self.min, self.max
            ),
            None => write!(
                f,
                "address {} has no byte {}",
                self.address, self.byte_index
            ),
        }
    }
}

/// Outcome of checking an address against a constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validation {
    Ok,
    Violation(ConstraintViolation),
}

impl Validation {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    pub fn violation(&self) -> Option<&ConstraintViolation> {
        match self {
            Self::Ok => None,
            Self::Violation(v) => Some(v),
        }
    }
}

pub fn validate(address: Address, constraint: &AddressConstraint) -> Validation {
    for rule in &constraint.rules {
        let actual = address.0.get(rule.index).copied();
        let within = actual.is_some_and(|b| (rule.min..=rule.max).contains(&b));
        if !within {
            return Validation::Violation(ConstraintViolation {
                address,
                byte_index: rule.index,
                actual,
                min: rule.min,
                max: rule.max,
            });
        }
    }
    Validation::Ok
}

/// Which ledger an address lives on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Ledger {
    Quai,
    Qi,
}

impl Ledger {
    pub fn from_address(address: Address) -> Self {
        if address.0[1] & 0x80 == 0 {
            Self::Quai
        } else {
            Self::Qi
        }
    }
}

/// Shard an address belongs to, read from its first byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Zone {
    pub region: u8,
    pub zone: u8,
}

const REGION_NAMES: [&str; 3] = ["cyprus", "paxos", "hydra"];

impl Zone {
    pub fn from_address(address: Address) -> Self {
        let prefix = address.0[0];
        Self {
            region: prefix >> 4,
            zone: prefix & 0x0F,
        }
    }

    /// Human name such as `cyprus1`, when the prefix maps to a known zone.
    pub fn name(&self) -> Option<String> {
        let region = REGION_NAMES.get(usize::from(self.region))?;
        (self.zone < 3).then(|| format!("{region}{}", self.zone + 1))
    }

    pub fn constraint(&self) -> AddressConstraint {
        AddressConstraint::quai_zone(self.region, self.zone)
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(&name),
            None => write!(f, "unknown zone {:#04x}", (self.region << 4) | self.zone),
        }
    }
}
