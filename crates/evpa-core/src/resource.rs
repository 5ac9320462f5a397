//! Resource quantities and resource lists
//!
//! On the wire every amount is a Kubernetes `Quantity` string. Arithmetic
//! happens on `MilliQuantity`, an exact amount held in milli-units, so
//! `500m` cpu is 500 and `1Gi` memory is 1Gi * 1000. `value()` rounds up to
//! whole units (cores or bytes).

use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 1 MiB in bytes
pub const MIB: i64 = 1024 * 1024;

/// 1 GiB in bytes
pub const GIB: i64 = 1024 * MIB;

/// Name of a container resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ResourceName {
    Cpu,
    Memory,
    Other(String),
}

impl ResourceName {
    pub fn as_str(&self) -> &str {
        match self {
            ResourceName::Cpu => "cpu",
            ResourceName::Memory => "memory",
            ResourceName::Other(name) => name,
        }
    }
}

impl From<String> for ResourceName {
    fn from(name: String) -> Self {
        match name.as_str() {
            "cpu" => ResourceName::Cpu,
            "memory" => ResourceName::Memory,
            _ => ResourceName::Other(name),
        }
    }
}

impl From<&str> for ResourceName {
    fn from(name: &str) -> Self {
        ResourceName::from(name.to_string())
    }
}

impl From<ResourceName> for String {
    fn from(name: ResourceName) -> Self {
        name.as_str().to_string()
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An exact resource amount stored in milli-units
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MilliQuantity(i64);

impl MilliQuantity {
    pub const ZERO: MilliQuantity = MilliQuantity(0);

    pub fn from_millis(millis: i64) -> Self {
        MilliQuantity(millis)
    }

    /// Whole units: cores for cpu, bytes for memory
    pub fn from_value(value: i64) -> Self {
        MilliQuantity(value.saturating_mul(1000))
    }

    pub fn milli_value(&self) -> i64 {
        self.0
    }

    /// Whole-unit value, rounded up
    pub fn value(&self) -> i64 {
        let whole = self.0 / 1000;
        if self.0 % 1000 > 0 {
            whole + 1
        } else {
            whole
        }
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Absolute difference in milli-units
    pub fn abs_diff(&self, other: &MilliQuantity) -> u64 {
        self.0.abs_diff(other.0)
    }

    /// Parse the Kubernetes string form (`500m`, `2`, `0.5`, `1Gi`, `128M`, `1e3`)
    pub fn parse(input: &str) -> Result<Self> {
        let parse_err = |reason| Error::QuantityParse {
            input: input.to_string(),
            reason,
        };

        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(parse_err("empty quantity"));
        }

        let (negative, unsigned) = match trimmed.as_bytes()[0] {
            b'-' => (true, &trimmed[1..]),
            b'+' => (false, &trimmed[1..]),
            _ => (false, trimmed),
        };

        let split = unsigned
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(unsigned.len());
        let (number, suffix) = unsigned.split_at(split);
        if number.is_empty() || number == "." {
            return Err(parse_err("missing numeric part"));
        }

        let (int_part, frac_part) = match number.split_once('.') {
            Some((i, f)) => (i, f),
            None => (number, ""),
        };
        if frac_part.contains('.') {
            return Err(parse_err("more than one decimal point"));
        }
        if frac_part.len() > 9 {
            return Err(parse_err("too many fractional digits"));
        }

        // multiplier expressed as numerator / denominator relative to whole units
        let (mul_num, mul_den): (i128, i128) = match decimal_exponent(suffix) {
            Some(exponent) if exponent.unsigned_abs() > MAX_DECIMAL_EXPONENT => {
                return Err(parse_err("number out of range"))
            }
            Some(exponent) if exponent >= 0 => (10i128.pow(exponent.unsigned_abs()), 1),
            Some(exponent) => (1, 10i128.pow(exponent.unsigned_abs())),
            None => match suffix {
                "" => (1, 1),
                "m" => (1, 1000),
                "k" => (1_000, 1),
                "M" => (1_000_000, 1),
                "G" => (1_000_000_000, 1),
                "T" => (1_000_000_000_000, 1),
                "P" => (1_000_000_000_000_000, 1),
                "E" => (1_000_000_000_000_000_000, 1),
                "Ki" => (1 << 10, 1),
                "Mi" => (1 << 20, 1),
                "Gi" => (1 << 30, 1),
                "Ti" => (1 << 40, 1),
                "Pi" => (1 << 50, 1),
                "Ei" => (1 << 60, 1),
                _ => return Err(parse_err("unknown suffix")),
            },
        };

        let digits = format!("{int_part}{frac_part}");
        let mantissa: i128 = if digits.is_empty() {
            0
        } else {
            digits
                .parse()
                .map_err(|_| parse_err("number out of range"))?
        };
        let scale = 10i128.pow(frac_part.len() as u32);

        let numerator = mantissa
            .checked_mul(mul_num)
            .and_then(|n| n.checked_mul(1000))
            .ok_or_else(|| parse_err("number out of range"))?;
        let denominator = scale
            .checked_mul(mul_den)
            .ok_or_else(|| parse_err("number out of range"))?;
        // round up like the API server does for sub-milli precision
        let mut millis = numerator / denominator;
        if numerator % denominator != 0 {
            millis += 1;
        }

        let millis = i64::try_from(millis).map_err(|_| parse_err("number out of range"))?;
        Ok(MilliQuantity(if negative { -millis } else { millis }))
    }
}

/// Largest accepted `e`/`E` exponent, in either direction
const MAX_DECIMAL_EXPONENT: u32 = 30;

/// `e3`, `E-2`, `e+6`; a bare `E` is the exa suffix
fn decimal_exponent(suffix: &str) -> Option<i32> {
    let rest = suffix.strip_prefix(['e', 'E'])?;
    let digits = rest.strip_prefix(['+', '-']).unwrap_or(rest);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    rest.parse().ok()
}

impl FromStr for MilliQuantity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        MilliQuantity::parse(s)
    }
}

impl fmt::Display for MilliQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % 1000 != 0 {
            return write!(f, "{}m", self.0);
        }

        let value = self.0 / 1000;
        const SUFFIXES: [(&str, i64); 4] = [
            ("Ti", 1 << 40),
            ("Gi", 1 << 30),
            ("Mi", 1 << 20),
            ("Ki", 1 << 10),
        ];
        for (suffix, factor) in SUFFIXES {
            if value.abs() >= factor && value % factor == 0 {
                return write!(f, "{}{}", value / factor, suffix);
            }
        }
        write!(f, "{}", value)
    }
}

impl TryFrom<&Quantity> for MilliQuantity {
    type Error = Error;

    fn try_from(quantity: &Quantity) -> Result<Self> {
        MilliQuantity::parse(&quantity.0)
    }
}

impl From<MilliQuantity> for Quantity {
    fn from(quantity: MilliQuantity) -> Self {
        Quantity(quantity.to_string())
    }
}

impl Serialize for MilliQuantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        Quantity::from(*self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MilliQuantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let quantity = Quantity::deserialize(deserializer)?;
        MilliQuantity::try_from(&quantity).map_err(de::Error::custom)
    }
}

/// Mapping from resource name to amount
pub type ResourceList = BTreeMap<ResourceName, MilliQuantity>;

/// Accessors that treat an absent resource as zero
pub trait ResourceListExt {
    fn quantity(&self, name: &ResourceName) -> MilliQuantity;

    fn cpu(&self) -> MilliQuantity {
        self.quantity(&ResourceName::Cpu)
    }

    fn memory(&self) -> MilliQuantity {
        self.quantity(&ResourceName::Memory)
    }
}

impl ResourceListExt for ResourceList {
    fn quantity(&self, name: &ResourceName) -> MilliQuantity {
        self.get(name).copied().unwrap_or_default()
    }
}

/// A list is empty when every present quantity is zero
pub fn is_resource_list_empty(list: &ResourceList) -> bool {
    list.values().all(MilliQuantity::is_zero)
}

/// Compares cpu and memory only, absent entries count as zero
pub fn is_resource_equal(current: &ResourceList, desired: &ResourceList) -> bool {
    current.cpu() == desired.cpu() && current.memory() == desired.memory()
}

/// Parse a Kubernetes resource map such as container requests
pub fn resource_list_from_kube(map: &BTreeMap<String, Quantity>) -> Result<ResourceList> {
    map.iter()
        .map(|(name, quantity)| {
            Ok((
                ResourceName::from(name.as_str()),
                MilliQuantity::try_from(quantity)?,
            ))
        })
        .collect()
}

/// Requests of a container, empty when none are set
pub fn requests_of(resources: Option<&ResourceRequirements>) -> Result<ResourceList> {
    match resources.and_then(|r| r.requests.as_ref()) {
        Some(requests) => resource_list_from_kube(requests),
        None => Ok(ResourceList::new()),
    }
}
