// Copyright (c) 2023 Espresso Systems (espressosys.com)
// This file is part of the sequencer-example-l2 repository.

// You should have received a copy of the MIT License
// along with the sequencer-example-l2 repository. If not, see <https://mit-license.org/>.

//! Elements of the BN254 scalar field, the native word of the sandbox.

use crate::error::{FieldError, ParseSnafu};
use ethers::utils::{hex, keccak256};
use num_bigint::BigUint;
use rand::RngCore;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use snafu::OptionExt;
use std::{fmt, str::FromStr};

const MODULUS_BE: [u8; 32] = [
    0x30, 0x64, 0x4e, 0x72, 0xe1, 0x31, 0xa0, 0x29, 0xb8, 0x50, 0x45, 0xb6, 0x81, 0x81, 0x58, 0x5d,
    0x28, 0x33, 0xe8, 0x48, 0x79, 0xb9, 0x70, 0x91, 0x43, 0xe1, 0xf5, 0x93, 0xf0, 0x00, 0x00, 0x01,
];

fn modulus() -> BigUint {
    BigUint::from_bytes_be(&MODULUS_BE)
}

/// A field element, always kept reduced modulo the field order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fr(BigUint);

impl Fr {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn from_biguint(value: BigUint) -> Self {
        Fr(value % modulus())
    }

    /// Interprets up to 32 big-endian bytes as an integer and reduces it.
    pub fn from_be_bytes(bytes: &[u8]) -> Self {
        Self::from_biguint(BigUint::from_bytes_be(bytes))
    }

    pub fn random<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self::from_be_bytes(&bytes)
    }

    /// Hashes a sequence of elements with keccak256 and maps the digest into the field.
    pub fn hash(inputs: &[Fr]) -> Self {
        let mut preimage = Vec::with_capacity(inputs.len() * 32);
        for input in inputs {
            preimage.extend_from_slice(&input.to_be_bytes());
        }
        Self::from_be_bytes(&keccak256(preimage))
    }

    pub fn to_be_bytes(&self) -> [u8; 32] {
        let digits = self.0.to_bytes_be();
        let mut out = [0u8; 32];
        out[32 - digits.len()..].copy_from_slice(&digits);
        out
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_be_bytes()))
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }
}

impl From<u64> for Fr {
    fn from(value: u64) -> Self {
        Fr(BigUint::from(value))
    }
}

impl From<bool> for Fr {
    fn from(value: bool) -> Self {
        Fr::from(value as u64)
    }
}

impl FromStr for Fr {
    type Err = FieldError;

    /// Accepts `0x`-prefixed hex or plain decimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed.strip_prefix("0x") {
            Some(digits) if !digits.is_empty() => BigUint::parse_bytes(digits.as_bytes(), 16),
            Some(_) => None,
            None => BigUint::parse_bytes(trimmed.as_bytes(), 10),
        };
        parsed
            .map(Fr::from_biguint)
            .context(ParseSnafu { input: s })
    }
}

impl fmt::Display for Fr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Fr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
