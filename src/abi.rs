// Copyright (c) 2023 Espresso Systems (espressosys.com)
// This file is part of the sequencer-example-l2 repository.

// You should have received a copy of the MIT License
// along with the sequencer-example-l2 repository. If not, see <https://mit-license.org/>.

//! Contract artifacts and the flattening of JSON call arguments into field elements.

use crate::error::{
    AbiError, ArgumentCountSnafu, ArrayLengthSnafu, InvalidFieldSnafu, MissingStructFieldSnafu,
    NoInitializerSnafu, OutOfRangeSnafu, ParseArtifactSnafu, ReadArtifactSnafu,
    TypeMismatchSnafu, UnknownFunctionSnafu,
};
use crate::fields::Fr;
use ethers::utils::keccak256;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use snafu::{ensure, OptionExt, ResultExt};
use std::{fmt, fs, path::Path};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sign {
    Signed,
    Unsigned,
}

/// Parameter types as they appear in a compiled contract artifact.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AbiType {
    Field,
    Boolean,
    Array {
        length: usize,
        #[serde(rename = "type")]
        element: Box<AbiType>,
    },
    String {
        length: usize,
    },
    Struct {
        #[serde(default)]
        path: String,
        fields: Vec<StructField>,
    },
    Integer {
        sign: Sign,
        width: usize,
    },
}

impl fmt::Display for AbiType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbiType::Field => f.write_str("Field"),
            AbiType::Boolean => f.write_str("bool"),
            AbiType::Array { length, element } => write!(f, "[{element};{length}]"),
            AbiType::String { length } => write!(f, "str<{length}>"),
            AbiType::Struct { fields, .. } => {
                f.write_str("(")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", field.field_type)?;
                }
                f.write_str(")")
            }
            AbiType::Integer { sign: Sign::Signed, width } => write!(f, "i{width}"),
            AbiType::Integer { sign: Sign::Unsigned, width } => write!(f, "u{width}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: AbiType,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub abi_type: AbiType,
}

impl AbiParameter {
    pub fn new(name: impl Into<String>, abi_type: AbiType) -> Self {
        Self {
            name: name.into(),
            abi_type,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionArtifact {
    pub name: String,
    #[serde(default)]
    pub parameters: Vec<AbiParameter>,
    #[serde(default)]
    pub is_initializer: bool,
}

impl FunctionArtifact {
    pub fn selector(&self) -> FunctionSelector {
        FunctionSelector::from_name_and_parameters(&self.name, &self.parameters)
    }
}

/// The subset of a compiled contract this harness needs: its name and callable functions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractArtifact {
    pub name: String,
    pub functions: Vec<FunctionArtifact>,
}

impl ContractArtifact {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, AbiError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).context(ReadArtifactSnafu { path })?;
        serde_json::from_str(&raw).context(ParseArtifactSnafu { path })
    }

    /// Finds a function by name, falling back to matching its selector.
    pub fn function(&self, name_or_selector: &str) -> Result<&FunctionArtifact, AbiError> {
        if let Some(function) = self.functions.iter().find(|f| f.name == name_or_selector) {
            return Ok(function);
        }
        self.functions
            .iter()
            .find(|f| f.selector().to_string() == name_or_selector)
            .context(UnknownFunctionSnafu {
                name: name_or_selector,
            })
    }

    pub fn initializer(&self) -> Result<&FunctionArtifact, AbiError> {
        self.functions
            .iter()
            .find(|f| f.is_initializer)
            .or_else(|| self.functions.iter().find(|f| f.name == "constructor"))
            .context(NoInitializerSnafu {
                contract: &self.name,
            })
    }

    /// Identifies the contract class: the artifact name plus every function selector.
    pub fn class_id(&self) -> Fr {
        let mut inputs = vec![Fr::from_be_bytes(&keccak256(self.name.as_bytes()))];
        inputs.extend(self.functions.iter().map(|f| f.selector().to_field()));
        Fr::hash(&inputs)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FunctionSelector(pub u32);

impl FunctionSelector {
    /// First four bytes of keccak256 over `name(type,type,...)`.
    pub fn from_signature(signature: &str) -> Self {
        let hash = keccak256(signature.as_bytes());
        FunctionSelector(u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]))
    }

    pub fn from_name_and_parameters(name: &str, parameters: &[AbiParameter]) -> Self {
        let types = parameters
            .iter()
            .map(|p| p.abi_type.to_string())
            .collect::<Vec<_>>()
            .join(",");
        Self::from_signature(&format!("{name}({types})"))
    }

    pub fn to_field(self) -> Fr {
        Fr::from(self.0 as u64)
    }
}

impl fmt::Display for FunctionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// Flattens JSON arguments into the field elements the sandbox expects.
#[derive(Debug, Default)]
pub struct ArgumentEncoder {
    flattened: Vec<Fr>,
}

impl ArgumentEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(
        mut self,
        function: &FunctionArtifact,
        args: &[Value],
    ) -> Result<Vec<Fr>, AbiError> {
        ensure!(
            function.parameters.len() == args.len(),
            ArgumentCountSnafu {
                function: &function.name,
                expected: function.parameters.len(),
                actual: args.len(),
            }
        );
        for (param, arg) in function.parameters.iter().zip(args) {
            self.encode_argument(&param.abi_type, arg, &param.name)?;
        }
        Ok(self.flattened)
    }

    fn encode_argument(
        &mut self,
        abi_type: &AbiType,
        arg: &Value,
        name: &str,
    ) -> Result<(), AbiError> {
        match abi_type {
            AbiType::Field => {
                let value = match arg {
                    Value::Number(n) => match n.as_u64() {
                        Some(v) => Fr::from(v),
                        None => return mismatch(name, "a field", arg),
                    },
                    Value::String(s) => s.parse::<Fr>().context(InvalidFieldSnafu { name })?,
                    Value::Bool(b) => Fr::from(*b),
                    _ => return mismatch(name, "a field", arg),
                };
                self.flattened.push(value);
            }
            AbiType::Boolean => {
                let Some(b) = arg.as_bool() else {
                    return mismatch(name, "a boolean", arg);
                };
                self.flattened.push(Fr::from(b));
            }
            AbiType::Array { length, element } => {
                let Some(items) = arg.as_array() else {
                    return mismatch(name, "an array", arg);
                };
                ensure!(
                    items.len() == *length,
                    ArrayLengthSnafu {
                        name,
                        expected: *length,
                        actual: items.len(),
                    }
                );
                for (i, item) in items.iter().enumerate() {
                    self.encode_argument(element, item, &format!("{name}[{i}]"))?;
                }
            }
            AbiType::String { length } => {
                let Some(s) = arg.as_str() else {
                    return mismatch(name, "a string", arg);
                };
                let bytes = s.as_bytes();
                if bytes.len() > *length {
                    return mismatch(name, &format!("a string of at most {length} bytes"), arg);
                }
                for i in 0..*length {
                    self.flattened
                        .push(Fr::from(bytes.get(i).copied().unwrap_or(0) as u64));
                }
            }
            AbiType::Struct { fields, .. } => {
                let Some(object) = arg.as_object() else {
                    return mismatch(name, "an object", arg);
                };
                for field in fields {
                    let value = object.get(&field.name).context(MissingStructFieldSnafu {
                        name,
                        field: &field.name,
                    })?;
                    self.encode_argument(&field.field_type, value, &field.name)?;
                }
            }
            AbiType::Integer { sign, width } => {
                let (magnitude, negative) = match arg {
                    Value::String(s) => (
                        s.parse::<Fr>()
                            .context(InvalidFieldSnafu { name })?
                            .as_biguint()
                            .clone(),
                        false,
                    ),
                    Value::Number(n) => match (n.as_u64(), n.as_i64()) {
                        (Some(v), _) => (BigUint::from(v), false),
                        (None, Some(v)) if *sign == Sign::Signed => {
                            (BigUint::from(v.unsigned_abs()), true)
                        }
                        _ => return mismatch(name, &abi_type.to_string(), arg),
                    },
                    _ => return mismatch(name, &abi_type.to_string(), arg),
                };
                let bound = BigUint::from(1u8) << *width;
                let in_range = match (sign, negative) {
                    (Sign::Unsigned, _) => magnitude < bound,
                    (Sign::Signed, false) => magnitude < (&bound >> 1u32),
                    (Sign::Signed, true) => magnitude <= (&bound >> 1u32),
                };
                ensure!(
                    in_range,
                    OutOfRangeSnafu {
                        name,
                        abi_type: abi_type.to_string(),
                        value: arg.to_string(),
                    }
                );
                // Negative values are stored as their two's complement over `width` bits.
                let value = if negative {
                    Fr::from_biguint(bound - magnitude)
                } else {
                    Fr::from_biguint(magnitude)
                };
                self.flattened.push(value);
            }
        }
        Ok(())
    }
}

pub fn encode_arguments(function: &FunctionArtifact, args: &[Value]) -> Result<Vec<Fr>, AbiError> {
    ArgumentEncoder::new().encode(function, args)
}

fn mismatch<T>(name: &str, expected: &str, value: &Value) -> Result<T, AbiError> {
    TypeMismatchSnafu {
        name,
        expected,
        value: value.to_string(),
    }
    .fail()
}
