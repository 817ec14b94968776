use crate::error::{
    ClientError,
    Result,
};
use ethers::{
    abi::{
        Abi,
        Function,
        StateMutability,
    },
    types::{
        Address,
        Bytes,
    },
    utils::to_checksum,
};
use serde_json::Value;
use std::{
    fs,
    path::Path,
};

/// Parsed contract ABI. Only the shape is validated; bytecode is never inspected.
#[derive(Clone, Debug)]
pub struct InterfaceDescription {
    abi: Abi,
}

impl InterfaceDescription {
    /// Accepts a bare ABI array or an artifact object with an `abi` field.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(ContractArtifact::from_json(json)?.interface)
    }

    pub fn from_abi(abi: Abi) -> Result<Self> {
        if abi.functions().next().is_none() {
            return Err(ClientError::InvalidInterface(
                "interface declares no functions".to_string(),
            ));
        }
        Ok(Self { abi })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(ContractArtifact::load(path)?.interface)
    }

    pub fn abi(&self) -> &Abi {
        &self.abi
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.abi.functions.contains_key(name)
    }

    /// Resolve an overload by argument count.
    pub fn function(&self, name: &str, arg_count: usize) -> Result<&Function> {
        let overloads = self
            .abi
            .functions
            .get(name)
            .ok_or_else(|| ClientError::UnknownMethod(name.to_string()))?;
        overloads
            .iter()
            .find(|f| f.inputs.len() == arg_count)
            .ok_or_else(|| ClientError::InvalidArguments {
                method: name.to_string(),
                reason: format!(
                    "expected {} argument(s), got {arg_count}",
                    overloads
                        .iter()
                        .map(|f| f.inputs.len().to_string())
                        .collect::<Vec<_>>()
                        .join(" or ")
                ),
            })
    }
}

pub fn is_read_only(function: &Function) -> bool {
    matches!(
        function.state_mutability,
        StateMutability::View | StateMutability::Pure
    )
}

pub fn is_payable(function: &Function) -> bool {
    function.state_mutability == StateMutability::Payable
}

/// Interface plus optional creation bytecode, as produced by the contract toolchain.
#[derive(Clone, Debug)]
pub struct ContractArtifact {
    pub interface: InterfaceDescription,
    pub bytecode: Option<Bytes>,
    pub contract_name: Option<String>,
}

impl ContractArtifact {
    pub fn from_json(json: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| ClientError::InvalidInterface(format!("malformed JSON: {e}")))?;
        let (abi_value, bytecode, contract_name) = match value {
            Value::Array(_) => (value, None, None),
            Value::Object(mut map) => {
                let abi = map.remove("abi").ok_or_else(|| {
                    ClientError::InvalidInterface("artifact has no `abi` field".to_string())
                })?;
                let bytecode = match map.remove("bytecode") {
                    Some(Value::String(code)) => Some(parse_bytecode(&code)?),
                    _ => None,
                };
                let contract_name = match map.remove("contractName") {
                    Some(Value::String(name)) => Some(name),
                    _ => None,
                };
                (abi, bytecode, contract_name)
            }
            _ => {
                return Err(ClientError::InvalidInterface(
                    "expected an ABI array or an artifact object".to_string(),
                ));
            }
        };
        let abi: Abi = serde_json::from_value(abi_value)
            .map_err(|e| ClientError::InvalidInterface(format!("malformed ABI: {e}")))?;
        Ok(Self {
            interface: InterfaceDescription::from_abi(abi)?,
            bytecode,
            contract_name,
        })
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| {
            ClientError::InvalidInterface(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&json)
    }
}

fn parse_bytecode(code: &str) -> Result<Bytes> {
    let trimmed = code.trim_start_matches("0x");
    let raw = hex::decode(trimmed)
        .map_err(|e| ClientError::InvalidInterface(format!("malformed bytecode: {e}")))?;
    Ok(Bytes::from(raw))
}

/// `0x` followed by 40 hex digits. Mixed-case input must carry a valid EIP-55 checksum.
pub fn parse_address(raw: &str) -> Result<Address> {
    let invalid = |reason: &str| ClientError::InvalidAddress {
        address: raw.to_string(),
        reason: reason.to_string(),
    };
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| invalid("missing 0x prefix"))?;
    if digits.len() != 40 {
        return Err(invalid("expected 40 hex digits"));
    }
    if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid("contains non-hex characters"));
    }
    let bytes = hex::decode(digits).map_err(|_| invalid("contains non-hex characters"))?;
    let address = Address::from_slice(&bytes);

    let has_upper = digits.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = digits.chars().any(|c| c.is_ascii_lowercase());
    if has_upper && has_lower && to_checksum(&address, None)[2..] != *digits {
        return Err(invalid("checksum mismatch"));
    }
    Ok(address)
}
