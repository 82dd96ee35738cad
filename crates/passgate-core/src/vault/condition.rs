//! Access-control conditions gating key release.
//!
//! A condition is a declarative predicate in the key-release network's wire
//! form: `{chain, method, parameters, returnValueTest{comparator, value}}`.
//! With an empty `method` and `parameters == [":userAddress"]` the predicate
//! compares the signer's recovered address against `value`. A list of
//! conditions is satisfied only when every entry is.

use serde::{Deserialize, Serialize};

use crate::error::{GateError, GateResult};
use crate::types::Address;

/// Placeholder the key-release service substitutes with the recovered signer
pub const USER_ADDRESS_PARAM: &str = ":userAddress";

/// Chain named in conditions created by this vault
pub const DEFAULT_CONDITION_CHAIN: &str = "ethereum";

/// Comparison applied to the method's return value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnValueTest {
    pub comparator: String,
    pub value: String,
}

/// One key-release predicate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControlCondition {
    pub chain: String,
    pub method: String,
    pub parameters: Vec<String>,
    #[serde(rename = "returnValueTest")]
    pub return_value_test: ReturnValueTest,
}

impl AccessControlCondition {
    /// "Caller address equals `owner`"
    pub fn owner_equals(owner: &Address) -> Self {
        Self {
            chain: DEFAULT_CONDITION_CHAIN.to_string(),
            method: String::new(),
            parameters: vec![USER_ADDRESS_PARAM.to_string()],
            return_value_test: ReturnValueTest {
                comparator: "=".to_string(),
                value: owner.to_checksum(),
            },
        }
    }

    /// Evaluate against the recovered signer address
    pub fn evaluate(&self, signer: &Address) -> GateResult<bool> {
        if !self.method.is_empty() {
            return Err(GateError::AccessConditionNotSatisfied(format!(
                "unsupported condition method '{}'",
                self.method
            )));
        }
        if self.parameters.first().map(String::as_str) != Some(USER_ADDRESS_PARAM) {
            return Err(GateError::AccessConditionNotSatisfied(format!(
                "unsupported condition parameters {:?}",
                self.parameters
            )));
        }

        let expected = Address::parse(&self.return_value_test.value).map_err(|_| {
            GateError::AccessConditionNotSatisfied(format!(
                "condition value '{}' is not an address",
                self.return_value_test.value
            ))
        })?;

        match self.return_value_test.comparator.as_str() {
            "=" | "==" => Ok(signer == &expected),
            "!=" => Ok(signer != &expected),
            other => Err(GateError::AccessConditionNotSatisfied(format!(
                "unsupported comparator '{}'",
                other
            ))),
        }
    }
}

/// True when every condition holds for `signer`; an empty list never holds
pub fn all_satisfied(conditions: &[AccessControlCondition], signer: &Address) -> GateResult<bool> {
    if conditions.is_empty() {
        return Ok(false);
    }
    for condition in conditions {
        if !condition.evaluate(signer)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Canonical JSON of a condition list, as stored in the wire record
pub fn conditions_to_json(conditions: &[AccessControlCondition]) -> GateResult<String> {
    serde_json::to_string(conditions)
        .map_err(|e| GateError::Encryption(format!("failed to serialize conditions: {}", e)))
}

pub fn conditions_from_json(json: &str) -> GateResult<Vec<AccessControlCondition>> {
    serde_json::from_str(json)
        .map_err(|e| GateError::Decryption(format!("invalid access conditions: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        Address::from_bytes([byte; 20])
    }

    #[test]
    fn test_wire_form() {
        let condition = AccessControlCondition::owner_equals(&addr(0xab));
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json["chain"], "ethereum");
        assert_eq!(json["method"], "");
        assert_eq!(json["parameters"][0], ":userAddress");
        assert_eq!(json["returnValueTest"]["comparator"], "=");
        assert_eq!(
            json["returnValueTest"]["value"].as_str().unwrap().to_lowercase(),
            addr(0xab).to_string()
        );
    }

    #[test]
    fn test_owner_condition() {
        let condition = AccessControlCondition::owner_equals(&addr(1));
        assert!(condition.evaluate(&addr(1)).unwrap());
        assert!(!condition.evaluate(&addr(2)).unwrap());
    }

    #[test]
    fn test_value_compare_ignores_case() {
        let mut condition = AccessControlCondition::owner_equals(&addr(0xab));
        condition.return_value_test.value = condition.return_value_test.value.to_uppercase().replace("0X", "0x");
        assert!(condition.evaluate(&addr(0xab)).unwrap());
    }

    #[test]
    fn test_unsupported_forms_are_rejected() {
        let mut condition = AccessControlCondition::owner_equals(&addr(1));
        condition.method = "balanceOf".to_string();
        assert!(condition.evaluate(&addr(1)).is_err());

        let mut condition = AccessControlCondition::owner_equals(&addr(1));
        condition.return_value_test.comparator = ">".to_string();
        assert!(condition.evaluate(&addr(1)).is_err());
    }

    #[test]
    fn test_all_satisfied() {
        let conditions = vec![AccessControlCondition::owner_equals(&addr(1))];
        assert!(all_satisfied(&conditions, &addr(1)).unwrap());
        assert!(!all_satisfied(&conditions, &addr(2)).unwrap());
        assert!(!all_satisfied(&[], &addr(1)).unwrap());

        let json = conditions_to_json(&conditions).unwrap();
        assert_eq!(conditions_from_json(&json).unwrap(), conditions);
    }
}
