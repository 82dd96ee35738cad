//! ============================================================================
//! Wallet Signatures - EIP-191 personal_sign recovery
//! ============================================================================
//! A wallet proves control by signing a human-readable message. The message is
//! hashed with the `\x19Ethereum Signed Message:\n<len>` prefix, the public key
//! is recovered from the 65-byte `r || s || v` signature, and the address is the
//! last 20 bytes of keccak256 over the uncompressed key.
//! ============================================================================

use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use sha3::{Digest, Keccak256};
use tracing::debug;

use crate::error::{GateError, GateResult};
use crate::types::Address;

/// Length of an `r || s || v` signature
pub const SIGNATURE_LEN: usize = 65;

/// A signature together with the address its holder claims
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletSignature {
    pub address: Address,
    pub signature: Vec<u8>,
}

impl WalletSignature {
    pub fn new(address: Address, signature: Vec<u8>) -> Self {
        Self { address, signature }
    }

    /// Parse a claimed address and a `0x`-prefixed hex signature
    pub fn from_hex(address: &str, signature: &str) -> GateResult<Self> {
        let address = Address::parse(address)?;
        let signature = hex::decode(signature.trim_start_matches("0x"))
            .map_err(|e| GateError::Authentication(format!("signature is not hex: {}", e)))?;
        Ok(Self { address, signature })
    }

    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(&self.signature))
    }
}

/// keccak256 of the EIP-191 prefixed message
pub fn hash_message(message: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(format!("\x19Ethereum Signed Message:\n{}", message.len()).as_bytes());
    hasher.update(message);
    hasher.finalize().into()
}

/// Address derived from a secp256k1 public key
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = Keccak256::digest(&point.as_bytes()[1..]);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash[12..]);
    Address::from_bytes(bytes)
}

/// Recover the signing address of `signature` over `message`
pub fn recover_address(message: &[u8], signature: &[u8]) -> GateResult<Address> {
    if signature.len() != SIGNATURE_LEN {
        return Err(GateError::Authentication(format!(
            "signature must be {} bytes, got {}",
            SIGNATURE_LEN,
            signature.len()
        )));
    }

    let v = signature[64];
    let recovery_byte = match v {
        0 | 1 => v,
        27 | 28 => v - 27,
        other => {
            return Err(GateError::Authentication(format!(
                "invalid recovery byte: {}",
                other
            )))
        }
    };

    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| GateError::Authentication(format!("malformed signature: {}", e)))?;
    let recovery_id = RecoveryId::from_byte(recovery_byte)
        .ok_or_else(|| GateError::Authentication("invalid recovery id".to_string()))?;

    let prehash = hash_message(message);
    let key = VerifyingKey::recover_from_prehash(&prehash, &sig, recovery_id)
        .map_err(|e| GateError::Authentication(format!("signature recovery failed: {}", e)))?;

    Ok(address_of(&key))
}

/// True when `signature` over `message` was produced by `address`
pub fn verify_signature(address: &Address, signature: &[u8], message: &[u8]) -> bool {
    match recover_address(message, signature) {
        Ok(recovered) => {
            if &recovered != address {
                debug!("Signature recovered {} but {} was claimed", recovered, address);
            }
            &recovered == address
        }
        Err(e) => {
            debug!("Signature verification failed: {}", e);
            false
        }
    }
}

/// Local secp256k1 key that signs messages the way a wallet does
pub struct WalletSigner {
    key: SigningKey,
    address: Address,
}

impl WalletSigner {
    /// Fresh random key
    pub fn random() -> Self {
        Self::from_key(SigningKey::random(&mut rand::rngs::OsRng))
    }

    /// Key from 32 secret bytes
    pub fn from_secret(secret: &[u8]) -> GateResult<Self> {
        let key = SigningKey::from_slice(secret)
            .map_err(|e| GateError::Config(format!("invalid signing key: {}", e)))?;
        Ok(Self::from_key(key))
    }

    fn from_key(key: SigningKey) -> Self {
        let address = address_of(key.verifying_key());
        Self { key, address }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// personal_sign: 65 bytes with `v` in {27, 28}
    pub fn sign_message(&self, message: &[u8]) -> GateResult<Vec<u8>> {
        let prehash = hash_message(message);
        let (sig, recovery_id) = self
            .key
            .sign_prehash_recoverable(&prehash)
            .map_err(|e| GateError::Authentication(format!("signing failed: {}", e)))?;

        let mut out = sig.to_bytes().to_vec();
        out.push(27 + recovery_id.to_byte());
        Ok(out)
    }

    /// Sign and bundle with this signer's address
    pub fn wallet_signature(&self, message: &[u8]) -> GateResult<WalletSignature> {
        Ok(WalletSignature::new(self.address, self.sign_message(message)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_key_address() {
        // Private key 0x...01 maps to the well-known generator address
        let mut secret = [0u8; 32];
        secret[31] = 1;
        let signer = WalletSigner::from_secret(&secret).unwrap();
        assert_eq!(
            signer.address().to_string(),
            "0x7e5f4552091a69125d5dfcb7b8c2659029395bdf"
        );
    }

    #[test]
    fn test_sign_and_recover() {
        let signer = WalletSigner::random();
        let message = b"Authorize access for wallet";
        let sig = signer.sign_message(message).unwrap();

        assert_eq!(sig.len(), SIGNATURE_LEN);
        assert_eq!(recover_address(message, &sig).unwrap(), signer.address());
        assert!(verify_signature(&signer.address(), &sig, message));
    }

    #[test]
    fn test_wrong_message_does_not_verify() {
        let signer = WalletSigner::random();
        let sig = signer.sign_message(b"message one").unwrap();
        assert!(!verify_signature(&signer.address(), &sig, b"message two"));
    }

    #[test]
    fn test_other_wallet_does_not_verify() {
        let alice = WalletSigner::random();
        let bob = WalletSigner::random();
        let sig = bob.sign_message(b"hello").unwrap();
        assert!(!verify_signature(&alice.address(), &sig, b"hello"));
    }

    #[test]
    fn test_rejects_malformed_signatures() {
        let signer = WalletSigner::random();
        assert!(!verify_signature(&signer.address(), &[], b"x"));
        assert!(!verify_signature(&signer.address(), &[0u8; 65], b"x"));

        let mut sig = signer.sign_message(b"x").unwrap();
        sig[64] = 35;
        assert!(matches!(
            recover_address(b"x", &sig),
            Err(GateError::Authentication(_))
        ));
    }

    #[test]
    fn test_accepts_zero_based_recovery_byte() {
        let signer = WalletSigner::random();
        let mut sig = signer.sign_message(b"compat").unwrap();
        sig[64] -= 27;
        assert!(verify_signature(&signer.address(), &sig, b"compat"));
    }

    #[test]
    fn test_wallet_signature_hex_roundtrip() {
        let signer = WalletSigner::random();
        let ws = signer.wallet_signature(b"hex").unwrap();
        let parsed = WalletSignature::from_hex(&ws.address.to_checksum(), &ws.to_hex()).unwrap();
        assert_eq!(parsed, ws);
    }
}
