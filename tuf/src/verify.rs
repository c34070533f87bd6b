//! Signature-threshold verification for role metadata.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::crypto::verify_signature;
use crate::data::{PublicKey, RoleName, Signed};
use crate::error::{Result, TufError};

/// The fields every role body shares, used for type and expiry checks
/// without committing to a full parse.
#[derive(Debug, Deserialize)]
pub struct SignedCommon {
    #[serde(rename = "_type")]
    pub type_: String,
    pub version: u64,
    pub expires: DateTime<Utc>,
}

/// Verify `signed` for `role` against `keys` with the given `threshold`.
///
/// Signatures from key ids not present in `keys` are ignored, as are
/// signatures whose method does not match their key's algorithm. The
/// count that must meet the threshold is of *distinct* key ids with a
/// valid signature.
///
/// When `now` is `Some`, the body's `_type` must match the role and its
/// `expires` must be in the future. Passing `None` checks signatures only;
/// root rotation uses this to validate a new root against old keys whose
/// metadata may already be expired.
pub fn verify_signed(
    role: RoleName,
    signed: &Signed,
    keys: &BTreeMap<String, PublicKey>,
    threshold: u32,
    now: Option<DateTime<Utc>>,
) -> Result<()> {
    if threshold < 1 {
        return Err(TufError::InvalidOperation {
            msg: format!("role {} has invalid threshold 0", role),
        });
    }

    let message = signed.canonical_bytes()?;
    let mut valid: BTreeSet<&str> = BTreeSet::new();
    for sig in &signed.signatures {
        if valid.contains(sig.key_id.as_str()) {
            continue;
        }
        let Some(key) = keys.get(&sig.key_id) else {
            continue;
        };
        if key.algorithm.sig_method() != sig.method {
            continue;
        }
        match verify_signature(key, sig.method, &message, &sig.sig) {
            Ok(true) => {
                valid.insert(sig.key_id.as_str());
            }
            Ok(false) => {}
            // Unparseable key material in the trusted set is a hard error,
            // not a skipped signature.
            Err(e) => return Err(e),
        }
    }

    if (valid.len() as u32) < threshold {
        return Err(TufError::InsufficientSignatures { role });
    }

    if let Some(now) = now {
        let common: SignedCommon = serde_json::from_value(signed.signed.clone())?;
        if common.type_ != role.body_type() {
            return Err(TufError::WrongType { role, actual: common.type_ });
        }
        if common.expires <= now {
            return Err(TufError::Expired { role, expires: common.expires.to_rfc3339() });
        }
    }

    Ok(())
}
