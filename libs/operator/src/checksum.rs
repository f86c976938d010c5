use crate::error::{Error, Result};

use md5::Md5;
use serde::Serialize;
use sha2::{Digest, Sha256, Sha512};
use storm_types::common::{ChecksumAlgorithm, ChecksumSpec};

/// Hex-encodes the digest of `bytes` under the given algorithm. Used both to
/// verify a resolved jar against its declared `ChecksumSpec` and to compute
/// the checksum recorded in `status.jarChecksum` when none was declared.
pub fn digest(algorithm: ChecksumAlgorithm, bytes: &[u8]) -> String {
    match algorithm {
        ChecksumAlgorithm::Md5 => hex(Md5::digest(bytes).as_slice()),
        ChecksumAlgorithm::Sha256 => hex(Sha256::digest(bytes).as_slice()),
        ChecksumAlgorithm::Sha512 => hex(Sha512::digest(bytes).as_slice()),
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Verifies a resolved jar's bytes against a declared checksum, returning a
/// permanent error (no amount of retrying fixes a bad checksum) on mismatch.
pub fn verify(spec: &ChecksumSpec, bytes: &[u8]) -> Result<()> {
    let actual = digest(spec.algorithm, bytes);
    if actual.eq_ignore_ascii_case(&spec.value) {
        Ok(())
    } else {
        Err(Error::Permanent(format!(
            "checksum mismatch: expected {} ({:?}), got {actual}",
            spec.value, spec.algorithm
        )))
    }
}

/// Computes a deterministic fingerprint of a spec (or any serializable
/// substructure of one) by canonicalizing it through `serde_json` and
/// hashing the resulting bytes with SHA-256. Reconcilers use this to short
/// circuit: if the fingerprint recorded in `status` already matches, the
/// expensive part of reconciliation (jar resolution, Nimbus round-trips)
/// can be skipped.
///
/// `serde_json`'s map serialization is insertion-order, not key-order, so
/// this is only deterministic across calls when the input's own field
/// order is stable — true for our generated CRD structs, whose fields are
/// serialized in declaration order.
pub fn fingerprint<T: Serialize>(value: &T) -> Result<String> {
    let bytes = serde_json::to_vec(value)?;
    Ok(digest(ChecksumAlgorithm::Sha256, &bytes))
}

#[cfg(test)]
mod test {
    use super::*;
    use storm_types::common::ChecksumAlgorithm;

    #[test]
    fn sha256_matches_known_vector() {
        let d = digest(ChecksumAlgorithm::Sha256, b"hello");
        assert_eq!(
            d,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn verify_rejects_mismatch() {
        let spec = ChecksumSpec {
            algorithm: ChecksumAlgorithm::Sha256,
            value: "deadbeef".into(),
        };
        assert!(verify(&spec, b"hello").is_err());
    }

    #[test]
    fn fingerprint_is_deterministic() {
        #[derive(Serialize)]
        struct S {
            a: i32,
            b: String,
        }
        let s = S {
            a: 1,
            b: "x".into(),
        };
        assert_eq!(fingerprint(&s).unwrap(), fingerprint(&s).unwrap());
    }
}
