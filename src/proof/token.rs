//! Proof tokens: opaque witnesses of a completed proof.

use serde::Serialize;
use std::fmt;

/// Witness attached to a `Verified` job or a proved lemma. Fields are private
/// and tokens are minted only by the proof cache, so holding one means the
/// corresponding obligation was discharged in this process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ProofToken {
    serial: u64,
    fingerprint: u64,
}

impl ProofToken {
    pub(crate) fn mint(serial: u64, fingerprint: u64) -> Self {
        ProofToken { serial, fingerprint }
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    /// Fingerprint of the obligation this token proves.
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

impl fmt::Display for ProofToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "proof#{}:{:016x}", self.serial, self.fingerprint)
    }
}
