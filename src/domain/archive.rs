//! Archive records for deleted numbered documents.
//!
//! An archive record keeps a deleted document's number retired and, when the
//! deleting caller supplied the content, a digest of that content. The raw
//! content is never stored. Each digest carries a versioned algorithm
//! identifier so that old records stay verifiable if the default algorithm
//! changes.

use crate::domain::scope::{DocumentNumber, ScopeKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::SystemTime;

/// Versioned content digest algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DigestAlgorithm {
    /// SHA-256 over the raw content bytes, hex encoded for display.
    #[serde(rename = "sha256-v1")]
    Sha256V1,
}

impl DigestAlgorithm {
    /// Algorithm used for new records.
    pub const CURRENT: DigestAlgorithm = DigestAlgorithm::Sha256V1;

    /// Stable identifier stored alongside every digest.
    pub fn id(&self) -> &'static str {
        match self {
            DigestAlgorithm::Sha256V1 => "sha256-v1",
        }
    }

    /// Compute the digest of `content`.
    pub fn digest(&self, content: &[u8]) -> ContentDigest {
        match self {
            DigestAlgorithm::Sha256V1 => ContentDigest {
                algorithm: *self,
                bytes: Sha256::digest(content).to_vec(),
            },
        }
    }
}

impl fmt::Display for DigestAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// A digest together with the algorithm that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest {
    algorithm: DigestAlgorithm,
    bytes: Vec<u8>,
}

impl ContentDigest {
    /// Digest `content` with the current algorithm.
    pub fn of(content: &[u8]) -> Self {
        DigestAlgorithm::CURRENT.digest(content)
    }

    /// The algorithm that produced this digest.
    pub fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lowercase hex encoding of the digest bytes.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Recompute the digest of `content` with this digest's algorithm and
    /// compare.
    pub fn matches(&self, content: &[u8]) -> bool {
        self.algorithm.digest(content).bytes == self.bytes
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.to_hex())
    }
}

/// Immutable record of a deleted numbered document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    scope: ScopeKey,
    number: DocumentNumber,
    deleted_at: SystemTime,
    reason: Option<String>,
    content_hash: Option<ContentDigest>,
}

impl ArchiveRecord {
    /// Build a record, hashing `raw_content` when present.
    pub fn new(
        scope: ScopeKey,
        number: DocumentNumber,
        deleted_at: SystemTime,
        reason: Option<String>,
        raw_content: Option<&[u8]>,
    ) -> Self {
        Self {
            scope,
            number,
            deleted_at,
            reason,
            content_hash: raw_content.map(ContentDigest::of),
        }
    }

    /// Scope that issued the number.
    pub fn scope(&self) -> &ScopeKey {
        &self.scope
    }

    /// The retired number.
    pub fn number(&self) -> DocumentNumber {
        self.number
    }

    /// When the live document was deleted.
    pub fn deleted_at(&self) -> SystemTime {
        self.deleted_at
    }

    /// Deletion reason, if one was given.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Digest of the deleted content, if content was supplied.
    pub fn content_hash(&self) -> Option<&ContentDigest> {
        self.content_hash.as_ref()
    }

    /// Whether `content` is what was archived.
    ///
    /// Returns `None` when the record carries no digest.
    pub fn verify(&self, content: &[u8]) -> Option<bool> {
        self.content_hash.as_ref().map(|digest| digest.matches(content))
    }

    /// Whether a retried archive call describes the same deletion.
    ///
    /// The deletion time is ignored: a retry naturally happens later.
    pub fn same_deletion(&self, reason: Option<&str>, content_hash: Option<&ContentDigest>) -> bool {
        self.reason.as_deref() == reason && self.content_hash.as_ref() == content_hash
    }
}
