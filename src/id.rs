//! Opaque identifier codec (C1).
//!
//! Every artifact the core hands back to a caller - Container,
//! Directory, File, Secret, Socket, Cache - is an opaque, content-addressed
//! token: a base64 envelope around a tagged sha256 digest. Two equal
//! records always encode to the same id; the only way to produce one is
//! to hash a value, never to construct it from parts.

use crate::hash::Digest256;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IdKind {
    Container,
    Directory,
    File,
    Secret,
    Socket,
    Cache,
    Stream,
}

impl IdKind {
    fn tag(self) -> &'static str {
        match self {
            IdKind::Container => "container",
            IdKind::Directory => "dir",
            IdKind::File => "file",
            IdKind::Secret => "secret",
            IdKind::Socket => "socket",
            IdKind::Cache => "cache",
            IdKind::Stream => "stream",
        }
    }

    fn from_tag(tag: &str) -> Option<IdKind> {
        Some(match tag {
            "container" => IdKind::Container,
            "dir" => IdKind::Directory,
            "file" => IdKind::File,
            "secret" => IdKind::Secret,
            "socket" => IdKind::Socket,
            "cache" => IdKind::Cache,
            "stream" => IdKind::Stream,
            _ => return None,
        })
    }
}

/// A decode failure for an opaque id string: malformed envelope, unknown
/// tag, or a tag that doesn't match the kind the caller expected.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct IdDecodeError(pub String);

/// Any decoded id, used only to report [`crate::error::CoreError::InvalidId`]
/// without needing a generic error variant per id kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnyId(pub String);

impl fmt::Display for AnyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AnyId {
    fn from(s: String) -> AnyId {
        AnyId(s)
    }
}

impl From<&str> for AnyId {
    fn from(s: &str) -> AnyId {
        AnyId(s.to_string())
    }
}

/// Marker-typed opaque id. `Id<Container>`, `Id<Directory>`, etc. are
/// distinct types even though they share a representation, so the
/// compiler rejects passing a `FileId` where a `DirectoryId` is expected.
pub struct Id<Kind> {
    digest: Digest256,
    _marker: PhantomData<fn() -> Kind>,
}

impl<Kind> Clone for Id<Kind> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<Kind> Copy for Id<Kind> {}
impl<Kind> PartialEq for Id<Kind> {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}
impl<Kind> Eq for Id<Kind> {}
impl<Kind> PartialOrd for Id<Kind> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<Kind> Ord for Id<Kind> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.digest.cmp(&other.digest)
    }
}
impl<Kind> std::hash::Hash for Id<Kind> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.digest.hash(state)
    }
}

pub trait IdMarker {
    const KIND: IdKind;
}

impl<Kind: IdMarker> Id<Kind> {
    pub fn of_value<T: Serialize>(value: &T) -> Self {
        Id {
            digest: Digest256::of_value(value),
            _marker: PhantomData,
        }
    }

    pub fn digest(&self) -> Digest256 {
        self.digest
    }

    pub fn encode(&self) -> String {
        let envelope = format!("{}:{}", Kind::KIND.tag(), self.digest);
        URL_SAFE_NO_PAD.encode(envelope)
    }

    pub fn decode(encoded: &str) -> Result<Self, IdDecodeError> {
        let raw = URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| IdDecodeError(format!("invalid base64 id envelope: {}", e)))?;
        let raw = String::from_utf8(raw)
            .map_err(|e| IdDecodeError(format!("id envelope was not utf8: {}", e)))?;
        let (tag, digest_str) = raw
            .split_once(':')
            .ok_or_else(|| IdDecodeError(format!("malformed id envelope: {:?}", raw)))?;
        let kind = IdKind::from_tag(tag)
            .ok_or_else(|| IdDecodeError(format!("unknown id kind tag: {:?}", tag)))?;
        if kind != Kind::KIND {
            return Err(IdDecodeError(format!(
                "expected id of kind {:?}, got {:?}",
                Kind::KIND,
                kind
            )));
        }
        let hex = digest_str
            .strip_prefix("sha256:")
            .ok_or_else(|| IdDecodeError(format!("unsupported digest scheme in {:?}", digest_str)))?;
        let digest = Digest256::from_hex(hex)
            .ok_or_else(|| IdDecodeError(format!("malformed sha256 hex in id: {:?}", hex)))?;
        Ok(Id {
            digest,
            _marker: PhantomData,
        })
    }
}

impl<Kind: IdMarker> fmt::Display for Id<Kind> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl<Kind: IdMarker> fmt::Debug for Id<Kind> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({:?}, {})", Kind::KIND, self.digest)
    }
}

impl<Kind: IdMarker> FromStr for Id<Kind> {
    type Err = IdDecodeError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Id::decode(s)
    }
}

impl<Kind: IdMarker> Serialize for Id<Kind> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de, Kind: IdMarker> Deserialize<'de> for Id<Kind> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Id::decode(&s).map_err(serde::de::Error::custom)
    }
}

macro_rules! id_kind {
    ($marker:ident, $alias:ident, $kind:expr) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $marker;
        impl IdMarker for $marker {
            const KIND: IdKind = $kind;
        }
        pub type $alias = Id<$marker>;
    };
}

id_kind!(ContainerMarker, ContainerId, IdKind::Container);
id_kind!(DirectoryMarker, DirectoryId, IdKind::Directory);
id_kind!(FileMarker, FileId, IdKind::File);
id_kind!(SecretMarker, SecretId, IdKind::Secret);
id_kind!(SocketMarker, SocketId, IdKind::Socket);
id_kind!(CacheVolumeMarker, CacheVolumeId, IdKind::Cache);
id_kind!(StreamMarker, StreamId, IdKind::Stream);

impl<Kind: IdMarker> From<Id<Kind>> for AnyId {
    fn from(id: Id<Kind>) -> AnyId {
        AnyId(id.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let id = DirectoryId::of_value(&"some directory content");
        let encoded = id.encode();
        let decoded = DirectoryId::decode(&encoded).unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn equal_values_produce_equal_ids() {
        let a = FileId::of_value(&("name", "content"));
        let b = FileId::of_value(&("name", "content"));
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_cross_kind_decode() {
        let dir_id = DirectoryId::of_value(&"x");
        let encoded = dir_id.encode();
        assert!(FileId::decode(&encoded).is_err());
    }
}
