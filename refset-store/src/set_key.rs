//! Cache key namespace for membership sets.
//!
//! Every referenced relation gets one named set in the external store. The
//! name is derived deterministically from the relation descriptor, so every
//! process validating against the same relation shares one set.

use refset_core::{FieldValue, RelationRef};

/// Separator byte between the set name and the record tag.
///
/// 0xFF never occurs in UTF-8, so the first 0xFF in an encoded key is always
/// the namespace boundary.
const SEPARATOR: u8 = 0xFF;

/// Tag byte for the per-set metadata record (holds the expiry).
const META_TAG: u8 = 0x00;

/// Tag byte for a member presence record.
const MEMBER_TAG: u8 = 0x01;

/// The cache key namespace for one relation's membership set.
///
/// # Naming
///
/// The string name is `set_{field}_for_{entity}`, shared verbatim with
/// wire-protocol stores. Embedded stores append a binary suffix per record:
///
/// - metadata record: `[name][0xFF][0x00]`
/// - member record:   `[name][0xFF][0x01][member bytes]`
///
/// All records of one set share the `[name][0xFF]` prefix, so a single range
/// scan covers the whole namespace when it has to be purged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SetKey {
    name: String,
}

impl SetKey {
    /// Derive the set key for a relation: `set_{field}_for_{entity}`.
    pub fn for_relation(relation: &RelationRef) -> Self {
        Self {
            name: format!("set_{}_for_{}", relation.field(), relation.entity()),
        }
    }

    /// Build a set key from a raw name.
    ///
    /// Prefer [`SetKey::for_relation`]; this exists for callers that manage
    /// their own namespace convention.
    pub fn from_name(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The string name, used directly by wire-protocol stores.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encoded key of the per-set metadata record.
    pub fn meta_key(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.name.len() + 2);
        bytes.extend_from_slice(self.name.as_bytes());
        bytes.push(SEPARATOR);
        bytes.push(META_TAG);
        bytes
    }

    /// Encoded key of one member's presence record.
    pub fn member_key(&self, member: &FieldValue) -> Vec<u8> {
        let member_bytes = member.as_str().as_bytes();
        let mut bytes = Vec::with_capacity(self.name.len() + 2 + member_bytes.len());
        bytes.extend_from_slice(self.name.as_bytes());
        bytes.push(SEPARATOR);
        bytes.push(MEMBER_TAG);
        bytes.extend_from_slice(member_bytes);
        bytes
    }

    /// Prefix shared by every record in this set's namespace.
    pub fn prefix(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.name.len() + 1);
        bytes.extend_from_slice(self.name.as_bytes());
        bytes.push(SEPARATOR);
        bytes
    }

    /// Decode an encoded record key back into its parts.
    ///
    /// Returns `None` if:
    /// - The separator byte is missing
    /// - The tag byte is missing or unknown
    /// - The name or member bytes are not valid UTF-8
    /// - A metadata key carries trailing bytes
    pub fn decode(bytes: &[u8]) -> Option<DecodedKey> {
        let sep = bytes.iter().position(|&b| b == SEPARATOR)?;
        let name = std::str::from_utf8(&bytes[..sep]).ok()?.to_string();
        let tag = *bytes.get(sep + 1)?;
        let rest = &bytes[sep + 2..];

        match tag {
            META_TAG => {
                if !rest.is_empty() {
                    return None;
                }
                Some(DecodedKey::Meta { set: name })
            }
            MEMBER_TAG => {
                let member = std::str::from_utf8(rest).ok()?;
                Some(DecodedKey::Member {
                    set: name,
                    member: FieldValue::from(member),
                })
            }
            _ => None,
        }
    }
}

/// A decoded record key: either the set's metadata record or one member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedKey {
    Meta { set: String },
    Member { set: String, member: FieldValue },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_format() {
        let relation = RelationRef::new("track", "isrc");
        let key = SetKey::for_relation(&relation);
        assert_eq!(key.name(), "set_isrc_for_track");
    }

    #[test]
    fn test_from_name() {
        let key = SetKey::from_name("set_genre_id_for_genre");
        assert_eq!(key.name(), "set_genre_id_for_genre");
    }

    #[test]
    fn test_meta_key_layout() {
        let key = SetKey::from_name("s");
        let meta = key.meta_key();
        assert_eq!(meta, vec![b's', SEPARATOR, META_TAG]);
    }

    #[test]
    fn test_member_key_layout() {
        let key = SetKey::from_name("s");
        let member = key.member_key(&FieldValue::from("ab"));
        assert_eq!(member, vec![b's', SEPARATOR, MEMBER_TAG, b'a', b'b']);
    }

    #[test]
    fn test_prefix_covers_all_records() {
        let key = SetKey::from_name("set_isrc_for_track");
        let prefix = key.prefix();

        assert!(key.meta_key().starts_with(&prefix));
        assert!(key.member_key(&FieldValue::from("X")).starts_with(&prefix));
    }

    #[test]
    fn test_decode_meta_roundtrip() {
        let key = SetKey::from_name("set_isrc_for_track");
        let decoded = SetKey::decode(&key.meta_key()).expect("decode should succeed");
        assert_eq!(
            decoded,
            DecodedKey::Meta {
                set: "set_isrc_for_track".to_string()
            }
        );
    }

    #[test]
    fn test_decode_member_roundtrip() {
        let key = SetKey::from_name("set_isrc_for_track");
        let member = FieldValue::from("USRC17607839");
        let decoded = SetKey::decode(&key.member_key(&member)).expect("decode should succeed");
        assert_eq!(
            decoded,
            DecodedKey::Member {
                set: "set_isrc_for_track".to_string(),
                member,
            }
        );
    }

    #[test]
    fn test_decode_empty_member() {
        let key = SetKey::from_name("s");
        let member = FieldValue::from("");
        let decoded = SetKey::decode(&key.member_key(&member)).expect("decode should succeed");
        assert!(matches!(decoded, DecodedKey::Member { member, .. } if member.is_empty()));
    }

    #[test]
    fn test_decode_rejects_missing_separator() {
        assert!(SetKey::decode(b"no_separator_here").is_none());
        assert!(SetKey::decode(b"").is_none());
    }

    #[test]
    fn test_decode_rejects_truncated_key() {
        // Separator present but no tag byte follows.
        let bytes = [b's', SEPARATOR];
        assert!(SetKey::decode(&bytes).is_none());
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let bytes = [b's', SEPARATOR, 0x7E, b'x'];
        assert!(SetKey::decode(&bytes).is_none());
    }

    #[test]
    fn test_decode_rejects_meta_with_trailing_bytes() {
        let bytes = [b's', SEPARATOR, META_TAG, b'x'];
        assert!(SetKey::decode(&bytes).is_none());
    }

    #[test]
    fn test_different_relations_different_names() {
        let a = SetKey::for_relation(&RelationRef::new("track", "isrc"));
        let b = SetKey::for_relation(&RelationRef::new("track", "track_id"));
        let c = SetKey::for_relation(&RelationRef::new("genre", "isrc"));

        assert_ne!(a.name(), b.name());
        assert_ne!(a.name(), c.name());
    }
}
