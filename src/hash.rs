//! Content fingerprinting.
//!
//! Two kinds of digests are produced here:
//!
//! - **Fingerprints**: SHA-256 over either raw UTF-8 text or the canonical
//!   encoding of a structured [`Canonical`] value. Used as change-detection
//!   keys for tickets and pull requests.
//! - **Chunk identities**: a shorter (128-bit) SHA-256 prefix over
//!   `"{file_path}:{chunk_index}:{content}"`, used as the document key in the
//!   index store so re-submission overwrites in place.
//!
//! # Canonical encoding
//!
//! Composite values are rendered as sorted-key JSON with `", "` and `": "`
//! separators and ASCII-only string escapes, produced by `serde_json` with
//! a custom formatter. Unordered collections ([`Canonical::Set`]) are sorted
//! before rendering (text by value, composites by their encoding), so input
//! order never affects the digest. The rendering is
//! byte-compatible with records written by earlier releases, which keeps
//! migrated cache entries comparable.
//!
//! ```rust
//! use pr_context::hash::ticket_fingerprint;
//!
//! let a = ticket_fingerprint("done when green", &["r1".into(), "r2".into()]);
//! let b = ticket_fingerprint("done when green", &["r2".into(), "r1".into()]);
//! assert_eq!(a, b);
//! ```

use std::collections::BTreeMap;
use std::io;

use serde::Serialize;
use serde_json::ser::{Formatter, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Bytes of SHA-256 output kept for chunk identities.
const CHUNK_ID_BYTES: usize = 16;

/// A structured value prepared for canonical hashing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Canonical {
    Text(String),
    /// Ordered sequence; element order is significant.
    List(Vec<Canonical>),
    /// Unordered collection; sorted before encoding.
    Set(Vec<Canonical>),
    Map(BTreeMap<String, Canonical>),
}

impl Canonical {
    pub fn text(s: impl Into<String>) -> Self {
        Canonical::Text(s.into())
    }

    pub fn set_of<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Canonical::Set(items.into_iter().map(|s| Canonical::Text(s.into())).collect())
    }

    pub fn list_of<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Canonical::List(items.into_iter().map(|s| Canonical::Text(s.into())).collect())
    }

    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Canonical)>,
        K: Into<String>,
    {
        Canonical::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Render the canonical byte form of this value.
    pub fn encode(&self) -> String {
        let mut out = Vec::new();
        let mut ser = Serializer::with_formatter(&mut out, CanonicalFormatter);
        // Serializing a `Value` into a `Vec` has no failure path.
        let _ = self.to_value().serialize(&mut ser);
        String::from_utf8_lossy(&out).into_owned()
    }

    fn to_value(&self) -> Value {
        match self {
            Canonical::Text(s) => Value::String(s.clone()),
            Canonical::List(items) => Value::Array(items.iter().map(Canonical::to_value).collect()),
            Canonical::Set(items) => {
                let mut keyed: Vec<(String, &Canonical)> =
                    items.iter().map(|item| (item.sort_key(), item)).collect();
                keyed.sort_by(|a, b| a.0.cmp(&b.0));
                Value::Array(keyed.into_iter().map(|(_, item)| item.to_value()).collect())
            }
            Canonical::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_value()))
                    .collect(),
            ),
        }
    }

    /// Text sorts by its raw value, composites by their encoding.
    fn sort_key(&self) -> String {
        match self {
            Canonical::Text(s) => s.clone(),
            other => other.encode(),
        }
    }
}

/// JSON with `", "` / `": "` separators and non-ASCII characters escaped
/// as UTF-16 `\uXXXX` units.
struct CanonicalFormatter;

impl Formatter for CanonicalFormatter {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }

    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if fragment.is_ascii() {
            return writer.write_all(fragment.as_bytes());
        }
        let mut units = [0u16; 2];
        for c in fragment.chars() {
            if c.is_ascii() {
                writer.write_all(&[c as u8])?;
            } else {
                for unit in c.encode_utf16(&mut units).iter() {
                    write!(writer, "\\u{:04x}", unit)?;
                }
            }
        }
        Ok(())
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Fingerprint a structured value.
///
/// Plain text is hashed as its UTF-8 bytes; composites are hashed over
/// their canonical encoding.
pub fn fingerprint(value: &Canonical) -> String {
    match value {
        Canonical::Text(s) => hash_text(s),
        other => sha256_hex(other.encode().as_bytes()),
    }
}

/// SHA-256 hex digest of a string's UTF-8 bytes.
pub fn hash_text(text: &str) -> String {
    sha256_hex(text.as_bytes())
}

/// Fingerprint of a ticket's Definition-of-Done text and requirement list.
///
/// Requirements are treated as an unordered set.
pub fn ticket_fingerprint(dod_text: &str, requirements: &[String]) -> String {
    fingerprint(&Canonical::map([
        ("dod_text", Canonical::text(dod_text)),
        ("requirements", Canonical::set_of(requirements.iter().cloned())),
    ]))
}

/// Fingerprint of a pull request's changed file names and commit ids.
///
/// Both collections are treated as unordered sets.
pub fn pull_request_fingerprint<F, C>(file_names: &[F], commits: &[C]) -> String
where
    F: AsRef<str>,
    C: AsRef<str>,
{
    fingerprint(&Canonical::map([
        (
            "commits",
            Canonical::set_of(commits.iter().map(|c| c.as_ref().to_string())),
        ),
        (
            "files",
            Canonical::set_of(file_names.iter().map(|f| f.as_ref().to_string())),
        ),
    ]))
}

/// Identity of a chunk: a pure function of `(file_path, chunk_index, content)`.
pub fn chunk_identity(file_path: &str, chunk_index: usize, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(b":");
    hasher.update(chunk_index.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(content.as_bytes());
    hex::encode(&hasher.finalize()[..CHUNK_ID_BYTES])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_stable() {
        assert_eq!(hash_text("abc"), hash_text("abc"));
        assert_eq!(
            hash_text("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash_sensitivity() {
        assert_ne!(hash_text("a"), hash_text("b"));
        assert_ne!(
            ticket_fingerprint("a", &["r1".into()]),
            ticket_fingerprint("a", &["r2".into()])
        );
        assert_ne!(
            ticket_fingerprint("a", &["r1".into()]),
            ticket_fingerprint("b", &["r1".into()])
        );
    }

    #[test]
    fn test_requirement_order_independent() {
        let a = ticket_fingerprint("a", &["r1".into(), "r2".into()]);
        let b = ticket_fingerprint("a", &["r2".into(), "r1".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprints_match_legacy_records() {
        assert_eq!(
            ticket_fingerprint("a", &["r2".into(), "r1".into()]),
            "f5b7c3c154b033521838da6c905489131f13c43e4fb14d704e717b9231863a87"
        );
        assert_eq!(
            pull_request_fingerprint(&["b.py", "a.py"], &["abc"]),
            "6b4b7eacd33858abe50908bd42491668b3b0b3f72db784fc8ef2242d04866147"
        );
    }

    #[test]
    fn test_list_order_is_significant() {
        let a = fingerprint(&Canonical::list_of(["x", "y"]));
        let b = fingerprint(&Canonical::list_of(["y", "x"]));
        assert_ne!(a, b);
    }

    #[test]
    fn test_map_key_order_independent() {
        let mut left = BTreeMap::new();
        left.insert("b".to_string(), Canonical::text("2"));
        left.insert("a".to_string(), Canonical::text("1"));
        let right = Canonical::map([("a", Canonical::text("1")), ("b", Canonical::text("2"))]);
        assert_eq!(fingerprint(&Canonical::Map(left)), fingerprint(&right));
    }

    #[test]
    fn test_canonical_encoding_shape() {
        let value = Canonical::map([
            ("requirements", Canonical::set_of(["r2", "r1"])),
            ("dod_text", Canonical::text("a")),
        ]);
        assert_eq!(
            value.encode(),
            r#"{"dod_text": "a", "requirements": ["r1", "r2"]}"#
        );
    }

    #[test]
    fn test_string_escaping_is_ascii_only() {
        let value = Canonical::list_of(["é\"\n", "\u{1F600}"]);
        assert_eq!(value.encode(), r#"["\u00e9\"\n", "\ud83d\ude00"]"#);
    }

    #[test]
    fn test_control_and_delete_characters() {
        let value = Canonical::list_of(["\u{1f}\u{7f}"]);
        assert_eq!(value.encode(), "[\"\\u001f\u{7f}\"]");
    }

    #[test]
    fn test_text_sets_sort_by_raw_value() {
        // '"' sorts before '#', although its escaped form does not.
        let value = Canonical::set_of(["a#", "a\""]);
        assert_eq!(value.encode(), r#"["a\"", "a#"]"#);
    }

    #[test]
    fn test_nested_sets_sort_by_encoding() {
        let a = Canonical::Set(vec![Canonical::list_of(["b"]), Canonical::list_of(["a"])]);
        let b = Canonical::Set(vec![Canonical::list_of(["a"]), Canonical::list_of(["b"])]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_pull_request_fingerprint_order_independent() {
        let a = pull_request_fingerprint(&["src/a.rs", "src/b.rs"], &["abc"]);
        let b = pull_request_fingerprint(&["src/b.rs", "src/a.rs"], &["abc"]);
        assert_eq!(a, b);
        let c = pull_request_fingerprint(&["src/a.rs", "src/b.rs"], &["abd"]);
        assert_ne!(a, c);
    }

    #[test]
    fn test_chunk_identity() {
        let a = chunk_identity("src/lib.rs", 0, "fn main() {}");
        assert_eq!(a.len(), CHUNK_ID_BYTES * 2);
        assert_eq!(a, chunk_identity("src/lib.rs", 0, "fn main() {}"));
        assert_ne!(a, chunk_identity("src/lib.rs", 1, "fn main() {}"));
        assert_ne!(a, chunk_identity("src/main.rs", 0, "fn main() {}"));
        assert_ne!(a, chunk_identity("src/lib.rs", 0, "fn main() { }"));
    }
}
