//! Block fingerprints and shard selection
//!
//! Every indexed block carries a short BLAKE3 fingerprint over its identity
//! and rendered content. The fingerprint is the only signal the upsert engine
//! uses to decide whether a row has to be rewritten, so it must change whenever
//! any of these inputs change:
//!
//! - container and storage path
//! - display path
//! - canonicalized attributes (sorted by name)
//! - rendered markdown (documents have none)
//! - structural parent and heading parent
//!
//! The same hash function also picks the identity-index shard for a block ID.

use blake3::Hasher;

use crate::content::block_markdown;
use crate::tree::{Node, NodeType};

/// Hex characters kept from the full BLAKE3 digest
pub const FINGERPRINT_LEN: usize = 16;

/// Number of identity-index shards (one per leading digest byte)
pub const SHARD_COUNT: usize = 256;

const SEPARATOR: &[u8] = &[0x1f];

/// Inputs to a block fingerprint that do not live on the node itself
#[derive(Debug, Clone, Copy)]
pub struct FingerprintContext<'a> {
    pub container: &'a str,
    pub path: &'a str,
    pub display_path: &'a str,
    pub parent_id: &'a str,
    pub heading_parent_id: &'a str,
}

/// Content fingerprint of a block
pub fn block_fingerprint(node: &Node, ctx: &FingerprintContext<'_>) -> String {
    let mut hasher = Hasher::new();
    for part in [ctx.container, ctx.path, ctx.display_path] {
        hasher.update(part.as_bytes());
        hasher.update(SEPARATOR);
    }
    hasher.update(ial_string(&node.attrs).as_bytes());
    hasher.update(SEPARATOR);
    if node.node_type != NodeType::Document {
        hasher.update(block_markdown(node).as_bytes());
    }
    hasher.update(SEPARATOR);
    hasher.update(ctx.parent_id.as_bytes());
    hasher.update(SEPARATOR);
    hasher.update(ctx.heading_parent_id.as_bytes());

    let digest = hex::encode(hasher.finalize().as_bytes());
    digest[..FINGERPRINT_LEN].to_string()
}

/// Canonical inline attribute list: `{: a="1" b="2"}` with names sorted
pub fn ial_string(attrs: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = attrs.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut out = String::from("{:");
    for (name, value) in sorted {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        out.push_str(&escape_attr(value));
        out.push('"');
    }
    out.push('}');
    out
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('\n', "_esc_newline_")
}

/// Shard a block ID belongs to
pub fn shard_of(id: &str) -> usize {
    blake3::hash(id.as_bytes()).as_bytes()[0] as usize
}

/// Shard file name, the two hex digits of [`shard_of`]
pub fn shard_key(shard: usize) -> String {
    format!("{:02x}", shard)
}

/// Hex BLAKE3 digest of arbitrary bytes
pub fn content_digest(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn ctx<'a>(path: &'a str, parent: &'a str) -> FingerprintContext<'a> {
        FingerprintContext {
            container: "box",
            path,
            display_path: "/Doc",
            parent_id: parent,
            heading_parent_id: "",
        }
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let node = Node::paragraph("p1", "hello");
        let a = block_fingerprint(&node, &ctx("/d.sy", "d"));
        let b = block_fingerprint(&node.clone(), &ctx("/d.sy", "d"));
        assert_eq!(a, b);
        assert_eq!(a.len(), FINGERPRINT_LEN);
    }

    #[test]
    fn test_fingerprint_tracks_content_path_and_parent() {
        let node = Node::paragraph("p1", "hello");
        let base = block_fingerprint(&node, &ctx("/d.sy", "d"));

        let edited = Node::paragraph("p1", "hello!");
        assert_ne!(base, block_fingerprint(&edited, &ctx("/d.sy", "d")));
        assert_ne!(base, block_fingerprint(&node, &ctx("/x/d.sy", "d")));
        assert_ne!(base, block_fingerprint(&node, &ctx("/d.sy", "other")));

        let with_attr = node.clone().with_attr("custom-x", "1");
        assert_ne!(base, block_fingerprint(&with_attr, &ctx("/d.sy", "d")));
    }

    #[test]
    fn test_ial_string_is_sorted_and_escaped() {
        let attrs = vec![
            ("updated".to_string(), "2".to_string()),
            ("id".to_string(), "x".to_string()),
            ("memo".to_string(), "a \"b\"".to_string()),
        ];
        assert_eq!(
            ial_string(&attrs),
            "{: id=\"x\" memo=\"a &quot;b&quot;\" updated=\"2\"}"
        );
    }

    #[test_case(0, "00")]
    #[test_case(10, "0a")]
    #[test_case(255, "ff")]
    fn test_shard_key(shard: usize, expected: &str) {
        assert_eq!(shard_key(shard), expected);
    }

    #[test]
    fn test_shard_of_is_in_range_and_deterministic() {
        for id in ["a", "20240101120000-abcdefg", ""] {
            let shard = shard_of(id);
            assert!(shard < SHARD_COUNT);
            assert_eq!(shard, shard_of(id));
        }
    }
}
