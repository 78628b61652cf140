//! Text derived from a block for the structured and full-text projections

use crate::tree::{BlockVisit, Inline, Node, NodeType};

/// Plain text of a block as stored in the `content` column
///
/// Leaf blocks concatenate their inline text. Containers join the content of
/// their children with a space, documents use their title.
pub fn block_content(node: &Node, index_asset_path: bool) -> String {
    match node.node_type {
        NodeType::Document => node.attr("title").unwrap_or("").to_string(),
        t if t.is_container() => node
            .children
            .iter()
            .map(|child| block_content(child, index_asset_path))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        _ => inline_content(&node.inlines, index_asset_path),
    }
}

/// Text of a list of inline elements
pub fn inline_content(inlines: &[Inline], index_asset_path: bool) -> String {
    let mut out = String::new();
    for inline in inlines {
        match inline {
            Inline::Text(text) => out.push_str(text),
            Inline::Tag(label) => {
                out.push('#');
                out.push_str(label);
                out.push('#');
            }
            Inline::Mark { text, .. } => out.push_str(text),
            Inline::Link { text, dest, .. } => {
                out.push_str(text);
                if index_asset_path && is_asset_dest(dest) {
                    out.push(' ');
                    out.push_str(dest);
                }
            }
            Inline::BlockRef { text, .. } => out.push_str(text),
            Inline::FileAnnotationRef { text, .. } => out.push_str(text),
        }
    }
    out.trim().to_string()
}

/// Content of the first leaf below a container, empty for leaves
pub fn first_leaf_content(node: &Node, index_asset_path: bool) -> String {
    if !node.is_container() {
        return String::new();
    }
    let mut current = node;
    while let Some(first) = current.children.first() {
        if !first.is_container() {
            return inline_content(&first.inlines, index_asset_path);
        }
        current = first;
    }
    String::new()
}

/// Tag string of a block (`#a# #b#`)
///
/// Documents take their tags from the comma separated `tags` attribute, other
/// blocks from the tag inlines anywhere in their subtree.
pub fn block_tags(node: &Node) -> String {
    let labels: Vec<String> = if node.node_type == NodeType::Document {
        node.attr("tags")
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .map(str::to_string)
            .collect()
    } else {
        let mut labels = Vec::new();
        collect_tag_labels(node, &mut labels);
        labels
    };

    let mut seen = Vec::with_capacity(labels.len());
    for label in labels {
        if !seen.contains(&label) {
            seen.push(label);
        }
    }
    seen.iter()
        .map(|label| format!("#{}#", label))
        .collect::<Vec<_>>()
        .join(" ")
}

fn collect_tag_labels(node: &Node, out: &mut Vec<String>) {
    for inline in &node.inlines {
        if let Inline::Tag(label) = inline {
            out.push(label.clone());
        }
    }
    for child in &node.children {
        collect_tag_labels(child, out);
    }
}

/// Markdown stored in the `markdown` column
///
/// Containers render their children separated by blank lines. The document
/// root carries no markdown of its own.
pub fn block_markdown(node: &Node) -> String {
    match node.node_type {
        NodeType::Document => String::new(),
        t if t.is_container() => node
            .children
            .iter()
            .map(block_markdown)
            .collect::<Vec<_>>()
            .join("\n\n"),
        _ => node.markdown.clone(),
    }
}

/// The heading a block visually belongs to
///
/// Walks the preceding siblings backwards and returns the first heading of a
/// higher rank. Non-heading blocks belong to any preceding heading. A super
/// block that opens with a heading ranks like that heading.
pub fn heading_parent<'a>(visit: &BlockVisit<'a>) -> Option<&'a Node> {
    let own_level = match visit.node.node_type {
        NodeType::Heading => visit.node.heading_level,
        NodeType::SuperBlock => super_block_heading(visit.node)
            .map(|h| h.heading_level)
            .unwrap_or(u8::MAX),
        _ => u8::MAX,
    };

    visit
        .previous_siblings()
        .iter()
        .rev()
        .find(|sibling| sibling.node_type == NodeType::Heading && sibling.heading_level < own_level)
}

/// Leading heading of a super block, looking through nested super blocks
pub fn super_block_heading(node: &Node) -> Option<&Node> {
    let first = node.children.first()?;
    match first.node_type {
        NodeType::Heading => Some(first),
        NodeType::SuperBlock => super_block_heading(first),
        _ => None,
    }
}

/// Whether a link destination points into the workspace asset folder
pub fn is_asset_dest(dest: &str) -> bool {
    dest.starts_with("assets/")
}

/// Number of characters in a content string
pub fn content_length(content: &str) -> i64 {
    content.chars().count() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{MarkKind, Tree};

    #[test]
    fn test_leaf_content_includes_asset_path_when_enabled() {
        let node = Node::new("p1", NodeType::Paragraph)
            .with_inline(Inline::text("see "))
            .with_inline(Inline::link("diagram", "assets/diagram-20240101.png"));
        assert_eq!(block_content(&node, false), "see diagram");
        assert_eq!(
            block_content(&node, true),
            "see diagram assets/diagram-20240101.png"
        );
    }

    #[test]
    fn test_container_content_and_first_leaf() {
        let list = Node::new("l1", NodeType::List).with_child(
            Node::new("i1", NodeType::ListItem)
                .with_child(Node::paragraph("p1", "first"))
                .with_child(Node::paragraph("p2", "second")),
        );
        assert_eq!(block_content(&list, false), "first second");
        assert_eq!(first_leaf_content(&list, false), "first");
        assert_eq!(block_markdown(&list), "first\n\nsecond");
    }

    #[test]
    fn test_tags_from_inlines_and_document_attr() {
        let para = Node::new("p1", NodeType::Paragraph)
            .with_inline(Inline::tag("rust"))
            .with_inline(Inline::text(" and "))
            .with_inline(Inline::tag("sqlite"))
            .with_inline(Inline::tag("rust"));
        assert_eq!(block_tags(&para), "#rust# #sqlite#");

        let doc = Node::document("d1", "Doc").with_attr("tags", "a, b,,c");
        assert_eq!(block_tags(&doc), "#a# #b# #c#");
    }

    #[test]
    fn test_mark_text_is_plain() {
        let node = Node::new("p1", NodeType::Paragraph).with_inline(Inline::Mark {
            kind: MarkKind::Strong,
            text: "bold".to_string(),
        });
        assert_eq!(block_content(&node, false), "bold");
        assert_eq!(node.markdown, "**bold**");
    }

    #[test]
    fn test_heading_parent() {
        let root = Node::document("d1", "Doc")
            .with_child(Node::heading("h1", 1, "Top"))
            .with_child(Node::heading("h2", 2, "Sub"))
            .with_child(Node::paragraph("p1", "body"))
            .with_child(Node::heading("h3", 1, "Next"));
        let tree = Tree::new("box", "/d1.sy", "/Doc", root);
        let visits = tree.blocks();

        let parent_of = |id: &str| {
            let visit = visits.iter().find(|v| v.node.id == id).unwrap();
            heading_parent(visit).map(|n| n.id.clone())
        };
        assert_eq!(parent_of("h1"), None);
        assert_eq!(parent_of("h2"), Some("h1".to_string()));
        assert_eq!(parent_of("p1"), Some("h2".to_string()));
        assert_eq!(parent_of("h3"), None);
    }

    #[test]
    fn test_super_block_ranks_like_its_heading() {
        let root = Node::document("d1", "Doc")
            .with_child(Node::heading("h1", 1, "Top"))
            .with_child(Node::heading("h2", 2, "Sub"))
            .with_child(
                Node::new("s1", NodeType::SuperBlock)
                    .with_child(Node::heading("h3", 2, "Side"))
                    .with_child(Node::paragraph("p1", "x")),
            );
        let tree = Tree::new("box", "/d1.sy", "/Doc", root);
        let visits = tree.blocks();
        let visit = visits.iter().find(|v| v.node.id == "s1").unwrap();
        assert_eq!(heading_parent(visit).map(|n| n.id.as_str()), Some("h1"));
    }

    #[test]
    fn test_content_length_counts_chars() {
        assert_eq!(content_length("héllo"), 5);
    }
}
