//! Parsed document tree
//!
//! A [`Tree`] is one whole document: a document root block and its descendant
//! blocks. Leaf blocks carry their inline content as a flat list of
//! [`Inline`] elements and the markdown the parser rendered for them.
//!
//! The tree is produced by the document parser; the index only reads it.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{CoreError, CoreResult};

/// Block types known to the index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Document,
    Heading,
    Paragraph,
    List,
    ListItem,
    CodeBlock,
    MathBlock,
    Table,
    Blockquote,
    SuperBlock,
    HtmlBlock,
    QueryEmbed,
    IFrame,
    Widget,
    ThematicBreak,
    Video,
    Audio,
    AttributeView,
}

impl NodeType {
    /// Short type tag stored in the `type` column and the identity index
    pub fn abbr(self) -> &'static str {
        match self {
            Self::Document => "d",
            Self::Heading => "h",
            Self::Paragraph => "p",
            Self::List => "l",
            Self::ListItem => "i",
            Self::CodeBlock => "c",
            Self::MathBlock => "m",
            Self::Table => "t",
            Self::Blockquote => "b",
            Self::SuperBlock => "s",
            Self::HtmlBlock => "html",
            Self::QueryEmbed => "query_embed",
            Self::IFrame => "iframe",
            Self::Widget => "widget",
            Self::ThematicBreak => "tb",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::AttributeView => "av",
        }
    }

    /// Inverse of [`NodeType::abbr`]
    pub fn from_abbr(abbr: &str) -> Option<Self> {
        let node_type = match abbr {
            "d" => Self::Document,
            "h" => Self::Heading,
            "p" => Self::Paragraph,
            "l" => Self::List,
            "i" => Self::ListItem,
            "c" => Self::CodeBlock,
            "m" => Self::MathBlock,
            "t" => Self::Table,
            "b" => Self::Blockquote,
            "s" => Self::SuperBlock,
            "html" => Self::HtmlBlock,
            "query_embed" => Self::QueryEmbed,
            "iframe" => Self::IFrame,
            "widget" => Self::Widget,
            "tb" => Self::ThematicBreak,
            "video" => Self::Video,
            "audio" => Self::Audio,
            "av" => Self::AttributeView,
            _ => return None,
        };
        Some(node_type)
    }

    /// Container blocks hold other blocks instead of inline content
    pub fn is_container(self) -> bool {
        matches!(
            self,
            Self::Document | Self::List | Self::ListItem | Self::Blockquote | Self::SuperBlock
        )
    }

    /// Ordering weight used by search result sorting
    pub fn sort_key(self) -> i64 {
        match self {
            Self::Document => 0,
            Self::Heading => 5,
            Self::Paragraph
            | Self::CodeBlock
            | Self::MathBlock
            | Self::Table
            | Self::HtmlBlock => 10,
            Self::List | Self::ListItem | Self::Blockquote => 20,
            Self::SuperBlock => 30,
            _ => 100,
        }
    }
}

/// List flavour, reported as the row subtype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListKind {
    Unordered,
    Ordered,
    Task,
}

impl ListKind {
    pub fn abbr(self) -> &'static str {
        match self {
            Self::Unordered => "u",
            Self::Ordered => "o",
            Self::Task => "t",
        }
    }
}

/// Inline formatting that is indexed as a span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarkKind {
    Emphasis,
    Strong,
    Strikethrough,
    Mark,
    Sup,
    Sub,
    Kbd,
    Underline,
    InlineMath,
    CodeSpan,
}

impl MarkKind {
    pub fn abbr(self) -> &'static str {
        match self {
            Self::Emphasis => "em",
            Self::Strong => "strong",
            Self::Strikethrough => "s",
            Self::Mark => "mark",
            Self::Sup => "sup",
            Self::Sub => "sub",
            Self::Kbd => "kbd",
            Self::Underline => "u",
            Self::InlineMath => "inline-math",
            Self::CodeSpan => "code",
        }
    }

    /// Markdown delimiters wrapped around the span text
    pub fn delimiters(self) -> (&'static str, &'static str) {
        match self {
            Self::Emphasis => ("*", "*"),
            Self::Strong => ("**", "**"),
            Self::Strikethrough => ("~~", "~~"),
            Self::Mark => ("==", "=="),
            Self::Sup => ("^", "^"),
            Self::Sub => ("~", "~"),
            Self::Kbd => ("<kbd>", "</kbd>"),
            Self::Underline => ("<u>", "</u>"),
            Self::InlineMath => ("$", "$"),
            Self::CodeSpan => ("`", "`"),
        }
    }
}

/// Inline content of a leaf block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Inline {
    Text(String),
    Tag(String),
    Mark {
        kind: MarkKind,
        text: String,
    },
    Link {
        text: String,
        dest: String,
        title: String,
    },
    BlockRef {
        def_id: String,
        text: String,
    },
    FileAnnotationRef {
        file_path: String,
        annotation_id: String,
        text: String,
    },
}

impl Inline {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    pub fn tag(label: impl Into<String>) -> Self {
        Self::Tag(label.into())
    }

    pub fn link(text: impl Into<String>, dest: impl Into<String>) -> Self {
        Self::Link {
            text: text.into(),
            dest: dest.into(),
            title: String::new(),
        }
    }

    pub fn block_ref(def_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::BlockRef {
            def_id: def_id.into(),
            text: text.into(),
        }
    }

    /// Markdown form of this inline element
    pub fn markdown(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Tag(label) => format!("#{}#", label),
            Self::Mark { kind, text } => {
                let (open, close) = kind.delimiters();
                format!("{}{}{}", open, text, close)
            }
            Self::Link { text, dest, title } if title.is_empty() => {
                format!("[{}]({})", text, dest)
            }
            Self::Link { text, dest, title } => format!("[{}]({} \"{}\")", text, dest, title),
            Self::BlockRef { def_id, text } => format!("(({} \"{}\"))", def_id, text),
            Self::FileAnnotationRef {
                file_path,
                annotation_id,
                text,
            } => format!("<<{}/{} \"{}\">>", file_path, annotation_id, text),
        }
    }
}

/// One block of a document tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub node_type: NodeType,
    /// Block attributes in document order (`id`, `updated`, `name`, `custom-*`, ...)
    pub attrs: Vec<(String, String)>,
    /// 1-6 for headings, 0 otherwise
    pub heading_level: u8,
    pub list_kind: Option<ListKind>,
    /// Markdown rendered by the parser for leaf blocks, without attributes
    pub markdown: String,
    pub inlines: Vec<Inline>,
    pub children: Vec<Node>,
}

impl Node {
    pub fn new(id: impl Into<String>, node_type: NodeType) -> Self {
        let id = id.into();
        Self {
            attrs: vec![("id".to_string(), id.clone())],
            id,
            node_type,
            heading_level: 0,
            list_kind: None,
            markdown: String::new(),
            inlines: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Document root with a title attribute
    pub fn document(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self::new(id, NodeType::Document).with_attr("title", title)
    }

    /// Paragraph holding a single text run
    pub fn paragraph(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, NodeType::Paragraph).with_inline(Inline::Text(text.into()))
    }

    pub fn heading(id: impl Into<String>, level: u8, text: impl Into<String>) -> Self {
        let mut node = Self::new(id, NodeType::Heading).with_inline(Inline::Text(text.into()));
        node.heading_level = level;
        node.markdown = format!("{} {}", "#".repeat(level as usize), node.markdown);
        node
    }

    /// Set or replace an attribute
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| *k == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name, value)),
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The `updated` attribute, empty when the parser did not set one
    pub fn updated(&self) -> &str {
        self.attr("updated").unwrap_or("")
    }

    /// Append an inline element and keep the rendered markdown in step
    pub fn with_inline(mut self, inline: Inline) -> Self {
        self.markdown.push_str(&inline.markdown());
        self.inlines.push(inline);
        self
    }

    pub fn with_child(mut self, child: Node) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_children(mut self, children: impl IntoIterator<Item = Node>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn is_container(&self) -> bool {
        self.node_type.is_container()
    }

    /// Depth-first search for a descendant (or self) by ID
    pub fn find(&self, id: &str) -> Option<&Node> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }

    pub fn find_mut(&mut self, id: &str) -> Option<&mut Node> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter_mut().find_map(|child| child.find_mut(id))
    }

    /// Number of blocks in this subtree, self included
    pub fn block_count(&self) -> usize {
        1 + self.children.iter().map(Node::block_count).sum::<usize>()
    }
}

/// A block reached during a pre-order walk of a tree
#[derive(Debug, Clone, Copy)]
pub struct BlockVisit<'a> {
    pub node: &'a Node,
    pub parent: Option<&'a Node>,
    /// Position among the parent's children
    pub index: usize,
}

impl<'a> BlockVisit<'a> {
    /// Siblings that come before this block
    pub fn previous_siblings(&self) -> &'a [Node] {
        match self.parent {
            Some(parent) => &parent.children[..self.index],
            None => &[],
        }
    }

    pub fn parent_id(&self) -> &'a str {
        self.parent.map(|p| p.id.as_str()).unwrap_or("")
    }
}

/// One parsed document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    /// Same as the root block ID
    pub id: String,
    /// Notebook the document lives in
    pub container: String,
    /// Storage path, e.g. `/20240101120000-abcdefg/20240102120000-hijklmn.sy`
    pub path: String,
    /// Human readable path, e.g. `/Projects/Roadmap`
    pub display_path: String,
    pub root: Node,
}

impl Tree {
    pub fn new(
        container: impl Into<String>,
        path: impl Into<String>,
        display_path: impl Into<String>,
        root: Node,
    ) -> Self {
        Self {
            id: root.id.clone(),
            container: container.into(),
            path: path.into(),
            display_path: display_path.into(),
            root,
        }
    }

    /// All blocks in pre-order, each with its structural parent
    pub fn blocks(&self) -> Vec<BlockVisit<'_>> {
        let mut visits = Vec::with_capacity(self.root.block_count());
        collect(&self.root, None, 0, &mut visits);
        visits
    }

    pub fn find(&self, id: &str) -> Option<&Node> {
        self.root.find(id)
    }

    pub fn block_count(&self) -> usize {
        self.root.block_count()
    }

    /// Document title, taken from the root's `title` attribute
    pub fn title(&self) -> &str {
        self.root.attr("title").unwrap_or("")
    }

    /// Check the structural rules the index relies on
    pub fn validate(&self) -> CoreResult<()> {
        if self.root.node_type != NodeType::Document {
            return Err(CoreError::RootNotDocument {
                id: self.root.id.clone(),
                found: self.root.node_type.abbr().to_string(),
            });
        }
        if self.id != self.root.id {
            return Err(CoreError::RootMismatch {
                tree_id: self.id.clone(),
                root_id: self.root.id.clone(),
            });
        }

        let mut seen = HashSet::new();
        for visit in self.blocks() {
            if visit.node.id.is_empty() {
                return Err(CoreError::MissingId {
                    parent: visit.parent_id().to_string(),
                });
            }
            if !seen.insert(visit.node.id.as_str()) {
                return Err(CoreError::DuplicateId(visit.node.id.clone()));
            }
        }
        Ok(())
    }
}

fn collect<'a>(
    node: &'a Node,
    parent: Option<&'a Node>,
    index: usize,
    out: &mut Vec<BlockVisit<'a>>,
) {
    out.push(BlockVisit {
        node,
        parent,
        index,
    });
    for (i, child) in node.children.iter().enumerate() {
        collect(child, Some(node), i, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Tree {
        let root = Node::document("20240101120000-doc0001", "Roadmap")
            .with_child(Node::heading("20240101120001-head001", 2, "Goals"))
            .with_child(
                Node::new("20240101120002-list001", NodeType::List).with_child(
                    Node::new("20240101120003-item001", NodeType::ListItem)
                        .with_child(Node::paragraph("20240101120004-para001", "ship it")),
                ),
            );
        Tree::new("box1", "/20240101120000-doc0001.sy", "/Roadmap", root)
    }

    #[test]
    fn test_blocks_pre_order_with_parents() {
        let tree = sample();
        let visits = tree.blocks();
        let ids: Vec<&str> = visits.iter().map(|v| v.node.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "20240101120000-doc0001",
                "20240101120001-head001",
                "20240101120002-list001",
                "20240101120003-item001",
                "20240101120004-para001",
            ]
        );
        assert_eq!(visits[0].parent_id(), "");
        assert_eq!(visits[4].parent_id(), "20240101120003-item001");
        assert_eq!(visits[2].previous_siblings().len(), 1);
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let mut tree = sample();
        tree.root
            .children
            .push(Node::paragraph("20240101120001-head001", "dup"));
        assert_eq!(
            tree.validate(),
            Err(CoreError::DuplicateId("20240101120001-head001".to_string()))
        );
    }

    #[test]
    fn test_validate_rejects_non_document_root() {
        let tree = Tree::new("box1", "/p.sy", "/p", Node::paragraph("x", "y"));
        assert!(matches!(
            tree.validate(),
            Err(CoreError::RootNotDocument { .. })
        ));
    }

    #[test]
    fn test_type_abbr_round_trip() {
        for node_type in [NodeType::Document, NodeType::SuperBlock, NodeType::QueryEmbed] {
            assert_eq!(NodeType::from_abbr(node_type.abbr()), Some(node_type));
        }
        assert_eq!(NodeType::from_abbr("nope"), None);
    }

    #[test]
    fn test_set_attr_replaces() {
        let node = Node::paragraph("a", "b")
            .with_attr("updated", "1")
            .with_attr("updated", "2");
        assert_eq!(node.updated(), "2");
        assert_eq!(node.attrs.iter().filter(|(k, _)| k == "updated").count(), 1);
    }
}
