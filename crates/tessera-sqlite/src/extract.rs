//! Rows derived from a parsed document tree

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tessera_blocktree::BlockTree;
use tessera_core::content::{
    block_content, block_markdown, block_tags, content_length, first_leaf_content, heading_parent,
    is_asset_dest,
};
use tessera_core::hashing::{block_fingerprint, content_digest, ial_string, FingerprintContext};
use tessera_core::id::{created_from_id, new_node_id};
use tessera_core::{BlockVisit, Inline, Node, NodeType, Tree};
use tracing::warn;

use crate::row::{AssetRow, AttributeRow, BlockRow, FileAnnotationRefRow, RefRow, SpanRow};

/// Attribute names copied into the `attributes` table
pub fn is_indexed_attr(name: &str) -> bool {
    name.starts_with("custom-")
        || matches!(
            name,
            "name" | "alias" | "memo" | "bookmark" | "fold" | "heading-fold" | "style"
        )
}

/// Options that change the derived rows
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    pub index_asset_path: bool,
    /// Workspace data directory, used to hash asset files
    pub workspace_dir: Option<PathBuf>,
}

/// Every row a document contributes, apart from references
#[derive(Debug, Default)]
pub struct TreeRows {
    pub blocks: Vec<BlockRow>,
    pub spans: Vec<SpanRow>,
    pub assets: Vec<AssetRow>,
    pub attributes: Vec<AttributeRow>,
}

/// References a document makes to other blocks and to file annotations
#[derive(Debug, Default)]
pub struct TreeRefs {
    pub refs: Vec<RefRow>,
    pub file_annotation_refs: Vec<FileAnnotationRefRow>,
}

/// Build the block, span, asset and attribute rows of a tree
pub fn tree_rows(tree: &Tree, options: &ExtractOptions) -> TreeRows {
    let mut rows = TreeRows::default();
    for visit in tree.blocks() {
        rows.blocks.push(block_row(tree, &visit, options));
        rows.attributes.extend(attribute_rows(tree, visit.node));
        inline_rows(tree, visit.node, options, &mut rows);
    }
    document_tag_spans(tree, &mut rows.spans);
    rows
}

/// Structured row of one block
pub fn block_row(tree: &Tree, visit: &BlockVisit<'_>, options: &ExtractOptions) -> BlockRow {
    let node = visit.node;
    let heading = heading_parent(visit);
    let structural_parent = visit.parent_id();
    let hash = block_fingerprint(
        node,
        &FingerprintContext {
            container: &tree.container,
            path: &tree.path,
            display_path: &tree.display_path,
            parent_id: structural_parent,
            heading_parent_id: heading.map(|h| h.id.as_str()).unwrap_or(""),
        },
    );

    let content = block_content(node, options.index_asset_path);
    let (fcontent, length) = match node.node_type {
        NodeType::Document => (content.clone(), content_length(&content)),
        t if t.is_container() => {
            let first = first_leaf_content(node, options.index_asset_path);
            let length = content_length(&first);
            (first, length)
        }
        _ => (String::new(), content_length(&content)),
    };

    BlockRow {
        id: node.id.clone(),
        parent_id: heading
            .map(|h| h.id.clone())
            .unwrap_or_else(|| structural_parent.to_string()),
        root_id: tree.id.clone(),
        hash,
        container: tree.container.clone(),
        path: tree.path.clone(),
        display_path: tree.display_path.clone(),
        name: node.attr("name").unwrap_or("").to_string(),
        alias: node.attr("alias").unwrap_or("").to_string(),
        memo: node.attr("memo").unwrap_or("").to_string(),
        tag: block_tags(node),
        content,
        fcontent,
        markdown: block_markdown(node),
        length,
        node_type: node.node_type.abbr().to_string(),
        subtype: subtype(node),
        ial: ial_string(&node.attrs),
        sort: node.node_type.sort_key(),
        created: created_from_id(&node.id),
        updated: node.updated().to_string(),
    }
}

/// Row of a single block looked up by ID, `None` when the tree lacks it
pub fn block_row_by_id(tree: &Tree, id: &str, options: &ExtractOptions) -> Option<BlockRow> {
    tree.blocks()
        .iter()
        .find(|visit| visit.node.id == id)
        .map(|visit| block_row(tree, visit, options))
}

fn subtype(node: &Node) -> String {
    match node.node_type {
        NodeType::Heading => format!("h{}", node.heading_level),
        NodeType::List | NodeType::ListItem => node
            .list_kind
            .map(|kind| kind.abbr().to_string())
            .unwrap_or_default(),
        _ => String::new(),
    }
}

fn attribute_rows<'a>(tree: &'a Tree, node: &'a Node) -> impl Iterator<Item = AttributeRow> + 'a {
    node.attrs
        .iter()
        .filter(|(name, _)| is_indexed_attr(name))
        .map(move |(name, value)| AttributeRow {
            id: new_node_id(),
            name: name.clone(),
            value: value.clone(),
            attr_type: "b".to_string(),
            block_id: node.id.clone(),
            root_id: tree.id.clone(),
            container: tree.container.clone(),
            path: tree.path.clone(),
        })
}

fn inline_rows(tree: &Tree, node: &Node, options: &ExtractOptions, rows: &mut TreeRows) {
    let span = |content: &str, markdown: String, span_type: &str| SpanRow {
        id: new_node_id(),
        block_id: node.id.clone(),
        root_id: tree.id.clone(),
        container: tree.container.clone(),
        path: tree.path.clone(),
        content: content.to_string(),
        markdown,
        span_type: span_type.to_string(),
        ial: String::new(),
    };

    for inline in &node.inlines {
        match inline {
            Inline::Tag(label) => rows.spans.push(span(label.as_str(), inline.markdown(), "tag")),
            Inline::Mark { kind, text } => {
                rows.spans.push(span(text.as_str(), inline.markdown(), kind.abbr()))
            }
            Inline::Link { text, dest, title } => {
                rows.spans.push(span(text.as_str(), inline.markdown(), "link_text"));
                rows.spans.push(span(dest.as_str(), inline.markdown(), "link_dest"));
                if is_asset_dest(dest) {
                    rows.assets.push(AssetRow {
                        id: new_node_id(),
                        block_id: node.id.clone(),
                        root_id: tree.id.clone(),
                        container: tree.container.clone(),
                        doc_path: tree.path.clone(),
                        path: dest.clone(),
                        name: asset_name(dest),
                        title: title.clone(),
                        hash: asset_hash(options.workspace_dir.as_deref(), &tree.container, dest),
                    });
                }
            }
            Inline::Text(_) | Inline::BlockRef { .. } | Inline::FileAnnotationRef { .. } => {}
        }
    }
}

fn document_tag_spans(tree: &Tree, spans: &mut Vec<SpanRow>) {
    let Some(tags) = tree.root.attr("tags") else {
        return;
    };
    for label in tags.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        spans.push(SpanRow {
            id: new_node_id(),
            block_id: tree.id.clone(),
            root_id: tree.id.clone(),
            container: tree.container.clone(),
            path: tree.path.clone(),
            content: label.to_string(),
            markdown: format!("#{}#", label),
            span_type: "tag".to_string(),
            ial: String::new(),
        });
    }
}

/// File name of an asset without its directory
fn asset_name(dest: &str) -> String {
    Path::new(dest)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(dest)
        .to_string()
}

/// BLAKE3 of the asset file, looked up under the container first
fn asset_hash(workspace: Option<&Path>, container: &str, dest: &str) -> String {
    let Some(workspace) = workspace else {
        return String::new();
    };
    let dest = dest.split(['?', '#']).next().unwrap_or(dest);
    for candidate in [workspace.join(container).join(dest), workspace.join(dest)] {
        if !candidate.is_file() {
            continue;
        }
        match std::fs::read(&candidate) {
            Ok(data) => return content_digest(&data),
            Err(e) => {
                warn!(path = %candidate.display(), error = %e, "Failed to hash asset");
                return String::new();
            }
        }
    }
    String::new()
}

/// Reference rows of a tree
///
/// Targets inside the tree itself resolve against the tree, so the identity
/// index only has to know about other documents.
pub fn tree_refs(tree: &Tree, blocktree: &BlockTree) -> TreeRefs {
    let visits = tree.blocks();
    let local: HashMap<&str, &str> = visits
        .iter()
        .map(|visit| (visit.node.id.as_str(), visit.parent_id()))
        .collect();

    let mut out = TreeRefs::default();
    for visit in &visits {
        let node = visit.node;
        for inline in &node.inlines {
            match inline {
                Inline::BlockRef { def_id, text } => {
                    let (parent_id, root_id, path) = match local.get(def_id.as_str()) {
                        Some(parent_id) => (parent_id.to_string(), tree.id.clone(), tree.path.clone()),
                        None => blocktree
                            .get(def_id)
                            .map(|d| (d.parent_id, d.root_id, d.path))
                            .unwrap_or_default(),
                    };
                    out.refs.push(RefRow {
                        id: new_node_id(),
                        def_block_id: def_id.clone(),
                        def_block_parent_id: parent_id,
                        def_block_root_id: root_id,
                        def_block_path: path,
                        block_id: node.id.clone(),
                        root_id: tree.id.clone(),
                        container: tree.container.clone(),
                        path: tree.path.clone(),
                        content: text.clone(),
                        markdown: inline.markdown(),
                        ref_type: "ref_id".to_string(),
                    });
                }
                Inline::FileAnnotationRef {
                    file_path,
                    annotation_id,
                    text,
                } => {
                    let content = if text.is_empty() {
                        file_path.clone()
                    } else {
                        text.clone()
                    };
                    out.file_annotation_refs.push(FileAnnotationRefRow {
                        id: new_node_id(),
                        file_path: file_path.clone(),
                        annotation_id: annotation_id.clone(),
                        block_id: node.id.clone(),
                        root_id: tree.id.clone(),
                        container: tree.container.clone(),
                        path: tree.path.clone(),
                        content,
                        ref_type: "file_annotation_ref_id".to_string(),
                    });
                }
                _ => {}
            }
        }
    }
    out
}
