//! Row types of the projection tables

use rusqlite::types::ToSql;
use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// A row type that can be bulk inserted
pub trait SqlRow {
    /// Target table
    const TABLE: &'static str;
    /// Column list in bind order
    const COLUMNS: &'static [&'static str];

    /// Push one value per column, in `COLUMNS` order
    fn bind<'a>(&'a self, out: &mut Vec<&'a dyn ToSql>);
}

/// One block in the structured table and the full-text tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRow {
    pub id: String,
    /// Heading parent when the block sits under a heading, structural parent otherwise
    pub parent_id: String,
    pub root_id: String,
    pub hash: String,
    pub container: String,
    pub path: String,
    pub display_path: String,
    pub name: String,
    pub alias: String,
    pub memo: String,
    pub tag: String,
    pub content: String,
    pub fcontent: String,
    pub markdown: String,
    pub length: i64,
    pub node_type: String,
    pub subtype: String,
    pub ial: String,
    pub sort: i64,
    pub created: String,
    pub updated: String,
}

impl BlockRow {
    /// Approximate heap footprint, used as the cache cost
    pub fn cost(&self) -> usize {
        std::mem::size_of::<Self>()
            + [
                &self.id,
                &self.parent_id,
                &self.root_id,
                &self.hash,
                &self.container,
                &self.path,
                &self.display_path,
                &self.name,
                &self.alias,
                &self.memo,
                &self.tag,
                &self.content,
                &self.fcontent,
                &self.markdown,
                &self.node_type,
                &self.subtype,
                &self.ial,
                &self.created,
                &self.updated,
            ]
            .iter()
            .map(|s| s.len())
            .sum::<usize>()
    }
}

impl SqlRow for BlockRow {
    const TABLE: &'static str = "blocks";
    const COLUMNS: &'static [&'static str] = &[
        "id", "parent_id", "root_id", "hash", "box", "path", "hpath", "name", "alias", "memo",
        "tag", "content", "fcontent", "markdown", "length", "type", "subtype", "ial", "sort",
        "created", "updated",
    ];

    fn bind<'a>(&'a self, out: &mut Vec<&'a dyn ToSql>) {
        let values: [&'a dyn ToSql; 21] = [
            &self.id,
            &self.parent_id,
            &self.root_id,
            &self.hash,
            &self.container,
            &self.path,
            &self.display_path,
            &self.name,
            &self.alias,
            &self.memo,
            &self.tag,
            &self.content,
            &self.fcontent,
            &self.markdown,
            &self.length,
            &self.node_type,
            &self.subtype,
            &self.ial,
            &self.sort,
            &self.created,
            &self.updated,
        ];
        out.extend(values);
    }
}

/// Map a row selected with [`crate::schema::BLOCK_COLUMNS`]
pub fn row_to_block(row: &Row<'_>) -> rusqlite::Result<BlockRow> {
    Ok(BlockRow {
        id: row.get(0)?,
        parent_id: row.get(1)?,
        root_id: row.get(2)?,
        hash: row.get(3)?,
        container: row.get(4)?,
        path: row.get(5)?,
        display_path: row.get(6)?,
        name: row.get(7)?,
        alias: row.get(8)?,
        memo: row.get(9)?,
        tag: row.get(10)?,
        content: row.get(11)?,
        fcontent: row.get(12)?,
        markdown: row.get(13)?,
        length: row.get(14)?,
        node_type: row.get(15)?,
        subtype: row.get(16)?,
        ial: row.get(17)?,
        sort: row.get(18)?,
        created: row.get(19)?,
        updated: row.get(20)?,
    })
}

/// Inline element worth querying on its own: tags, links, marks
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanRow {
    pub id: String,
    pub block_id: String,
    pub root_id: String,
    pub container: String,
    pub path: String,
    pub content: String,
    pub markdown: String,
    pub span_type: String,
    pub ial: String,
}

impl SqlRow for SpanRow {
    const TABLE: &'static str = "spans";
    const COLUMNS: &'static [&'static str] = &[
        "id", "block_id", "root_id", "box", "path", "content", "markdown", "type", "ial",
    ];

    fn bind<'a>(&'a self, out: &mut Vec<&'a dyn ToSql>) {
        let values: [&'a dyn ToSql; 9] = [
            &self.id,
            &self.block_id,
            &self.root_id,
            &self.container,
            &self.path,
            &self.content,
            &self.markdown,
            &self.span_type,
            &self.ial,
        ];
        out.extend(values);
    }
}

pub fn row_to_span(row: &Row<'_>) -> rusqlite::Result<SpanRow> {
    Ok(SpanRow {
        id: row.get(0)?,
        block_id: row.get(1)?,
        root_id: row.get(2)?,
        container: row.get(3)?,
        path: row.get(4)?,
        content: row.get(5)?,
        markdown: row.get(6)?,
        span_type: row.get(7)?,
        ial: row.get(8)?,
    })
}

/// A file under `assets/` linked from a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRow {
    pub id: String,
    pub block_id: String,
    pub root_id: String,
    pub container: String,
    pub doc_path: String,
    /// Link destination, e.g. `assets/image-20240101120000-abcdefg.png`
    pub path: String,
    pub name: String,
    pub title: String,
    /// BLAKE3 of the file contents, empty when the file was not found
    pub hash: String,
}

impl SqlRow for AssetRow {
    const TABLE: &'static str = "assets";
    const COLUMNS: &'static [&'static str] = &[
        "id", "block_id", "root_id", "box", "docpath", "path", "name", "title", "hash",
    ];

    fn bind<'a>(&'a self, out: &mut Vec<&'a dyn ToSql>) {
        let values: [&'a dyn ToSql; 9] = [
            &self.id,
            &self.block_id,
            &self.root_id,
            &self.container,
            &self.doc_path,
            &self.path,
            &self.name,
            &self.title,
            &self.hash,
        ];
        out.extend(values);
    }
}

pub fn row_to_asset(row: &Row<'_>) -> rusqlite::Result<AssetRow> {
    Ok(AssetRow {
        id: row.get(0)?,
        block_id: row.get(1)?,
        root_id: row.get(2)?,
        container: row.get(3)?,
        doc_path: row.get(4)?,
        path: row.get(5)?,
        name: row.get(6)?,
        title: row.get(7)?,
        hash: row.get(8)?,
    })
}

/// A queryable block attribute (`custom-*`, `name`, `bookmark`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeRow {
    pub id: String,
    pub name: String,
    pub value: String,
    /// `b` for block attributes
    pub attr_type: String,
    pub block_id: String,
    pub root_id: String,
    pub container: String,
    pub path: String,
}

impl SqlRow for AttributeRow {
    const TABLE: &'static str = "attributes";
    const COLUMNS: &'static [&'static str] = &[
        "id", "name", "value", "type", "block_id", "root_id", "box", "path",
    ];

    fn bind<'a>(&'a self, out: &mut Vec<&'a dyn ToSql>) {
        let values: [&'a dyn ToSql; 8] = [
            &self.id,
            &self.name,
            &self.value,
            &self.attr_type,
            &self.block_id,
            &self.root_id,
            &self.container,
            &self.path,
        ];
        out.extend(values);
    }
}

pub fn row_to_attribute(row: &Row<'_>) -> rusqlite::Result<AttributeRow> {
    Ok(AttributeRow {
        id: row.get(0)?,
        name: row.get(1)?,
        value: row.get(2)?,
        attr_type: row.get(3)?,
        block_id: row.get(4)?,
        root_id: row.get(5)?,
        container: row.get(6)?,
        path: row.get(7)?,
    })
}

/// A block reference from `block_id` to `def_block_id`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefRow {
    pub id: String,
    pub def_block_id: String,
    pub def_block_parent_id: String,
    pub def_block_root_id: String,
    pub def_block_path: String,
    pub block_id: String,
    pub root_id: String,
    pub container: String,
    pub path: String,
    pub content: String,
    pub markdown: String,
    pub ref_type: String,
}

impl SqlRow for RefRow {
    const TABLE: &'static str = "refs";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "def_block_id",
        "def_block_parent_id",
        "def_block_root_id",
        "def_block_path",
        "block_id",
        "root_id",
        "box",
        "path",
        "content",
        "markdown",
        "type",
    ];

    fn bind<'a>(&'a self, out: &mut Vec<&'a dyn ToSql>) {
        let values: [&'a dyn ToSql; 12] = [
            &self.id,
            &self.def_block_id,
            &self.def_block_parent_id,
            &self.def_block_root_id,
            &self.def_block_path,
            &self.block_id,
            &self.root_id,
            &self.container,
            &self.path,
            &self.content,
            &self.markdown,
            &self.ref_type,
        ];
        out.extend(values);
    }
}

pub fn row_to_ref(row: &Row<'_>) -> rusqlite::Result<RefRow> {
    Ok(RefRow {
        id: row.get(0)?,
        def_block_id: row.get(1)?,
        def_block_parent_id: row.get(2)?,
        def_block_root_id: row.get(3)?,
        def_block_path: row.get(4)?,
        block_id: row.get(5)?,
        root_id: row.get(6)?,
        container: row.get(7)?,
        path: row.get(8)?,
        content: row.get(9)?,
        markdown: row.get(10)?,
        ref_type: row.get(11)?,
    })
}

/// A reference into an annotation of an attached file (e.g. a PDF highlight)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAnnotationRefRow {
    pub id: String,
    pub file_path: String,
    pub annotation_id: String,
    pub block_id: String,
    pub root_id: String,
    pub container: String,
    pub path: String,
    pub content: String,
    pub ref_type: String,
}

impl SqlRow for FileAnnotationRefRow {
    const TABLE: &'static str = "file_annotation_refs";
    const COLUMNS: &'static [&'static str] = &[
        "id",
        "file_path",
        "annotation_id",
        "block_id",
        "root_id",
        "box",
        "path",
        "content",
        "type",
    ];

    fn bind<'a>(&'a self, out: &mut Vec<&'a dyn ToSql>) {
        let values: [&'a dyn ToSql; 9] = [
            &self.id,
            &self.file_path,
            &self.annotation_id,
            &self.block_id,
            &self.root_id,
            &self.container,
            &self.path,
            &self.content,
            &self.ref_type,
        ];
        out.extend(values);
    }
}

/// One snapshot entry in the history database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub id: String,
    pub history_type: i64,
    /// What produced the snapshot (`update`, `delete`, `sync`, ...)
    pub op: String,
    pub title: String,
    pub content: String,
    /// Snapshot file path relative to the history directory
    pub path: String,
    pub created: String,
}

impl SqlRow for HistoryRow {
    const TABLE: &'static str = "histories_fts";
    const COLUMNS: &'static [&'static str] =
        &["id", "type", "op", "title", "content", "path", "created"];

    fn bind<'a>(&'a self, out: &mut Vec<&'a dyn ToSql>) {
        let values: [&'a dyn ToSql; 7] = [
            &self.id,
            &self.history_type,
            &self.op,
            &self.title,
            &self.content,
            &self.path,
            &self.created,
        ];
        out.extend(values);
    }
}

pub fn row_to_history(row: &Row<'_>) -> rusqlite::Result<HistoryRow> {
    Ok(HistoryRow {
        id: row.get(0)?,
        history_type: row.get(1)?,
        op: row.get(2)?,
        title: row.get(3)?,
        content: row.get(4)?,
        path: row.get(5)?,
        created: row.get(6)?,
    })
}
