//! Read side of the projection

use rusqlite::{params, params_from_iter, OptionalExtension};
use std::collections::HashMap;

use crate::error::SqliteResult;
use crate::projection::{block_hashes, checksum_key, placeholders, Projection, INSERT_CHUNK};
use crate::row::{
    row_to_asset, row_to_attribute, row_to_block, row_to_ref, row_to_span, AssetRow,
    AttributeRow, BlockRow, RefRow, SpanRow,
};
use crate::schema::BLOCK_COLUMNS;

/// Shortest keyword the trigram tokenizer can match
const MIN_MATCH_CHARS: usize = 3;

impl Projection {
    /// One block by ID, served from the cache when possible
    pub fn get_block(&self, id: &str) -> SqliteResult<Option<BlockRow>> {
        if let Some(row) = self.cache.get(id) {
            return Ok(Some(row.as_ref().clone()));
        }

        let generation = self.cache.generation();
        let row = self.pool.with_connection(|conn| {
            let sql = format!("SELECT {} FROM blocks WHERE id = ?1", BLOCK_COLUMNS);
            Ok(conn.prepare_cached(&sql)?.query_row([id], row_to_block).optional()?)
        })?;
        if let Some(row) = &row {
            self.cache.fill(row.clone(), generation);
        }
        Ok(row)
    }

    /// Several blocks by ID, in no particular order; unknown IDs are skipped
    pub fn get_blocks(&self, ids: &[String]) -> SqliteResult<Vec<BlockRow>> {
        let mut found = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match self.cache.get(id) {
                Some(row) => found.push(row.as_ref().clone()),
                None => missing.push(id),
            }
        }

        let generation = self.cache.generation();
        self.pool.with_connection(|conn| {
            for chunk in missing.chunks(INSERT_CHUNK) {
                let sql = format!(
                    "SELECT {} FROM blocks WHERE id IN ({})",
                    BLOCK_COLUMNS,
                    placeholders(chunk.len())
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(params_from_iter(chunk.iter()), row_to_block)?;
                for row in rows {
                    let row = row?;
                    self.cache.fill(row.clone(), generation);
                    found.push(row);
                }
            }
            Ok(())
        })?;
        Ok(found)
    }

    fn query_blocks(&self, filter: &str, arg: &str) -> SqliteResult<Vec<BlockRow>> {
        self.pool.with_connection(|conn| {
            let sql = format!("SELECT {} FROM blocks WHERE {}", BLOCK_COLUMNS, filter);
            let rows = conn
                .prepare_cached(&sql)?
                .query_map([arg], row_to_block)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Every block of a document
    pub fn blocks_by_root(&self, root_id: &str) -> SqliteResult<Vec<BlockRow>> {
        self.query_blocks("root_id = ?1 ORDER BY sort, id", root_id)
    }

    /// Document rows of a container
    pub fn root_blocks(&self, container: &str) -> SqliteResult<Vec<BlockRow>> {
        self.query_blocks("type = 'd' AND box = ?1 ORDER BY path", container)
    }

    /// Blocks whose stored parent is `parent_id`
    pub fn child_blocks(&self, parent_id: &str) -> SqliteResult<Vec<BlockRow>> {
        self.query_blocks("parent_id = ?1 ORDER BY id", parent_id)
    }

    /// Stored content hash per block of a document
    pub fn block_hashes(&self, root_id: &str) -> SqliteResult<HashMap<String, String>> {
        self.pool.with_connection(|conn| block_hashes(conn, root_id))
    }

    pub fn count_blocks_by_root(&self, root_id: &str) -> SqliteResult<usize> {
        self.pool.with_connection(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM blocks WHERE root_id = ?1",
                [root_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// Full-text search over block content
    ///
    /// Keywords of three or more characters go through the trigram index of
    /// the configured full-text table. Shorter ones fall back to a substring
    /// scan of the structured table.
    pub fn search(&self, keyword: &str, limit: usize) -> SqliteResult<Vec<BlockRow>> {
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Vec::new());
        }
        let limit = limit as i64;

        self.pool.with_connection(|conn| {
            let rows = if keyword.chars().count() >= MIN_MATCH_CHARS {
                let table = self.options.search_table();
                let sql = format!(
                    "SELECT {columns} FROM blocks WHERE id IN (
                         SELECT id FROM {table} WHERE {table} MATCH ?1 LIMIT ?2
                     ) ORDER BY sort, id",
                    columns = BLOCK_COLUMNS,
                    table = table
                );
                let phrase = format!("\"{}\"", keyword.replace('"', "\"\""));
                conn.prepare_cached(&sql)?
                    .query_map(params![phrase, limit], row_to_block)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            } else {
                let filter = if self.options.case_sensitive {
                    "instr(content, ?1) > 0"
                } else {
                    "content LIKE '%' || ?1 || '%' ESCAPE '\\'"
                };
                let sql = format!(
                    "SELECT {} FROM blocks WHERE {} ORDER BY sort, id LIMIT ?2",
                    BLOCK_COLUMNS, filter
                );
                let pattern = if self.options.case_sensitive {
                    keyword.to_string()
                } else {
                    escape_like(keyword)
                };
                conn.prepare_cached(&sql)?
                    .query_map(params![pattern, limit], row_to_block)?
                    .collect::<rusqlite::Result<Vec<_>>>()?
            };
            Ok(rows)
        })
    }

    /// References pointing at a block, cached per definition ID
    pub fn refs_by_def_id(&self, def_id: &str) -> SqliteResult<Vec<RefRow>> {
        if let Some(refs) = self.cache.get_refs(def_id) {
            return Ok(refs.as_ref().clone());
        }
        let generation = self.cache.generation();
        let refs = self.pool.with_connection(|conn| {
            let rows = conn
                .prepare_cached(
                    "SELECT id, def_block_id, def_block_parent_id, def_block_root_id, def_block_path,
                            block_id, root_id, box, path, content, markdown, type
                     FROM refs WHERE def_block_id = ?1 ORDER BY id",
                )?
                .query_map([def_id], row_to_ref)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        self.cache.fill_refs(def_id, refs.clone(), generation);
        Ok(refs)
    }

    pub fn spans_by_root(&self, root_id: &str) -> SqliteResult<Vec<SpanRow>> {
        self.pool.with_connection(|conn| {
            let rows = conn
                .prepare_cached(
                    "SELECT id, block_id, root_id, box, path, content, markdown, type, ial
                     FROM spans WHERE root_id = ?1",
                )?
                .query_map([root_id], row_to_span)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    pub fn assets_by_root(&self, root_id: &str) -> SqliteResult<Vec<AssetRow>> {
        self.pool.with_connection(|conn| {
            let rows = conn
                .prepare_cached(
                    "SELECT id, block_id, root_id, box, docpath, path, name, title, hash
                     FROM assets WHERE root_id = ?1",
                )?
                .query_map([root_id], row_to_asset)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    pub fn attributes_by_block(&self, block_id: &str) -> SqliteResult<Vec<AttributeRow>> {
        self.pool.with_connection(|conn| {
            let rows = conn
                .prepare_cached(
                    "SELECT id, name, value, type, block_id, root_id, box, path
                     FROM attributes WHERE block_id = ?1 ORDER BY name",
                )?
                .query_map([block_id], row_to_attribute)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })
    }

    /// Last stored checksum of a container's documents
    pub fn container_checksum(&self, container: &str) -> SqliteResult<Option<String>> {
        self.pool.with_connection(|conn| {
            Ok(conn
                .query_row(
                    "SELECT value FROM stat WHERE key = ?1",
                    [checksum_key(container)],
                    |row| row.get(0),
                )
                .optional()?)
        })
    }
}

fn escape_like(keyword: &str) -> String {
    let mut out = String::with_capacity(keyword.len());
    for c in keyword.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::ProjectionOptions;
    use tessera_blocktree::BlockTree;
    use tessera_core::{Inline, Node, NodeType, Tree};
    use test_case::test_case;

    fn setup(options: ProjectionOptions) -> (Projection, BlockTree) {
        let projection = Projection::memory(options).unwrap();
        let blocktree = BlockTree::memory();

        let target = Tree::new(
            "box1",
            "/20240101120000-doc0001.sy",
            "/Target",
            Node::document("20240101120000-doc0001", "Target")
                .with_child(Node::paragraph("20240101120001-para001", "Rust Ownership rules"))
                .with_child(Node::paragraph("20240101120002-para002", "ab")),
        );
        let source = Tree::new(
            "box1",
            "/20240101130000-doc0002.sy",
            "/Source",
            Node::document("20240101130000-doc0002", "Source").with_child(
                Node::new("20240101130001-para001", NodeType::Paragraph)
                    .with_attr("custom-kind", "note")
                    .with_inline(Inline::text("see "))
                    .with_inline(Inline::block_ref("20240101120001-para001", "ownership")),
            ),
        );
        for tree in [&target, &source] {
            blocktree.index(tree);
        }
        projection
            .write(|tx| {
                tx.index_tree(&target, &blocktree)?;
                tx.index_tree(&source, &blocktree)
            })
            .unwrap();
        (projection, blocktree)
    }

    #[test]
    fn test_get_block_fills_cache() {
        let (projection, _) = setup(ProjectionOptions::default());
        projection.cache().clear();

        let row = projection.get_block("20240101120001-para001").unwrap().unwrap();
        assert_eq!(row.content, "Rust Ownership rules");
        assert!(projection.cache().get("20240101120001-para001").is_some());
        assert!(projection.get_block("20240101999999-missing").unwrap().is_none());
    }

    #[test]
    fn test_get_blocks_mixes_cache_and_database() {
        let (projection, _) = setup(ProjectionOptions::default());
        projection.cache().clear();
        projection.get_block("20240101120001-para001").unwrap();

        let ids = vec![
            "20240101120001-para001".to_string(),
            "20240101120002-para002".to_string(),
            "20240101999999-missing".to_string(),
        ];
        assert_eq!(projection.get_blocks(&ids).unwrap().len(), 2);
    }

    #[test]
    fn test_structural_queries() {
        let (projection, _) = setup(ProjectionOptions::default());
        assert_eq!(projection.blocks_by_root("20240101120000-doc0001").unwrap().len(), 3);
        assert_eq!(projection.root_blocks("box1").unwrap().len(), 2);
        assert_eq!(projection.child_blocks("20240101120000-doc0001").unwrap().len(), 2);
        assert_eq!(projection.count_blocks_by_root("20240101130000-doc0002").unwrap(), 2);
        assert_eq!(projection.block_hashes("20240101130000-doc0002").unwrap().len(), 2);
    }

    #[test_case(false, "ownership", 2 ; "folded trigram match")]
    #[test_case(true, "ownership", 1 ; "case sensitive trigram exact case only")]
    #[test_case(true, "Ownership", 1 ; "case sensitive trigram hit")]
    #[test_case(false, "AB", 1 ; "short keyword folded")]
    #[test_case(true, "AB", 0 ; "short keyword case sensitive")]
    fn test_search(case_sensitive: bool, keyword: &str, expected: usize) {
        let options = ProjectionOptions {
            case_sensitive,
            ..ProjectionOptions::default()
        };
        let (projection, _) = setup(options);
        let hits = projection.search(keyword, 10).unwrap();
        let paragraphs = hits.iter().filter(|row| row.node_type == "p").count();
        assert_eq!(paragraphs, expected);
    }

    #[test]
    fn test_refs_attributes_and_checksum() {
        let (projection, _) = setup(ProjectionOptions::default());

        let refs = projection.refs_by_def_id("20240101120001-para001").unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].def_block_root_id, "20240101120000-doc0001");
        assert!(projection.cache().get_refs("20240101120001-para001").is_some());

        let attrs = projection.attributes_by_block("20240101130001-para001").unwrap();
        assert_eq!(attrs.len(), 1);
        assert_eq!(attrs[0].value, "note");

        assert!(projection.container_checksum("box1").unwrap().is_none());
        let checksum = projection
            .write(|tx| tx.update_container_checksum("box1"))
            .unwrap();
        assert_eq!(projection.container_checksum("box1").unwrap(), Some(checksum));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_a\\b"), "50\\%\\_a\\\\b");
    }
}
