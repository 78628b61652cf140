//! Shard files
//!
//! Each shard is written to its own file named by its two hex digit shard key.
//! Writes go to a temporary sibling first and are renamed into place, so a crash
//! never leaves a half written shard behind. Loading decodes all shard files on
//! a small rayon pool. A single undecodable file discards the whole directory:
//! the index is derived data and is rebuilt from the tree files instead of being
//! served partially.

use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tessera_config::BlockTreeConfig;
use tessera_core::hashing::{shard_key, shard_of, SHARD_COUNT};
use tracing::{debug, error, info, warn};

use crate::error::{BlockTreeError, BlockTreeResult};
use crate::record::BlockRecord;
use crate::store::BlockTree;

const SLOW_IO: Duration = Duration::from_secs(2);

type ShardMap = HashMap<String, BlockRecord>;

/// Outcome of a save pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveStats {
    pub written: usize,
    pub removed: usize,
    /// Dirty shards left for a later pass because they changed too recently
    pub deferred: usize,
}

impl BlockTree {
    /// Open the index stored in `dir`, loading every shard file found there
    pub fn open(dir: impl Into<PathBuf>, config: &BlockTreeConfig) -> BlockTreeResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| BlockTreeError::io(&dir, e))?;

        let tree = Self::with_dir(Some(dir.clone()), config.settle());
        let start = Instant::now();

        let files = shard_files(&dir)?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.effective_load_workers())
            .thread_name(|i| format!("blocktree-load-{}", i))
            .build()
            .map_err(|e| BlockTreeError::ThreadPool(e.to_string()))?;

        let loaded: BlockTreeResult<Vec<ShardMap>> =
            pool.install(|| files.par_iter().map(|path| read_shard(path)).collect());

        let maps = match loaded {
            Ok(maps) => maps,
            Err(err) => {
                if err.is_corruption() {
                    error!(dir = %dir.display(), error = %err, "Block tree is corrupted, removing it");
                    if let Err(e) = fs::remove_dir_all(&dir) {
                        warn!(dir = %dir.display(), error = %e, "Failed to remove corrupted block tree");
                    }
                }
                return Err(err);
            }
        };

        let mut blocks = 0;
        for map in maps {
            for (id, record) in map {
                // Re-shard on load so a renamed file can never hide a record.
                let mut shard = tree.shards[shard_of(&id)].lock();
                shard.blocks.insert(id, record);
                blocks += 1;
            }
        }

        let elapsed = start.elapsed();
        if elapsed > SLOW_IO {
            warn!(elapsed_ms = elapsed.as_millis() as u64, blocks, "Slow block tree load");
        } else {
            info!(elapsed_ms = elapsed.as_millis() as u64, blocks, shards = files.len(), "Loaded block tree");
        }
        Ok(tree)
    }

    /// Write dirty shards to disk
    ///
    /// Without `force`, shards changed within the settle window are skipped.
    /// With `force`, every shard is written regardless of its dirty marker.
    pub fn save(&self, force: bool) -> BlockTreeResult<SaveStats> {
        let Some(dir) = self.dir.as_deref() else {
            return Ok(SaveStats::default());
        };
        fs::create_dir_all(dir).map_err(|e| BlockTreeError::io(dir, e))?;

        let start = Instant::now();
        let mut stats = SaveStats::default();
        for (index, shard) in self.shards.iter().enumerate() {
            let (data, marker) = {
                let mut guard = shard.lock();
                match guard.changed_at {
                    None if !force => continue,
                    Some(changed) if !force && changed.elapsed() < self.settle => {
                        stats.deferred += 1;
                        continue;
                    }
                    _ => {}
                }
                let data = if guard.blocks.is_empty() {
                    None
                } else {
                    Some(encode_shard(index, &guard.blocks)?)
                };
                (data, guard.changed_at.take())
            };

            let path = dir.join(shard_key(index));
            let result = match data {
                Some(bytes) => write_atomic(&path, &bytes).map(|_| stats.written += 1),
                None => remove_if_exists(&path).map(|removed| {
                    if removed {
                        stats.removed += 1
                    }
                }),
            };

            if let Err(err) = result {
                // Keep the shard dirty so the next pass retries it.
                let mut guard = shard.lock();
                if guard.changed_at.is_none() {
                    guard.changed_at = marker.or_else(|| Some(Instant::now()));
                }
                return Err(err);
            }
        }

        let elapsed = start.elapsed();
        if elapsed > SLOW_IO {
            warn!(elapsed_ms = elapsed.as_millis() as u64, written = stats.written, "Slow block tree save");
        } else if stats.written > 0 || stats.removed > 0 {
            debug!(
                written = stats.written,
                removed = stats.removed,
                deferred = stats.deferred,
                "Saved block tree shards"
            );
        }
        Ok(stats)
    }

    /// Clear the index and delete its directory
    pub fn destroy(&self) -> BlockTreeResult<()> {
        self.clear();
        for shard in &self.shards {
            shard.lock().changed_at = None;
        }
        if let Some(dir) = self.dir.as_deref() {
            if dir.exists() {
                fs::remove_dir_all(dir).map_err(|e| BlockTreeError::io(dir, e))?;
            }
            info!(dir = %dir.display(), "Removed block tree");
        }
        Ok(())
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }
}

fn shard_files(dir: &Path) -> BlockTreeResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| BlockTreeError::io(dir, e))? {
        let entry = entry.map_err(|e| BlockTreeError::io(dir, e))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let is_shard = name.len() == 2
            && usize::from_str_radix(name, 16).map_or(false, |shard| shard < SHARD_COUNT);
        if is_shard && entry.path().is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

fn read_shard(path: &Path) -> BlockTreeResult<ShardMap> {
    let bytes = fs::read(path).map_err(|e| BlockTreeError::io(path, e))?;
    let (map, _) = bincode::serde::decode_from_slice::<ShardMap, _>(&bytes, bincode::config::standard())
        .map_err(|e| BlockTreeError::Corrupted {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })?;
    Ok(map)
}

fn encode_shard(index: usize, map: &ShardMap) -> BlockTreeResult<Vec<u8>> {
    bincode::serde::encode_to_vec(map, bincode::config::standard()).map_err(|e| BlockTreeError::Encode {
        shard: shard_key(index),
        detail: e.to_string(),
    })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> BlockTreeResult<()> {
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| BlockTreeError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| BlockTreeError::io(path, e))
}

fn remove_if_exists(path: &Path) -> BlockTreeResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(BlockTreeError::io(path, e)),
    }
}
