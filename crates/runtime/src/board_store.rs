// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable board storage (spec.md §4.8 / §6): a directory per board holding
//! `board.json` plus per-card `cards/<name>.js` / `cards/<name>_view.js`
//! files, guarded by a FIFO, non-reentrant, path-keyed lock.
//!
//! Grounded on `examples/other_examples/...groblegark-oddjobs...lifecycle-mod.rs.rs`'s
//! `fs2`-backed exclusive lock held for the lifetime of a `File` handle; here
//! the lock only needs to be cooperative within this process (the runtime is
//! the sole writer of the board directory), so a registry of
//! `tokio::sync::Mutex` guards keyed by absolute path stands in for the
//! cross-process `fs2` lock, since `tokio::sync::Mutex` is itself FIFO and
//! non-reentrant by construction.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Result, RuntimeError};
use crate::model::Board;

const CARDS_DIR: &str = "cards";
const BOARD_FILE: &str = "board.json";
const AUTOPILOT_FILE: &str = "board.js";
const BOARD_UI_FILE: &str = "board_ui.js";

/// Holds a board directory's lock for as long as the guard lives.
pub struct BoardLock {
    _guard: OwnedMutexGuard<()>,
}

/// Registry of per-path FIFO locks plus the boards root directory.
pub struct BoardStore {
    root: PathBuf,
    locks: SyncMutex<BTreeMap<PathBuf, Arc<Mutex<()>>>>,
}

impl BoardStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), locks: SyncMutex::new(BTreeMap::new()) }
    }

    fn board_dir(&self, board_id: &str) -> PathBuf {
        self.root.join(board_id)
    }

    /// Acquire the FIFO lock for `board_id`'s directory. Waiters queue in
    /// arrival order (spec.md §4.8: "acquisition is FIFO").
    async fn lock(&self, board_id: &str) -> BoardLock {
        let mutex = {
            let mut locks = self.locks.lock();
            Arc::clone(locks.entry(self.board_dir(board_id)).or_insert_with(|| Arc::new(Mutex::new(()))))
        };
        let guard = mutex.lock_owned().await;
        BoardLock { _guard: guard }
    }

    /// Read a board, reconstructing `cards[].rules_code`/`html` from the
    /// per-card files (spec.md §4.8 "Read reconstruction").
    pub async fn load(&self, board_id: &str) -> Result<Board> {
        let _lock = self.lock(board_id).await;
        self.load_locked(board_id)
    }

    fn load_locked(&self, board_id: &str) -> Result<Board> {
        let dir = self.board_dir(board_id);
        let board_path = dir.join(BOARD_FILE);
        let text = std::fs::read_to_string(&board_path)
            .map_err(|e| RuntimeError::StoreError(format!("reading {}: {e}", board_path.display())))?;
        let mut board: Board = serde_json::from_str(&text)
            .map_err(|e| RuntimeError::StoreError(format!("parsing {}: {e}", board_path.display())))?;

        let autopilot_path = dir.join(AUTOPILOT_FILE);
        if let Ok(source) = std::fs::read_to_string(&autopilot_path) {
            board.autopilot_source = Some(source);
        }
        let ui_path = dir.join(BOARD_UI_FILE);
        if let Ok(ui) = std::fs::read_to_string(&ui_path) {
            board.board_ui = Some(ui);
        }

        let cards_dir = dir.join(CARDS_DIR);
        for card in &mut board.cards {
            let code_path = cards_dir.join(format!("{}.js", card.name));
            if let Ok(code) = std::fs::read_to_string(&code_path) {
                card.rules_code = code;
            }
            let view_path = cards_dir.join(format!("{}_view.js", card.name));
            if let Ok(html) = std::fs::read_to_string(&view_path) {
                card.html = Some(html);
            }
        }
        Ok(board)
    }

    /// Persist `board`, writing `board.json` without `rulesCode`/`html` and
    /// one `cards/<name>.js` / `cards/<name>_view.js` pair per card, then
    /// sweeping orphaned per-card files (spec.md §4.8 "Orphan sweep").
    pub async fn save(&self, board: &Board) -> Result<()> {
        let _lock = self.lock(&board.name).await;
        self.save_locked(board)
    }

    fn save_locked(&self, board: &Board) -> Result<()> {
        let dir = self.board_dir(&board.name);
        let cards_dir = dir.join(CARDS_DIR);
        std::fs::create_dir_all(&cards_dir)
            .map_err(|e| RuntimeError::StoreError(format!("creating {}: {e}", cards_dir.display())))?;

        let mut stripped = board.clone();
        for card in &mut stripped.cards {
            card.rules_code.clear();
            card.html = None;
        }
        let board_path = dir.join(BOARD_FILE);
        let text = serde_json::to_string_pretty(&stripped)
            .map_err(|e| RuntimeError::StoreError(format!("serializing board: {e}")))?;
        std::fs::write(&board_path, text)
            .map_err(|e| RuntimeError::StoreError(format!("writing {}: {e}", board_path.display())))?;

        if let Some(source) = &board.autopilot_source {
            std::fs::write(dir.join(AUTOPILOT_FILE), source)
                .map_err(|e| RuntimeError::StoreError(format!("writing board.js: {e}")))?;
        }
        if let Some(ui) = &board.board_ui {
            std::fs::write(dir.join(BOARD_UI_FILE), ui)
                .map_err(|e| RuntimeError::StoreError(format!("writing board_ui.js: {e}")))?;
        }

        let mut live_names = std::collections::HashSet::new();
        for card in &board.cards {
            live_names.insert(card.name.clone());
            std::fs::write(cards_dir.join(format!("{}.js", card.name)), &card.rules_code)
                .map_err(|e| RuntimeError::StoreError(format!("writing card {}: {e}", card.name)))?;
            match &card.html {
                Some(html) => {
                    std::fs::write(cards_dir.join(format!("{}_view.js", card.name)), html)
                        .map_err(|e| RuntimeError::StoreError(format!("writing view for {}: {e}", card.name)))?;
                }
                None => {
                    let _ = std::fs::remove_file(cards_dir.join(format!("{}_view.js", card.name)));
                }
            }
        }
        self.sweep_orphans(&cards_dir, &live_names)?;
        Ok(())
    }

    fn sweep_orphans(&self, cards_dir: &Path, live_names: &std::collections::HashSet<String>) -> Result<()> {
        let entries = match std::fs::read_dir(cards_dir) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            let base = file_name.strip_suffix("_view.js").or_else(|| file_name.strip_suffix(".js"));
            if let Some(base) = base {
                if !live_names.contains(base) {
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        Ok(())
    }

    /// One-shot migration of the legacy flat layout (`<name>.json` plus
    /// sibling `<name>.js`/`<name>_ui.js`/`<cardName>.js` files at the boards
    /// root) into the directory layout. Idempotent: boards already in the
    /// directory layout are untouched. Per-board failures are logged and
    /// skipped (spec.md §4.8).
    pub fn migrate_legacy_layout(&self) -> Result<()> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(_) => return Ok(()),
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
            if let Err(e) = self.migrate_one(stem) {
                tracing::warn!(board = stem, error = %e, "legacy board migration failed, skipping");
            }
        }
        Ok(())
    }

    fn migrate_one(&self, name: &str) -> Result<()> {
        let legacy_json = self.root.join(format!("{name}.json"));
        let target_dir = self.board_dir(name);
        if target_dir.is_dir() {
            return Ok(());
        }
        let text = std::fs::read_to_string(&legacy_json)
            .map_err(|e| RuntimeError::StoreError(format!("reading legacy {name}.json: {e}")))?;
        let mut board: Board = serde_json::from_str(&text)
            .map_err(|e| RuntimeError::StoreError(format!("parsing legacy {name}.json: {e}")))?;

        let legacy_source = self.root.join(format!("{name}.js"));
        if let Ok(source) = std::fs::read_to_string(&legacy_source) {
            board.autopilot_source = Some(source);
        }
        let legacy_ui = self.root.join(format!("{name}_ui.js"));
        if let Ok(ui) = std::fs::read_to_string(&legacy_ui) {
            board.board_ui = Some(ui);
        }
        for card in &mut board.cards {
            let legacy_card = self.root.join(format!("{}.js", card.name));
            if let Ok(code) = std::fs::read_to_string(&legacy_card) {
                card.rules_code = code;
            }
        }
        self.save_locked(&board)?;
        let _ = std::fs::remove_file(&legacy_json);
        let _ = std::fs::remove_file(&legacy_source);
        let _ = std::fs::remove_file(&legacy_ui);
        for card in &board.cards {
            let _ = std::fs::remove_file(self.root.join(format!("{}.js", card.name)));
        }
        Ok(())
    }
}

/// Adapts a [`BoardStore`] to [`crate::runner::BoardProvider`].
#[async_trait::async_trait]
impl crate::runner::BoardProvider for BoardStore {
    async fn get_board(&self, board_id: &str) -> Result<Board> {
        self.load(board_id).await
    }
}

#[cfg(test)]
#[path = "board_store_tests.rs"]
mod tests;
