//! 採用済み開局の集合と、そのファイル保存。
//!
//! ファイル形式は 1 行 1 開局の UTF-8 テキスト。保存は常に全量書き換えで、
//! 同じディレクトリの一時ファイルに書いてから rename する。

use std::collections::HashSet;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::error::CheckpointError;
use crate::opening::{decode, CanonicalKey};

/// 対称形で重複しない採用済み開局。追加順を保つ。
#[derive(Clone, Debug)]
pub struct AcceptedSet {
    board_size: u32,
    openings: Vec<String>,
    keys: HashSet<CanonicalKey>,
}

impl AcceptedSet {
    pub fn new(board_size: u32) -> Self {
        Self {
            board_size,
            openings: Vec::new(),
            keys: HashSet::new(),
        }
    }

    /// ファイルから読み込む。ファイルが無ければ空集合。
    pub fn load(path: &Path, board_size: u32) -> Result<Self, CheckpointError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::new(board_size)),
            Err(source) => {
                return Err(CheckpointError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        let set = Self::from_lines(text.lines(), board_size);
        log::info!("loaded {} openings from {}", set.len(), path.display());
        Ok(set)
    }

    /// 前後の空白を落とし、空行は飛ばす。対称形の重複は先に現れた方を残す。
    pub fn from_lines<'a>(lines: impl IntoIterator<Item = &'a str>, board_size: u32) -> Self {
        let mut set = Self::new(board_size);
        for line in lines {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if !set.try_insert(line) {
                log::debug!("checkpoint: dropping symmetric duplicate {line}");
            }
        }
        set
    }

    pub fn key_of(&self, opening: &str) -> CanonicalKey {
        decode(opening).canonical_key(self.board_size)
    }

    pub fn contains_key(&self, key: &CanonicalKey) -> bool {
        self.keys.contains(key)
    }

    /// 未登録の形なら追加して `true`。
    pub fn try_insert(&mut self, opening: &str) -> bool {
        let key = self.key_of(opening);
        self.insert_with_key(opening.to_string(), key)
    }

    /// キー計算済みの開局を追加する。既に同じキーがあれば何もしない。
    pub fn insert_with_key(&mut self, opening: String, key: CanonicalKey) -> bool {
        if !self.keys.insert(key) {
            return false;
        }
        self.openings.push(opening);
        true
    }

    pub fn len(&self) -> usize {
        self.openings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.openings.is_empty()
    }

    pub fn openings(&self) -> &[String] {
        &self.openings
    }

    /// 全量を書き出す。空集合なら空ファイルになる。
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let write_err = |source: io::Error| CheckpointError::Write {
            path: path.to_path_buf(),
            source,
        };
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        {
            let mut w = BufWriter::new(tmp.as_file());
            for opening in &self.openings {
                writeln!(w, "{opening}").map_err(write_err)?;
            }
            w.flush().map_err(write_err)?;
        }
        if let Some(perms) = target_permissions(path) {
            tmp.as_file().set_permissions(perms).map_err(write_err)?;
        }
        tmp.as_file().sync_all().map_err(write_err)?;
        tmp.persist(path).map_err(|e| write_err(e.error))?;
        Ok(())
    }
}

/// 書き換え後も元ファイルの権限を保つ。unix で新規作成する場合は 0644。
#[cfg(unix)]
fn target_permissions(path: &Path) -> Option<fs::Permissions> {
    use std::os::unix::fs::PermissionsExt;
    Some(
        fs::metadata(path)
            .map(|m| m.permissions())
            .unwrap_or_else(|_| fs::Permissions::from_mode(0o644)),
    )
}

#[cfg(not(unix))]
fn target_permissions(path: &Path) -> Option<fs::Permissions> {
    fs::metadata(path).ok().map(|m| m.permissions())
}
