//! 開局（opening）の表現と盤面対称性による正規化。
//!
//! 盤面座標は 0-indexed の `(col, row)`。文字列表現は `h8i9` のように
//! 「列の英字 + 1-indexed の行番号」を繰り返したもの。

pub mod canonical;
pub mod codec;

use std::fmt;

use crate::error::OpeningError;

pub use canonical::{canonicalize, CanonicalKey, Symmetry};
pub use codec::{decode, encode};

/// 盤上の1手。
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Move {
    pub col: i32,
    pub row: i32,
}

impl Move {
    pub const fn new(col: i32, row: i32) -> Self {
        Self { col, row }
    }

    pub fn is_on_board(self, board_size: u32) -> bool {
        let size = board_size as i32;
        (0..size).contains(&self.col) && (0..size).contains(&self.row)
    }

    /// 先手（黒）から交互に着手するときの手番タグ。偶数手目が 1、奇数手目が 2。
    pub fn player_tag(index: usize) -> u8 {
        if index % 2 == 0 { 1 } else { 2 }
    }
}

impl From<(i32, i32)> for Move {
    fn from((col, row): (i32, i32)) -> Self {
        Self { col, row }
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.col, self.row)
    }
}

/// 着手順を保持した開局。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Opening {
    moves: Vec<Move>,
}

impl Opening {
    pub fn new(moves: Vec<Move>) -> Self {
        Self { moves }
    }

    pub fn moves(&self) -> &[Move] {
        &self.moves
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    /// 1手以上あり、全ての着手が盤内にあることを確認する。
    pub fn validate(&self, board_size: u32) -> Result<(), OpeningError> {
        if self.moves.is_empty() {
            return Err(OpeningError::Empty);
        }
        if let Some(&mv) = self.moves.iter().find(|mv| !mv.is_on_board(board_size)) {
            return Err(OpeningError::OutOfBoard { mv, board_size });
        }
        Ok(())
    }

    /// 盤サイズ上での正規化キー。
    pub fn canonical_key(&self, board_size: u32) -> CanonicalKey {
        canonicalize(&self.moves, board_size)
    }

    /// 評価エンジンへ渡す `col,row,player` の並び。
    pub fn tagged_moves(&self) -> impl Iterator<Item = (Move, u8)> + '_ {
        self.moves.iter().enumerate().map(|(i, &mv)| (mv, Move::player_tag(i)))
    }
}

impl From<Vec<Move>> for Opening {
    fn from(moves: Vec<Move>) -> Self {
        Self::new(moves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_empty_and_out_of_board() {
        assert_eq!(Opening::default().validate(15), Err(OpeningError::Empty));

        let opening = decode("a1o15");
        assert!(opening.validate(15).is_ok());
        assert_eq!(
            opening.validate(14),
            Err(OpeningError::OutOfBoard {
                mv: Move::new(14, 14),
                board_size: 14
            })
        );

        // a0 は行 -1 として扱われ盤外になる
        assert!(decode("a0").validate(20).is_err());
    }

    #[test]
    fn tagged_moves_alternate_players() {
        let opening = decode("h8i9j10");
        let tags: Vec<u8> = opening.tagged_moves().map(|(_, tag)| tag).collect();
        assert_eq!(tags, vec![1, 2, 1]);
    }
}
