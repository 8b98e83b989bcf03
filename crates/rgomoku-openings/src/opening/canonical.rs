//! 盤面の二面体群（回転 4 + 鏡映 4）による正規化。
//!
//! 着手順と手番は捨て、占有マスの集合だけを比較する。

use super::Move;

/// 正方形盤の 8 つの対称変換。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Symmetry {
    Identity,
    Rotate90,
    Rotate180,
    Rotate270,
    FlipHorizontal,
    FlipVertical,
    Transpose,
    AntiTranspose,
}

impl Symmetry {
    pub const ALL: [Symmetry; 8] = [
        Symmetry::Identity,
        Symmetry::Rotate90,
        Symmetry::Rotate180,
        Symmetry::Rotate270,
        Symmetry::FlipHorizontal,
        Symmetry::FlipVertical,
        Symmetry::Transpose,
        Symmetry::AntiTranspose,
    ];

    /// `n = board_size - 1` として座標を変換する。
    pub fn apply(self, mv: Move, board_size: u32) -> Move {
        let n = board_size as i32 - 1;
        let Move { col: x, row: y } = mv;
        let (col, row) = match self {
            Symmetry::Identity => (x, y),
            Symmetry::Rotate90 => (n - y, x),
            Symmetry::Rotate180 => (n - x, n - y),
            Symmetry::Rotate270 => (y, n - x),
            Symmetry::FlipHorizontal => (n - x, y),
            Symmetry::FlipVertical => (x, n - y),
            Symmetry::Transpose => (y, x),
            Symmetry::AntiTranspose => (n - y, n - x),
        };
        Move::new(col, row)
    }

    pub fn apply_all(self, moves: &[Move], board_size: u32) -> Vec<Move> {
        moves.iter().map(|&mv| self.apply(mv, board_size)).collect()
    }
}

/// 対称変換で同一視した開局の代表値（ソート済み座標列の辞書順最小）。
///
/// 空の着手列は空のキーになる。
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalKey(Vec<Move>);

impl CanonicalKey {
    pub fn cells(&self) -> &[Move] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

pub fn canonicalize(moves: &[Move], board_size: u32) -> CanonicalKey {
    if moves.is_empty() {
        return CanonicalKey::default();
    }
    let mut best: Option<Vec<Move>> = None;
    for sym in Symmetry::ALL {
        let mut image = sym.apply_all(moves, board_size);
        image.sort_unstable();
        if best.as_ref().is_none_or(|b| image < *b) {
            best = Some(image);
        }
    }
    CanonicalKey(best.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opening::decode;

    const SAMPLES: &[&str] = &["h8i9j10", "a1", "b2c3d5e1", "j10k10l11m9n12", "o15a1h8"];

    #[test]
    fn key_is_invariant_under_every_symmetry() {
        for board_size in [15u32, 20] {
            for text in SAMPLES {
                let moves = decode(text).moves().to_vec();
                let key = canonicalize(&moves, board_size);
                for sym in Symmetry::ALL {
                    let image = sym.apply_all(&moves, board_size);
                    assert_eq!(canonicalize(&image, board_size), key, "{text} {sym:?} {board_size}");
                }
            }
        }
    }

    #[test]
    fn key_is_deterministic_and_ignores_move_order() {
        let a = decode("h8i9j10").moves().to_vec();
        let b = decode("j10h8i9").moves().to_vec();
        assert_eq!(canonicalize(&a, 15), canonicalize(&a, 15));
        assert_eq!(canonicalize(&a, 15), canonicalize(&b, 15));
    }

    #[test]
    fn different_footprints_differ() {
        let a = decode("h8i9").moves().to_vec();
        let b = decode("h8i10").moves().to_vec();
        assert_ne!(canonicalize(&a, 15), canonicalize(&b, 15));
    }

    #[test]
    fn empty_moves_map_to_empty_key() {
        let key = canonicalize(&[], 15);
        assert!(key.is_empty());
        assert_eq!(key, CanonicalKey::default());
    }

    #[test]
    fn key_depends_on_board_size() {
        // 15 路では中央対称だが 20 路では端からの距離が変わる
        let moves = decode("a1o15").moves().to_vec();
        assert_eq!(canonicalize(&moves, 15).cells(), &[Move::new(0, 0), Move::new(14, 14)]);
        let moved = Symmetry::FlipHorizontal.apply_all(&moves, 20);
        assert_ne!(canonicalize(&moved, 15), canonicalize(&moves, 15));
    }
}
