//! 開局文字列 <-> 着手列の変換。

use super::{Move, Opening};

/// `h8i9j10` 形式の文字列を着手列に変換する。
///
/// - 英字が1手の開始（列、大文字小文字を区別しない、`a` → 0）
/// - 続く数字列が 1-indexed の行番号
/// - 数字の続かない英字が現れた時点で打ち切る（それまでの手は有効）
/// - 英数字以外の文字は読み飛ばす
pub fn decode(text: &str) -> Opening {
    let bytes = text.as_bytes();
    let mut moves = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        if !c.is_ascii_alphabetic() {
            i += 1;
            continue;
        }
        let col = i32::from(c.to_ascii_lowercase() - b'a');
        i += 1;

        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if start == i {
            break;
        }
        // 行番号が i32 に収まらない場合も打ち切り
        let Ok(row) = text[start..i].parse::<i32>() else {
            break;
        };
        moves.push(Move::new(col, row - 1));
    }
    Opening::new(moves)
}

/// 列を英字 1 文字で表せる範囲
const MAX_COLUMNS: i32 = 26;

/// 着手列を `h8i9` 形式の文字列に戻す。
///
/// 列が `a`..`z` に収まらない、または行が負の着手を含む場合は `None`。
pub fn encode(moves: &[Move]) -> Option<String> {
    let mut out = String::with_capacity(moves.len() * 3);
    for mv in moves {
        if !(0..MAX_COLUMNS).contains(&mv.col) || mv.row < 0 {
            return None;
        }
        let col = u8::try_from(mv.col).ok()?;
        out.push(char::from(b'a' + col));
        out.push_str(&(mv.row + 1).to_string());
    }
    Some(out)
}
