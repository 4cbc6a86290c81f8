//! Sector Number, Sector Size, and Sector Record

use std::fmt;
use std::ops::{Add, Sub};

/// セクタテーブル内の位置を示すセクタ番号.
///
/// 割当結果として利用者に返されるハンドルでもある.
/// 実メモリ上のアドレスへの変換は、利用者側の責務.
#[derive(Debug, Clone, Copy, PartialOrd, Ord, PartialEq, Eq, Hash)]
pub struct SectorNo(pub(crate) u32);
impl SectorNo {
    /// 取り得るセクタ番号の最大値.
    ///
    /// 永続化時には符号付き32bit整数で表現されるので、その範囲に制限されている.
    pub const MAX: u32 = 0x7FFF_FFFF;

    /// セクタ番号の値を返す.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub(crate) fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// `value`を対応するセクタ番号に変換する.
    ///
    /// `value`の値が`SectorNo::MAX`を超える場合には`None`が返される.
    pub fn from_u32(value: u32) -> Option<Self> {
        if value <= Self::MAX {
            Some(SectorNo(value))
        } else {
            None
        }
    }
}
impl From<u16> for SectorNo {
    fn from(from: u16) -> Self {
        SectorNo(u32::from(from))
    }
}
impl Add<u32> for SectorNo {
    type Output = Self;
    fn add(self, rhs: u32) -> Self {
        let value = self.0 + rhs;
        SectorNo::from_u32(value).expect("sector number overflow")
    }
}
impl Sub<u32> for SectorNo {
    type Output = Self;
    fn sub(self, rhs: u32) -> Self {
        let value = self.0.checked_sub(rhs).expect("sector number underflow");
        SectorNo(value)
    }
}
impl fmt::Display for SectorNo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// セクタに記録される領域のサイズ.
///
/// 永続化時には符号付き整数にエンコードされる:
///
/// - 使用済領域: 正の値
/// - 空き領域: 負の値
/// - 領域の先頭でも末尾でもないセクタ: `0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectorSize {
    /// 長さが`n`の使用済領域.
    Used(u32),

    /// 長さが`n`の空き領域.
    Free(u32),

    /// 領域の先頭・末尾のいずれでもない(意味のある値を保持していない)セクタ.
    Unmarked,
}
impl SectorSize {
    /// 領域の長さを返す.
    ///
    /// `Unmarked`の場合には`0`となる.
    pub fn len(self) -> u32 {
        match self {
            SectorSize::Used(n) | SectorSize::Free(n) => n,
            SectorSize::Unmarked => 0,
        }
    }

    /// `Unmarked`なら`true`を返す.
    pub fn is_empty(self) -> bool {
        self == SectorSize::Unmarked
    }

    /// 空き領域なら`true`を返す.
    pub fn is_free(self) -> bool {
        match self {
            SectorSize::Free(_) => true,
            _ => false,
        }
    }

    /// 使用済領域なら`true`を返す.
    pub fn is_used(self) -> bool {
        match self {
            SectorSize::Used(_) => true,
            _ => false,
        }
    }

    pub(crate) fn to_i32(self) -> i32 {
        match self {
            SectorSize::Used(n) => n as i32,
            SectorSize::Free(n) => -(n as i32),
            SectorSize::Unmarked => 0,
        }
    }

    pub(crate) fn from_i32(value: i32) -> Self {
        if value > 0 {
            SectorSize::Used(value as u32)
        } else if value < 0 {
            SectorSize::Free(value.wrapping_neg() as u32)
        } else {
            SectorSize::Unmarked
        }
    }
}

/// セクタテーブルの一要素.
///
/// `prev`と`next`は、レコードが現在所属しているリスト(使用済 or 空き)内での前後の要素を指す.
/// `None`は「隣接要素無し」を意味し、番兵の終端のみが保持する.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectorRecord {
    /// リスト内の前の要素.
    pub prev: Option<SectorNo>,

    /// リスト内の次の要素.
    pub next: Option<SectorNo>,

    /// 領域のサイズ.
    pub size: SectorSize,
}
impl SectorRecord {
    /// 何の情報も保持していないレコード.
    pub const UNMARKED: SectorRecord = SectorRecord {
        prev: None,
        next: None,
        size: SectorSize::Unmarked,
    };

    /// 永続化時のレコードのサイズ(バイト数).
    pub const SIZE: usize = 4 * 3;

    pub(crate) fn new(prev: Option<SectorNo>, next: Option<SectorNo>, size: SectorSize) -> Self {
        SectorRecord { prev, next, size }
    }
}

pub(crate) fn link_to_i32(link: Option<SectorNo>) -> i32 {
    link.map_or(-1, |n| n.as_u32() as i32)
}

pub(crate) fn link_from_i32(value: i32) -> Option<Option<SectorNo>> {
    if value == -1 {
        Some(None)
    } else if value >= 0 {
        Some(Some(SectorNo(value as u32)))
    } else {
        None
    }
}
