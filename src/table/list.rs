//! 使用済リストと空きリストの双方で共有されるリスト操作.
//!
//! いずれの関数も、セクタテーブル(レコードの配列)に対して直接作用する.
//! 引数のセクタ番号が、テーブルの範囲内であることは呼び出し側が保証する.
use super::sector::{SectorNo, SectorRecord, SectorSize};

pub(crate) fn record(records: &[SectorRecord], n: SectorNo) -> &SectorRecord {
    &records[n.as_usize()]
}

pub(crate) fn record_mut(records: &mut [SectorRecord], n: SectorNo) -> &mut SectorRecord {
    &mut records[n.as_usize()]
}

/// リスト内の前後の要素を返す.
///
/// # Panics
///
/// `n`がどのリストにもリンクされていない(i.e., 番兵の終端である)場合には、現在のスレッドがパニックする.
pub(crate) fn neighbors(records: &[SectorRecord], n: SectorNo) -> (SectorNo, SectorNo) {
    match *record(records, n) {
        SectorRecord {
            prev: Some(prev),
            next: Some(next),
            ..
        } => (prev, next),
        ref r => panic!("Unlinked sector: {} ({:?})", n, r),
    }
}

/// `n`をリストから外す.
///
/// `n`自身のリンク情報は更新されない.
pub(crate) fn unlink(records: &mut [SectorRecord], n: SectorNo) {
    let (prev, next) = neighbors(records, n);
    record_mut(records, prev).next = Some(next);
    record_mut(records, next).prev = Some(prev);
}

/// `n`をリストの先頭(i.e., 開始番兵`begin`の直後)に挿入する.
pub(crate) fn push_front(records: &mut [SectorRecord], begin: SectorNo, n: SectorNo) {
    let first = record(records, begin)
        .next
        .expect("The begin sentinel always has a successor");
    record_mut(records, begin).next = Some(n);
    record_mut(records, first).prev = Some(n);

    let r = record_mut(records, n);
    r.prev = Some(begin);
    r.next = Some(first);
}

/// リスト内の`old`の位置を`new`で置き換える.
///
/// `old`のリンク情報は、`new`へコピーされた後もそのまま残るので、必要に応じて呼び出し側で消去すること.
pub(crate) fn replace(records: &mut [SectorRecord], old: SectorNo, new: SectorNo) {
    let (prev, next) = neighbors(records, old);
    record_mut(records, prev).next = Some(new);
    record_mut(records, next).prev = Some(new);

    let r = record_mut(records, new);
    r.prev = Some(prev);
    r.next = Some(next);
}

/// `head`から始まる領域のサイズを、先頭と末尾の両方のセクタに書き込む.
///
/// 末尾セクタのリンク情報は消去される.
/// 先頭セクタのリンク情報は変更されない.
pub(crate) fn write_region(records: &mut [SectorRecord], head: SectorNo, size: SectorSize) {
    debug_assert!(size.len() > 0);
    let tail = head + (size.len() - 1);
    if tail != head {
        *record_mut(records, tail) = SectorRecord::new(None, None, size);
    }
    record_mut(records, head).size = size;
}

/// 領域の先頭または末尾ではなくなったセクタを消去する.
pub(crate) fn clear(records: &mut [SectorRecord], n: SectorNo) {
    *record_mut(records, n) = SectorRecord::UNMARKED;
}

/// `tail`が空き領域の末尾セクタであれば、その領域の先頭と長さを返す.
///
/// 番兵や使用済領域の末尾の場合には`None`が返される.
pub(crate) fn tail_to_head(records: &[SectorRecord], tail: SectorNo) -> Option<(SectorNo, u32)> {
    if let SectorSize::Free(len) = record(records, tail).size {
        Some((tail + 1 - len, len))
    } else {
        None
    }
}

/// `head`が空き領域の先頭セクタであれば、その長さを返す.
pub(crate) fn free_len(records: &[SectorRecord], head: SectorNo) -> Option<u32> {
    if let SectorSize::Free(len) = record(records, head).size {
        Some(len)
    } else {
        None
    }
}
