//! セクタテーブル.
//!
//! # テーブルのレイアウト
//!
//! ```text
//! |UB|FB|region ... region|FE|UE|
//!
//! UB: 使用済リストの開始番兵 (0)
//! FB: 空きリストの開始番兵 (1)
//! FE: 空きリストの終了番兵 (capacity - 2)
//! UE: 使用済リストの終了番兵 (capacity - 1)
//! ```
//!
//! 番兵に挟まれた範囲は、アドレス順に隙間なく並んだ領域群に分割される.
//! 各領域は、使用済リストと空きリストのいずれか一方に必ず所属している.
//!
//! 領域の先頭セクタと末尾セクタには、同じサイズ情報が書き込まれている.
//! これにより、解放時に「直前のセクタ」を見るだけで、手前の領域の先頭へと辿ることができる.
use slog::Logger;
use std::collections::HashMap;
use uuid::Uuid;

pub use self::builder::SectorTableBuilder;
pub use self::header::SnapshotHeader;
pub use self::sector::{SectorNo, SectorRecord, SectorSize};

use crate::metrics::SectorTableMetrics;
use crate::{ErrorKind, Result};

mod builder;
mod header;
mod list;
mod sector;
mod snapshot;

/// スナップショットのマジックナンバー.
///
/// "**s**ector **h**eap **t**a**b**le"の略.
pub const MAGIC_NUMBER: [u8; 4] = *b"shtb";

/// スナップショット形式のメジャーバージョン.
pub const MAJOR_VERSION: u16 = 1;

/// スナップショット形式のマイナーバージョン.
pub const MINOR_VERSION: u16 = 0;

/// テーブルの容量の最小値.
///
/// 四つの番兵と、分割可能な空き領域を保持するのに必要なセクタ数.
pub const MIN_CAPACITY: u32 = 8;

/// テーブルの容量の最大値.
pub const MAX_CAPACITY: u32 = SectorNo::MAX;

const USED_BEGIN: SectorNo = SectorNo(0);
const FREE_BEGIN: SectorNo = SectorNo(1);
const FIRST_REGION: SectorNo = SectorNo(2);

/// 番兵の数.
const SENTINELS: u32 = 4;

/// アドレス上で連続したセクタ群.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    /// 領域の先頭セクタ.
    pub start: SectorNo,

    /// 領域のサイズ(状態と長さ).
    pub size: SectorSize,
}
impl Region {
    /// 領域の長さ(セクタ数)を返す.
    pub fn len(&self) -> u32 {
        self.size.len()
    }

    /// 長さが`0`なら`true`を返す.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 領域の終端位置を返す.
    ///
    /// **注意**: 領域は [start, end) の範囲を占めるため、end位置のセクタは含まれない.
    pub fn end(&self) -> SectorNo {
        self.start + self.len()
    }
}

/// 固定容量のセクタテーブル.
///
/// 要求されたセクタ数を持つ領域を割り当て、その先頭のセクタ番号を返す.
/// セクタ番号を実メモリのアドレスへ変換するのは利用者の責務であり、
/// テーブル自体は、管理情報(各セクタのレコード)のみを保持する.
///
/// テーブルはフラットなレコードの配列でしかないため、
/// [`write_to`](#method.write_to)でシリアライズし、
/// [`SectorTableBuilder::restore`](./struct.SectorTableBuilder.html#method.restore)で
/// そのまま復元することができる.
///
/// # 割当戦略
///
/// このテーブルは"FirstFit"戦略を採用している.
///
/// 割当要求が発行されると、空きリストを先頭から辿り、
/// 要求サイズを満たす最初の空き領域が選択される.
/// 選択された領域の先頭部分が割り当てられ、余剰分は、元の領域と同じリスト内の位置に残される.
///
/// 解放時には、アドレス上で前後に隣接する空き領域と併合される.
/// そのため、二つの空き領域が隣り合うことは無い.
///
/// # 注意
///
/// 内部で排他制御は行っていない.
/// 複数のスレッドから利用する場合には、利用者側で直列化を行う必要がある.
///
/// # Examples
///
/// ```
/// use sectorheap::ErrorKind;
/// use sectorheap::table::SectorTable;
///
/// let mut table = SectorTable::new(16).unwrap();
/// let a = table.allocate(4).unwrap();
/// assert_eq!(a.as_u32(), 2);
/// assert_eq!(table.allocate(100).err().map(|e| *e.kind()), Some(ErrorKind::OutOfMemory));
///
/// let snapshot = table.to_bytes();
/// let mut restored = SectorTable::from_bytes(&snapshot).unwrap();
/// restored.release(a).unwrap();
/// assert_eq!(restored.free_sectors(), 12);
/// ```
#[derive(Debug)]
pub struct SectorTable {
    records: Vec<SectorRecord>,
    instance_uuid: Uuid,
    logger: Logger,
    metrics: SectorTableMetrics,
}
impl SectorTable {
    /// デフォルト設定で、指定された容量を持つテーブルを生成する.
    ///
    /// 設定を変更したい場合には[`SectorTableBuilder`](./struct.SectorTableBuilder.html)を使用すること.
    pub fn new(capacity: u32) -> Result<Self> {
        track!(SectorTableBuilder::new(capacity).create())
    }

    pub(crate) fn from_parts(
        records: Vec<SectorRecord>,
        instance_uuid: Uuid,
        logger: Logger,
        metrics: SectorTableMetrics,
    ) -> Self {
        SectorTable {
            records,
            instance_uuid,
            logger,
            metrics,
        }
    }

    /// 初期状態のレコード群を生成する.
    ///
    /// 四つの番兵と、それらに挟まれた範囲全体を占める一つの空き領域から構成される.
    pub(crate) fn initial_records(capacity: u32) -> Vec<SectorRecord> {
        debug_assert!(capacity >= MIN_CAPACITY);
        let used_end = SectorNo(capacity - 1);
        let free_end = SectorNo(capacity - 2);

        let mut records = vec![SectorRecord::UNMARKED; capacity as usize];
        *list::record_mut(&mut records, USED_BEGIN) =
            SectorRecord::new(None, Some(used_end), SectorSize::Used(1));
        *list::record_mut(&mut records, used_end) =
            SectorRecord::new(Some(USED_BEGIN), None, SectorSize::Used(1));

        // 空きリストの番兵もサイズはプラスにしておき、空き領域と誤認されないようにする
        *list::record_mut(&mut records, FREE_BEGIN) =
            SectorRecord::new(None, Some(FIRST_REGION), SectorSize::Used(1));
        *list::record_mut(&mut records, free_end) =
            SectorRecord::new(Some(FIRST_REGION), None, SectorSize::Used(1));

        *list::record_mut(&mut records, FIRST_REGION) =
            SectorRecord::new(Some(FREE_BEGIN), Some(free_end), SectorSize::Unmarked);
        list::write_region(
            &mut records,
            FIRST_REGION,
            SectorSize::Free(capacity - SENTINELS),
        );
        records
    }

    /// `size`セクタ分の領域の割当を行う.
    ///
    /// 成功した場合には、割り当てた領域の先頭のセクタ番号が返される.
    ///
    /// # Errors
    ///
    /// - `size`が`0`の場合には、種類が`ErrorKind::InvalidInput`のエラーが返される
    /// - 十分な空き領域が存在しない場合には、種類が`ErrorKind::OutOfMemory`のエラーが返される
    ///   - この場合、テーブルの状態は変更されない
    pub fn allocate(&mut self, size: u32) -> Result<SectorNo> {
        track_assert!(size > 0, ErrorKind::InvalidInput, "Zero sized allocation");

        let (head, len) = match self.free_regions().find(|r| r.len() >= size) {
            Some(region) => (region.start, region.len()),
            None => {
                self.metrics.nospace_failures.increment();
                debug!(self.logger, "No available free region"; "size" => size);
                track_panic!(
                    ErrorKind::OutOfMemory,
                    "size={}, free_sectors={}",
                    size,
                    self.free_sectors()
                );
            }
        };

        if len > size {
            // 後半の余剰分を新しい空き領域とし、リスト内の元の位置に置き換える
            let rest = head + size;
            list::write_region(&mut self.records, rest, SectorSize::Free(len - size));
            list::replace(&mut self.records, head, rest);
        } else {
            list::unlink(&mut self.records, head);
            self.metrics.removed_free_regions.increment();
        }
        list::write_region(&mut self.records, head, SectorSize::Used(size));
        list::push_front(&mut self.records, USED_BEGIN, head);

        self.metrics.count_allocation(size);
        debug!(self.logger, "Allocated"; "sector" => head.as_u32(), "size" => size);
        Ok(head)
    }

    /// 割当済みの領域の解放を行う.
    ///
    /// 解放された領域は、アドレス上で隣接する空き領域が存在すれば、それらと併合される.
    ///
    /// # 事前条件
    ///
    /// - `sector`は「以前に`allocate`が返した」かつ「未解放」のセクタ番号である
    ///
    /// # Errors
    ///
    /// 事前条件を満たさない場合には、種類が`ErrorKind::InvalidHandle`のエラーが返される.
    /// その場合、テーブルの状態は変更されない.
    ///
    /// # Panics
    ///
    /// デバッグビルドでは、事前条件を満たさない場合に、現在のスレッドがパニックする.
    pub fn release(&mut self, sector: SectorNo) -> Result<()> {
        let len = match self.check_handle(sector) {
            Ok(len) => len,
            Err(e) => {
                if cfg!(debug_assertions) {
                    panic!("Invalid sector number is released: {}", e);
                }
                return Err(track!(e));
            }
        };
        list::unlink(&mut self.records, sector);
        self.metrics.count_releasion(len);

        // 直前のセクタは、手前の領域の末尾か番兵であり、
        // 直後のセクタは、後ろの領域の先頭か番兵である
        let prev = list::tail_to_head(&self.records, sector - 1);
        let next = list::free_len(&self.records, sector + len).map(|n| (sector + len, n));

        list::clear(&mut self.records, sector);
        if len > 1 {
            list::clear(&mut self.records, sector + (len - 1));
        }

        match (prev, next) {
            (None, None) => {
                list::write_region(&mut self.records, sector, SectorSize::Free(len));
                list::push_front(&mut self.records, FREE_BEGIN, sector);
                self.metrics.inserted_free_regions.increment();
                debug!(self.logger, "Released"; "sector" => sector.as_u32(), "size" => len);
            }
            (Some((prev, prev_len)), None) => {
                // 手前の領域を後ろに伸ばす (リスト内の位置は変わらない)
                if prev_len > 1 {
                    list::clear(&mut self.records, sector - 1);
                }
                list::write_region(&mut self.records, prev, SectorSize::Free(prev_len + len));
                self.metrics.coalesced_regions.increment();
                debug!(self.logger, "Released and merged into the preceding free region";
                       "sector" => sector.as_u32(), "size" => len, "head" => prev.as_u32());
            }
            (None, Some((next, next_len))) => {
                // 後ろの領域のリスト内の位置を引き継いで、先頭を解放領域に移す
                list::replace(&mut self.records, next, sector);
                list::clear(&mut self.records, next);
                list::write_region(&mut self.records, sector, SectorSize::Free(len + next_len));
                self.metrics.coalesced_regions.increment();
                debug!(self.logger, "Released and merged with the following free region";
                       "sector" => sector.as_u32(), "size" => len);
            }
            (Some((prev, prev_len)), Some((next, next_len))) => {
                // 後ろの領域をリストから外した後で、手前の領域を伸ばす.
                // 両者がリスト内で隣接していた場合でも、手前の領域のリンクは`unlink`によって更新済み.
                list::unlink(&mut self.records, next);
                list::clear(&mut self.records, next);
                if prev_len > 1 {
                    list::clear(&mut self.records, sector - 1);
                }
                let merged = prev_len + len + next_len;
                list::write_region(&mut self.records, prev, SectorSize::Free(merged));
                self.metrics.removed_free_regions.increment();
                self.metrics.coalesced_regions.add_u64(2);
                debug!(self.logger, "Released and merged with both neighboring free regions";
                       "sector" => sector.as_u32(), "size" => len, "head" => prev.as_u32());
            }
        }
        Ok(())
    }

    /// テーブルの容量(番兵を含むセクタ数)を返す.
    pub fn capacity(&self) -> u32 {
        self.records.len() as u32
    }

    /// テーブルのインスタンスを識別するためのUUIDを返す.
    pub fn instance_uuid(&self) -> Uuid {
        self.instance_uuid
    }

    /// テーブルのレコード列を返す.
    pub fn records(&self) -> &[SectorRecord] {
        &self.records
    }

    /// テーブルのメトリクスを返す.
    pub fn metrics(&self) -> &SectorTableMetrics {
        &self.metrics
    }

    /// 全ての領域を、アドレス順に走査するイテレータを返す.
    pub fn regions(&self) -> Regions {
        Regions {
            records: &self.records,
            position: FIRST_REGION,
            end: self.free_end(),
        }
    }

    /// 空き領域を、空きリスト内の順番で走査するイテレータを返す.
    ///
    /// 割当時には、この順番で探索が行われる.
    pub fn free_regions(&self) -> ListRegions {
        ListRegions::new(&self.records, FREE_BEGIN)
    }

    /// 使用済領域を、使用済リスト内の順番(i.e., 新しく割り当てられた順)で走査するイテレータを返す.
    pub fn used_regions(&self) -> ListRegions {
        ListRegions::new(&self.records, USED_BEGIN)
    }

    /// 空きセクタの総数を返す.
    pub fn free_sectors(&self) -> u32 {
        self.free_regions().map(|r| r.len()).sum()
    }

    /// 割当済みセクタの総数を返す.
    pub fn used_sectors(&self) -> u32 {
        self.used_regions().map(|r| r.len()).sum()
    }

    /// テーブルの整合性を検査する.
    ///
    /// 以下の全てを満たしていることを確認する:
    ///
    /// - 番兵が正しい位置に正しい値で配置されている
    /// - 番兵に挟まれた範囲が、隙間なく領域群に分割されている
    /// - 各領域の先頭と末尾のサイズ情報が一致しており、それ以外のセクタは未使用である
    /// - 空き領域同士が隣接していない
    /// - 各領域は、その状態に対応するリストに、ちょうど一度だけ出現する
    ///
    /// 満たしていない場合には、種類が`ErrorKind::TableCorrupted`のエラーが返される.
    pub fn check_consistency(&self) -> Result<()> {
        let capacity = self.capacity();
        track_assert!(
            MIN_CAPACITY <= capacity && capacity <= MAX_CAPACITY,
            ErrorKind::TableCorrupted,
            "capacity={}",
            capacity
        );

        // 番兵
        for &(sentinel, is_begin) in &[
            (USED_BEGIN, true),
            (FREE_BEGIN, true),
            (self.free_end(), false),
            (self.used_end(), false),
        ] {
            let r = list::record(&self.records, sentinel);
            let terminal = if is_begin { r.prev } else { r.next };
            track_assert!(
                terminal.is_none() && r.size == SectorSize::Used(1),
                ErrorKind::TableCorrupted,
                "Broken sentinel: sector={}, record={:?}",
                sentinel,
                r
            );
        }

        // アドレス順の領域群
        let free_end = self.free_end();
        let mut heads = HashMap::new();
        let mut position = FIRST_REGION;
        let mut prev_is_free = false;
        while position < free_end {
            let head = list::record(&self.records, position);
            let len = head.size.len();
            track_assert!(
                len != 0,
                ErrorKind::TableCorrupted,
                "Unmarked region head: sector={}",
                position
            );
            track_assert!(
                u64::from(position.as_u32()) + u64::from(len) <= u64::from(free_end.as_u32()),
                ErrorKind::TableCorrupted,
                "Too long region: sector={}, len={}",
                position,
                len
            );
            track_assert!(
                !(prev_is_free && head.size.is_free()),
                ErrorKind::TableCorrupted,
                "Adjacent free regions: sector={}",
                position
            );

            let tail = position + (len - 1);
            if tail != position {
                track_assert_eq!(
                    *list::record(&self.records, tail),
                    SectorRecord::new(None, None, head.size),
                    ErrorKind::TableCorrupted,
                    "Broken tail marker: sector={}",
                    position
                );
            }
            for i in (position.as_u32() + 1)..tail.as_u32() {
                track_assert_eq!(
                    self.records[i as usize],
                    SectorRecord::UNMARKED,
                    ErrorKind::TableCorrupted,
                    "Stale marker: region={}, sector={}",
                    position,
                    i
                );
            }

            prev_is_free = head.size.is_free();
            heads.insert(position, head.size);
            position = position + len;
        }

        // リンクリスト
        let used = track!(self.check_list(USED_BEGIN, self.used_end(), false, &heads))?;
        let free = track!(self.check_list(FREE_BEGIN, free_end, true, &heads))?;
        track_assert_eq!(used + free, heads.len(), ErrorKind::TableCorrupted);
        Ok(())
    }

    fn check_list(
        &self,
        begin: SectorNo,
        end: SectorNo,
        is_free_list: bool,
        heads: &HashMap<SectorNo, SectorSize>,
    ) -> Result<usize> {
        let mut count = 0;
        let mut prev = begin;
        let mut cursor = list::record(&self.records, begin).next;
        loop {
            let current = track_assert_some!(
                cursor,
                ErrorKind::TableCorrupted,
                "Broken link: sector={}",
                prev
            );
            track_assert!(
                current.as_u32() < self.capacity(),
                ErrorKind::TableCorrupted,
                "Out of range link: sector={}, next={}",
                prev,
                current
            );
            track_assert_eq!(
                list::record(&self.records, current).prev,
                Some(prev),
                ErrorKind::TableCorrupted,
                "Broken backward link: sector={}",
                current
            );
            if current == end {
                return Ok(count);
            }

            let size = track_assert_some!(
                heads.get(&current),
                ErrorKind::TableCorrupted,
                "Not a region head: sector={}",
                current
            );
            track_assert_eq!(
                size.is_free(),
                is_free_list,
                ErrorKind::TableCorrupted,
                "Region in the wrong list: sector={}",
                current
            );
            count += 1;
            track_assert!(count <= heads.len(), ErrorKind::TableCorrupted, "Cyclic list");

            prev = current;
            cursor = list::record(&self.records, current).next;
        }
    }

    // 解放対象の`sector`を検査し、不正であればメトリクスとログに記録する.
    fn check_handle(&self, sector: SectorNo) -> Result<u32> {
        self.live_region_len(sector).map_err(|e| {
            self.metrics.invalid_handle_failures.increment();
            error!(self.logger, "Invalid sector number is released: {}", e; "sector" => sector.as_u32());
            e
        })
    }

    // `sector`が、使用済リストにリンクされている領域の先頭であれば、その長さを返す.
    fn live_region_len(&self, sector: SectorNo) -> Result<u32> {
        track_assert!(
            FIRST_REGION <= sector && sector < self.free_end(),
            ErrorKind::InvalidHandle,
            "Out of range: sector={}, capacity={}",
            sector,
            self.capacity()
        );

        let r = list::record(&self.records, sector);
        let len = if let SectorSize::Used(len) = r.size {
            len
        } else {
            track_panic!(ErrorKind::InvalidHandle, "Not a used region: {:?}", r);
        };

        // 使用済領域の末尾や、過去に先頭だったセクタは、リストから辿れない
        let linked = match (r.prev, r.next) {
            (Some(prev), Some(next)) => {
                prev.as_u32() < self.capacity()
                    && next.as_u32() < self.capacity()
                    && list::record(&self.records, prev).next == Some(sector)
                    && list::record(&self.records, next).prev == Some(sector)
            }
            _ => false,
        };
        track_assert!(
            linked,
            ErrorKind::InvalidHandle,
            "Not linked to the used list: sector={}",
            sector
        );
        Ok(len)
    }

    fn used_end(&self) -> SectorNo {
        SectorNo(self.capacity() - 1)
    }

    fn free_end(&self) -> SectorNo {
        SectorNo(self.capacity() - 2)
    }
}

/// 領域群をアドレス順に走査するイテレータ.
#[derive(Debug)]
pub struct Regions<'a> {
    records: &'a [SectorRecord],
    position: SectorNo,
    end: SectorNo,
}
impl<'a> Iterator for Regions<'a> {
    type Item = Region;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.end {
            return None;
        }
        let size = list::record(self.records, self.position).size;
        if size.is_empty() {
            // 壊れたテーブル
            self.position = self.end;
            return None;
        }
        let region = Region {
            start: self.position,
            size,
        };
        self.position = region.end();
        Some(region)
    }
}

/// 使用済リストまたは空きリストに含まれる領域群を、リスト内の順番で走査するイテレータ.
#[derive(Debug)]
pub struct ListRegions<'a> {
    records: &'a [SectorRecord],
    cursor: Option<SectorNo>,
}
impl<'a> ListRegions<'a> {
    fn new(records: &'a [SectorRecord], begin: SectorNo) -> Self {
        ListRegions {
            records,
            cursor: list::record(records, begin).next,
        }
    }
}
impl<'a> Iterator for ListRegions<'a> {
    type Item = Region;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.cursor?;
        let r = list::record(self.records, current);
        if r.next.is_none() {
            // 終了番兵
            self.cursor = None;
            return None;
        }
        self.cursor = r.next;
        Some(Region {
            start: current,
            size: r.size,
        })
    }
}

#[cfg(test)]
mod tests {
    use trackable::result::TestResult;

    use super::*;

    fn n(v: u16) -> SectorNo {
        SectorNo::from(v)
    }

    fn free_list(table: &SectorTable) -> Vec<(u32, u32)> {
        table
            .free_regions()
            .map(|r| (r.start.as_u32(), r.len()))
            .collect()
    }

    fn used_list(table: &SectorTable) -> Vec<(u32, u32)> {
        table
            .used_regions()
            .map(|r| (r.start.as_u32(), r.len()))
            .collect()
    }

    #[test]
    fn initial_layout() -> TestResult {
        let table = track!(SectorTable::new(8))?;
        let r = table.records();
        assert_eq!(r[0], SectorRecord::new(None, Some(n(7)), SectorSize::Used(1)));
        assert_eq!(r[1], SectorRecord::new(None, Some(n(2)), SectorSize::Used(1)));
        assert_eq!(
            r[2],
            SectorRecord::new(Some(n(1)), Some(n(6)), SectorSize::Free(4))
        );
        assert_eq!(r[3], SectorRecord::UNMARKED);
        assert_eq!(r[4], SectorRecord::UNMARKED);
        assert_eq!(r[5], SectorRecord::new(None, None, SectorSize::Free(4)));
        assert_eq!(r[6], SectorRecord::new(Some(n(2)), None, SectorSize::Used(1)));
        assert_eq!(r[7], SectorRecord::new(Some(n(0)), None, SectorSize::Used(1)));

        assert_eq!(free_list(&table), vec![(2, 4)]);
        assert!(used_list(&table).is_empty());
        assert_eq!(table.free_sectors(), 4);
        assert_eq!(table.metrics().free_list_len(), 1);
        track!(table.check_consistency())?;
        Ok(())
    }

    #[test]
    fn allocate_and_release_restores_initial_state() -> TestResult {
        let mut table = track!(SectorTable::new(8))?;
        let initial = table.records().to_vec();

        let c = track!(table.allocate(2))?;
        assert_eq!(c, n(2));
        assert_eq!(used_list(&table), vec![(2, 2)]);
        assert_eq!(free_list(&table), vec![(4, 2)]);
        track!(table.check_consistency())?;

        track!(table.release(c))?;
        assert_eq!(table.records(), &initial[..]);
        track!(table.check_consistency())?;
        Ok(())
    }

    #[test]
    fn release_between_used_regions_does_not_merge() -> TestResult {
        let mut table = track!(SectorTable::new(16))?;
        let a = track!(table.allocate(2))?;
        let b = track!(table.allocate(3))?;
        let c = track!(table.allocate(4))?;
        assert_eq!((a, b, c), (n(2), n(4), n(7)));
        assert_eq!(free_list(&table), vec![(11, 3)]);

        track!(table.release(b))?;
        assert_eq!(free_list(&table), vec![(4, 3), (11, 3)]);
        assert_eq!(used_list(&table), vec![(7, 4), (2, 2)]);
        assert_eq!(table.metrics().coalesced_regions(), 0);
        track!(table.check_consistency())?;
        Ok(())
    }

    #[test]
    fn adjacent_releases_are_coalesced() -> TestResult {
        let mut table = track!(SectorTable::new(16))?;
        let initial = table.records().to_vec();

        let a = track!(table.allocate(2))?;
        let b = track!(table.allocate(3))?;

        track!(table.release(a))?;
        assert_eq!(free_list(&table), vec![(2, 2), (7, 7)]);
        track!(table.check_consistency())?;

        // 前後の両方と併合される
        track!(table.release(b))?;
        assert_eq!(free_list(&table), vec![(2, 12)]);
        assert_eq!(table.metrics().coalesced_regions(), 2);
        assert_eq!(table.records(), &initial[..]);
        track!(table.check_consistency())?;
        Ok(())
    }

    #[test]
    fn merge_with_preceding_region() -> TestResult {
        let mut table = track!(SectorTable::new(16))?;
        let a = track!(table.allocate(2))?;
        let b = track!(table.allocate(3))?;
        let c = track!(table.allocate(4))?;

        track!(table.release(a))?;
        track!(table.release(b))?;
        assert_eq!(free_list(&table), vec![(2, 5), (11, 3)]);
        assert_eq!(table.metrics().coalesced_regions(), 1);
        track!(table.check_consistency())?;

        track!(table.release(c))?;
        assert_eq!(free_list(&table), vec![(2, 12)]);
        assert_eq!(table.metrics().free_list_len(), 1);
        track!(table.check_consistency())?;
        Ok(())
    }

    #[test]
    fn merge_with_following_region() -> TestResult {
        let mut table = track!(SectorTable::new(16))?;
        let a = track!(table.allocate(2))?;
        let b = track!(table.allocate(3))?;
        let c = track!(table.allocate(4))?;

        track!(table.release(a))?;
        assert_eq!(free_list(&table), vec![(2, 2), (11, 3)]);

        // 後ろの空き領域のリスト内の位置を引き継ぐ
        track!(table.release(c))?;
        assert_eq!(free_list(&table), vec![(2, 2), (7, 7)]);
        assert_eq!(used_list(&table), vec![(4, 3)]);
        track!(table.check_consistency())?;

        track!(table.release(b))?;
        assert_eq!(free_list(&table), vec![(2, 12)]);
        track!(table.check_consistency())?;
        Ok(())
    }

    #[test]
    fn merge_when_neighbors_are_adjacent_in_free_list() -> TestResult {
        let mut table = track!(SectorTable::new(16))?;
        let a = track!(table.allocate(2))?;
        let b = track!(table.allocate(3))?;
        let c = track!(table.allocate(4))?;
        let d = track!(table.allocate(3))?;
        assert_eq!(table.free_sectors(), 0);

        // 空きリスト内で [c, a] の順に並ぶ
        track!(table.release(a))?;
        track!(table.release(c))?;
        assert_eq!(free_list(&table), vec![(7, 4), (2, 2)]);

        // `b`の後ろの領域`c`は、空きリスト上で手前の領域`a`の直前にある
        track!(table.release(b))?;
        assert_eq!(free_list(&table), vec![(2, 9)]);
        assert_eq!(used_list(&table), vec![(d.as_u32(), 3)]);
        track!(table.check_consistency())?;

        track!(table.release(d))?;
        assert_eq!(free_list(&table), vec![(2, 12)]);
        track!(table.check_consistency())?;
        Ok(())
    }

    #[test]
    fn exact_fit_consumes_whole_region() -> TestResult {
        let mut table = track!(SectorTable::new(8))?;
        let initial = table.records().to_vec();

        let c = track!(table.allocate(4))?;
        assert_eq!(c, n(2));
        assert!(free_list(&table).is_empty());
        assert_eq!(table.metrics().free_list_len(), 0);
        assert!(table.regions().all(|r| r.len() > 0));
        track!(table.check_consistency())?;

        assert_eq!(
            table.allocate(1).err().map(|e| *e.kind()),
            Some(ErrorKind::OutOfMemory)
        );

        track!(table.release(c))?;
        assert_eq!(table.records(), &initial[..]);
        Ok(())
    }

    #[test]
    fn exact_fit_does_not_leave_stale_free_tail() -> TestResult {
        let mut table = track!(SectorTable::new(12))?;
        let a = track!(table.allocate(2))?;
        let b = track!(table.allocate(3))?;
        track!(table.release(a))?;
        assert_eq!(free_list(&table), vec![(2, 2), (7, 3)]);

        // `a`の跡地をちょうど使い切る
        let a = track!(table.allocate(2))?;
        assert_eq!(a, n(2));
        assert_eq!(table.records()[3].size, SectorSize::Used(2));

        // `b`の手前は使用済領域なので、併合されない
        track!(table.release(b))?;
        assert_eq!(free_list(&table), vec![(4, 6)]);
        assert_eq!(used_list(&table), vec![(2, 2)]);
        track!(table.check_consistency())?;
        Ok(())
    }

    #[test]
    fn first_fit_follows_free_list_order() -> TestResult {
        let mut table = track!(SectorTable::new(32))?;
        let a = track!(table.allocate(2))?;
        let _b = track!(table.allocate(2))?;
        let c = track!(table.allocate(5))?;
        let _d = track!(table.allocate(2))?;
        track!(table.release(c))?;
        track!(table.release(a))?;
        assert_eq!(free_list(&table), vec![(2, 2), (6, 5), (13, 17)]);

        assert_eq!(track!(table.allocate(3))?, n(6));
        assert_eq!(free_list(&table), vec![(2, 2), (9, 2), (13, 17)]);
        assert_eq!(track!(table.allocate(2))?, n(2));
        assert_eq!(track!(table.allocate(2))?, n(9));
        assert_eq!(free_list(&table), vec![(13, 17)]);
        track!(table.check_consistency())?;
        Ok(())
    }

    #[test]
    fn out_of_memory_leaves_table_unchanged() -> TestResult {
        let mut table = track!(SectorTable::new(16))?;
        let _ = track!(table.allocate(5))?;
        let before = table.records().to_vec();

        let e = table.allocate(8).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::OutOfMemory));
        assert_eq!(table.records(), &before[..]);
        assert_eq!(table.metrics().nospace_failures(), 1);

        assert_eq!(track!(table.allocate(7))?, n(7));
        Ok(())
    }

    #[test]
    fn zero_sized_allocation_is_rejected() -> TestResult {
        let mut table = track!(SectorTable::new(8))?;
        assert_eq!(
            table.allocate(0).err().map(|e| *e.kind()),
            Some(ErrorKind::InvalidInput)
        );
        Ok(())
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic)]
    fn release_unallocated_sector() {
        let mut table = SectorTable::new(16).expect("Never fails");
        let a = table.allocate(4).expect("Never fails");
        assert_eq!(a, n(2));

        // 領域の途中
        let e = table.release(n(3)).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidHandle));
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic)]
    fn release_twice() {
        let mut table = SectorTable::new(16).expect("Never fails");
        let a = table.allocate(4).expect("Never fails");
        table.release(a).expect("Never fails");

        let before = table.records().to_vec();
        let e = table.release(a).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidHandle));
        assert_eq!(table.records(), &before[..]);
        assert_eq!(table.metrics().invalid_handle_failures(), 1);
    }

    #[test]
    #[cfg_attr(debug_assertions, should_panic)]
    fn release_sentinel() {
        let mut table = SectorTable::new(16).expect("Never fails");
        let e = table.release(n(14)).err();
        assert_eq!(e.map(|e| *e.kind()), Some(ErrorKind::InvalidHandle));
    }

    #[test]
    fn invalid_handle_leaves_table_unchanged() -> TestResult {
        let mut table = track!(SectorTable::new(16))?;
        let a = track!(table.allocate(4))?;
        let b = track!(table.allocate(2))?;
        track!(table.release(a))?;

        let before = table.records().to_vec();
        for &sector in &[a, a + 1, b + 1, n(1), n(14), n(100)] {
            assert_eq!(
                table.check_handle(sector).err().map(|e| *e.kind()),
                Some(ErrorKind::InvalidHandle)
            );
        }
        assert_eq!(table.records(), &before[..]);
        assert_eq!(table.metrics().invalid_handle_failures(), 6);

        assert_eq!(table.check_handle(b).ok(), Some(2));
        assert_eq!(table.metrics().invalid_handle_failures(), 6);
        Ok(())
    }

    #[test]
    fn release_tail_of_used_region_is_detected() -> TestResult {
        let mut table = track!(SectorTable::new(16))?;
        let a = track!(table.allocate(3))?;
        assert!(table.live_region_len(a).is_ok());

        let tail = a + 2;
        assert_eq!(table.records()[tail.as_usize()].size, SectorSize::Used(3));
        assert_eq!(
            table.live_region_len(tail).err().map(|e| *e.kind()),
            Some(ErrorKind::InvalidHandle)
        );
        assert_eq!(
            table.live_region_len(n(100)).err().map(|e| *e.kind()),
            Some(ErrorKind::InvalidHandle)
        );
        Ok(())
    }

    #[test]
    fn accounting_holds_for_random_operations() -> TestResult {
        let capacity = 256;
        let mut table = track!(SectorTable::new(capacity))?;
        let mut live = Vec::new();
        let mut seed = 0x2545_F491_4F6C_DD1D_u64;
        for _ in 0..2000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;

            if seed % 3 != 0 || live.is_empty() {
                let size = (seed >> 8) as u32 % 16 + 1;
                match table.allocate(size) {
                    Ok(sector) => live.push((sector, size)),
                    Err(e) => {
                        assert_eq!(*e.kind(), ErrorKind::OutOfMemory);
                        assert!(table.free_regions().all(|r| r.len() < size));
                    }
                }
            } else {
                let i = (seed >> 16) as usize % live.len();
                let (sector, _) = live.swap_remove(i);
                track!(table.release(sector))?;
            }

            track!(table.check_consistency())?;
            let used = live.iter().map(|&(_, size)| size).sum::<u32>();
            assert_eq!(table.used_sectors(), used);
            assert_eq!(table.used_sectors() + table.free_sectors() + 4, capacity);
            assert_eq!(table.metrics().usage_sectors(), u64::from(used));
            assert_eq!(table.metrics().used_list_len(), live.len());
            assert_eq!(
                table.metrics().free_list_len(),
                table.free_regions().count()
            );
        }

        for (sector, _) in live {
            track!(table.release(sector))?;
        }
        assert_eq!(free_list(&table), vec![(2, capacity - 4)]);
        Ok(())
    }

    #[test]
    fn regions_are_listed_in_address_order() -> TestResult {
        let mut table = track!(SectorTable::new(16))?;
        let a = track!(table.allocate(2))?;
        let _ = track!(table.allocate(3))?;
        track!(table.release(a))?;

        let regions = table.regions().collect::<Vec<_>>();
        assert_eq!(
            regions,
            vec![
                Region {
                    start: n(2),
                    size: SectorSize::Free(2)
                },
                Region {
                    start: n(4),
                    size: SectorSize::Used(3)
                },
                Region {
                    start: n(7),
                    size: SectorSize::Free(7)
                },
            ]
        );
        assert_eq!(regions[1].end(), n(7));
        Ok(())
    }

    #[test]
    fn corruption_is_detected() -> TestResult {
        let mut table = track!(SectorTable::new(16))?;
        let a = track!(table.allocate(2))?;
        let _ = track!(table.allocate(3))?;
        track!(table.release(a))?;
        track!(table.check_consistency())?;

        // 末尾のサイズ情報の不一致
        let mut broken = table.records.clone();
        broken[3].size = SectorSize::Free(3);
        assert_corrupted(&table, broken);

        // 空き領域同士の隣接
        let mut broken = table.records.clone();
        broken[4].size = SectorSize::Free(3);
        broken[6].size = SectorSize::Free(3);
        assert_corrupted(&table, broken);

        // リストの逆方向リンクの不整合
        let mut broken = table.records.clone();
        broken[14].prev = Some(n(0));
        assert_corrupted(&table, broken);

        // 番兵の破損
        let mut broken = table.records.clone();
        broken[1].size = SectorSize::Free(1);
        assert_corrupted(&table, broken);
        Ok(())
    }

    fn assert_corrupted(table: &SectorTable, records: Vec<SectorRecord>) {
        let broken = SectorTable::from_parts(
            records,
            table.instance_uuid,
            table.logger.clone(),
            table.metrics.clone(),
        );
        assert_eq!(
            broken.check_consistency().err().map(|e| *e.kind()),
            Some(ErrorKind::TableCorrupted)
        );
    }
}
