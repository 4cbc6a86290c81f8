//! [Prometheus][prometheus]用のメトリクス.
//!
//! [prometheus]: https://prometheus.io/
use prometrics::metrics::{Counter, MetricBuilder};

/// セクタテーブルのメトリクス.
#[derive(Debug, Clone)]
pub struct SectorTableMetrics {
    pub(crate) inserted_free_regions: Counter,
    pub(crate) removed_free_regions: Counter,
    pub(crate) allocated_regions_at_starting: Counter,
    pub(crate) allocated_regions_at_running: Counter,
    pub(crate) allocated_sectors_at_starting: Counter,
    pub(crate) allocated_sectors_at_running: Counter,
    pub(crate) released_regions: Counter,
    pub(crate) released_sectors: Counter,
    pub(crate) coalesced_regions: Counter,
    pub(crate) nospace_failures: Counter,
    pub(crate) invalid_handle_failures: Counter,

    /// テーブルの容量(番兵を含むセクタ数).
    pub capacity_sectors: u64,
}
impl SectorTableMetrics {
    /// 空きリストに挿入された領域の数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// sectorheap_sector_table_inserted_free_regions_total <COUNTER>
    /// ```
    pub fn inserted_free_regions(&self) -> u64 {
        self.inserted_free_regions.value() as u64
    }

    /// 空きリストから削除された領域の数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// sectorheap_sector_table_removed_free_regions_total <COUNTER>
    /// ```
    pub fn removed_free_regions(&self) -> u64 {
        self.removed_free_regions.value() as u64
    }

    /// 空きリストの長さ.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// sectorheap_sector_table_inserted_free_regions_total - sectorheap_sector_table_removed_free_regions_total
    /// ```
    pub fn free_list_len(&self) -> usize {
        // NOTE: 以下の順番で値を取得しないとアンダーフローする可能性がある
        let dec = self.removed_free_regions();
        let inc = self.inserted_free_regions();
        (inc - dec) as usize
    }

    /// 領域の割当回数.
    ///
    /// スナップショットからの復元時に、既に割当済みだった領域は`phase="starting"`として数えられる.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// sectorheap_sector_table_allocated_regions_total { phase="starting|running" } <COUNTER>
    /// ```
    pub fn allocated_regions(&self) -> u64 {
        self.allocated_regions_at_starting.value() as u64
            + self.allocated_regions_at_running.value() as u64
    }

    /// これまでに割り当てたセクタ数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// sectorheap_sector_table_allocated_sectors_total { phase="starting|running" } <COUNTER>
    /// ```
    pub fn allocated_sectors(&self) -> u64 {
        self.allocated_sectors_at_starting.value() as u64
            + self.allocated_sectors_at_running.value() as u64
    }

    /// 領域の解放回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// sectorheap_sector_table_released_regions_total <COUNTER>
    /// ```
    pub fn released_regions(&self) -> u64 {
        self.released_regions.value() as u64
    }

    /// これまでに解放されたセクタ数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// sectorheap_sector_table_released_sectors_total <COUNTER>
    /// ```
    pub fn released_sectors(&self) -> u64 {
        self.released_sectors.value() as u64
    }

    /// 解放時に、隣接する空き領域と併合された回数.
    ///
    /// 前後の両方と併合された場合には`2`が加算される.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// sectorheap_sector_table_coalesced_regions_total <COUNTER>
    /// ```
    pub fn coalesced_regions(&self) -> u64 {
        self.coalesced_regions.value() as u64
    }

    /// 空き領域不足による割当失敗回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// sectorheap_sector_table_nospace_failures_total <COUNTER>
    /// ```
    pub fn nospace_failures(&self) -> u64 {
        self.nospace_failures.value() as u64
    }

    /// 不正なセクタ番号による解放失敗回数.
    ///
    /// # Prometheus
    ///
    /// ```prometheus
    /// sectorheap_sector_table_invalid_handle_failures_total <COUNTER>
    /// ```
    pub fn invalid_handle_failures(&self) -> u64 {
        self.invalid_handle_failures.value() as u64
    }

    /// 使用済リストの長さ.
    pub fn used_list_len(&self) -> usize {
        let dec = self.released_regions();
        let inc = self.allocated_regions();
        (inc - dec) as usize
    }

    /// 割当済みのセクタ数.
    pub fn usage_sectors(&self) -> u64 {
        let dec = self.released_sectors();
        let inc = self.allocated_sectors();
        inc - dec
    }

    pub(crate) fn new(builder: &MetricBuilder, capacity_sectors: u64) -> Self {
        let mut builder = builder.clone();
        builder.namespace("sectorheap").subsystem("sector_table");
        SectorTableMetrics {
            inserted_free_regions: builder
                .counter("inserted_free_regions_total")
                .help("Number of inserted regions into free list")
                .finish()
                .expect("Never fails"),
            removed_free_regions: builder
                .counter("removed_free_regions_total")
                .help("Number of removed regions from free list")
                .finish()
                .expect("Never fails"),
            allocated_regions_at_starting: builder
                .counter("allocated_regions_total")
                .help("Number of allocated regions")
                .label("phase", "starting")
                .finish()
                .expect("Never fails"),
            allocated_regions_at_running: builder
                .counter("allocated_regions_total")
                .help("Number of allocated regions")
                .label("phase", "running")
                .finish()
                .expect("Never fails"),
            allocated_sectors_at_starting: builder
                .counter("allocated_sectors_total")
                .help("Number of allocated sectors")
                .label("phase", "starting")
                .finish()
                .expect("Never fails"),
            allocated_sectors_at_running: builder
                .counter("allocated_sectors_total")
                .help("Number of allocated sectors")
                .label("phase", "running")
                .finish()
                .expect("Never fails"),
            released_regions: builder
                .counter("released_regions_total")
                .help("Number of released regions")
                .finish()
                .expect("Never fails"),
            released_sectors: builder
                .counter("released_sectors_total")
                .help("Number of released sectors")
                .finish()
                .expect("Never fails"),
            coalesced_regions: builder
                .counter("coalesced_regions_total")
                .help("Number of free regions merged into a released region")
                .finish()
                .expect("Never fails"),
            nospace_failures: builder
                .counter("nospace_failures_total")
                .help("Number of allocation failures caused by no available space")
                .finish()
                .expect("Never fails"),
            invalid_handle_failures: builder
                .counter("invalid_handle_failures_total")
                .help("Number of release failures caused by invalid sector numbers")
                .finish()
                .expect("Never fails"),
            capacity_sectors,
        }
    }

    pub(crate) fn count_allocation(&self, len: u32) {
        self.allocated_regions_at_running.increment();
        self.allocated_sectors_at_running.add_u64(u64::from(len));
    }

    pub(crate) fn count_releasion(&self, len: u32) {
        self.released_regions.increment();
        self.released_sectors.add_u64(u64::from(len));
    }
}
