use prometrics::metrics::MetricBuilder;
use slog::{Discard, Logger};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use uuid::Uuid;

use super::{snapshot, SectorTable, SnapshotHeader, MAX_CAPACITY, MIN_CAPACITY};
use crate::metrics::SectorTableMetrics;
use crate::{ErrorKind, Result};

/// `SectorTable`のビルダ.
#[derive(Debug, Clone)]
pub struct SectorTableBuilder {
    capacity: u32,
    instance_uuid: Option<Uuid>,
    logger: Logger,
    metrics: MetricBuilder,
}
impl SectorTableBuilder {
    /// 指定された容量(番兵を含むセクタ数)を持つテーブル用の`SectorTableBuilder`インスタンスを生成する.
    ///
    /// 容量の妥当性は、テーブルの構築時(e.g., `create()`呼び出し時)に検査される.
    pub fn new(capacity: u32) -> Self {
        SectorTableBuilder {
            capacity,
            instance_uuid: None,
            logger: Logger::root(Discard, o!()),
            metrics: MetricBuilder::new(),
        }
    }

    /// テーブルインスタンスを識別するためのUUIDを設定する.
    ///
    /// テーブルの生成時と復元時で、指定した値の使われ方が異なる:
    ///
    /// - 生成時:
    ///   - ここで指定した値が識別子として採用され、スナップショットに書き込まれる
    ///   - 本メソッドが呼ばれていない場合は、ランダムなUUIDが割り当てられる
    /// - 復元時:
    ///   - ここで指定した値と、スナップショットの識別子が比較され、もし異なっている場合には復元に失敗する
    ///   - 本メソッドが呼ばれていない場合は、特にチェックは行われない
    pub fn instance_uuid(&mut self, uuid: Uuid) -> &mut Self {
        self.instance_uuid = Some(uuid);
        self
    }

    /// テーブル用の logger を登録する.
    ///
    /// デフォルトでは、ログは全て破棄される.
    pub fn logger(&mut self, logger: Logger) -> &mut Self {
        self.logger = logger;
        self
    }

    /// メトリクス用の共通設定を登録する.
    ///
    /// デフォルト値は`MetricBuilder::new()`.
    pub fn metrics(&mut self, metrics: MetricBuilder) -> &mut Self {
        self.metrics = metrics;
        self
    }

    /// 新規にテーブルを生成する.
    ///
    /// # Errors
    ///
    /// 容量が`MIN_CAPACITY`未満、あるいは`MAX_CAPACITY`を超えている場合には、
    /// 種類が`ErrorKind::InvalidInput`のエラーが返される.
    pub fn create(&self) -> Result<SectorTable> {
        track!(self.check_capacity())?;

        let records = SectorTable::initial_records(self.capacity);
        let metrics = SectorTableMetrics::new(&self.metrics, u64::from(self.capacity));
        metrics.inserted_free_regions.increment();

        let instance_uuid = self.instance_uuid.unwrap_or_else(Uuid::new_v4);
        info!(self.logger, "Sector table is created";
              "capacity" => self.capacity, "uuid" => instance_uuid.to_string());
        Ok(SectorTable::from_parts(
            records,
            instance_uuid,
            self.logger.clone(),
            metrics,
        ))
    }

    /// スナップショットからテーブルを復元する.
    ///
    /// スナップショットの容量は、ビルダに指定された容量と一致している必要がある.
    ///
    /// # Errors
    ///
    /// - スナップショットの容量やUUID、バージョンが合わない場合には、種類が`ErrorKind::InvalidInput`のエラーが返される
    /// - チェックサムの検証やテーブルの整合性検査に失敗した場合には、種類が`ErrorKind::TableCorrupted`のエラーが返される
    pub fn restore<R: Read>(&self, reader: R) -> Result<SectorTable> {
        let result = self.restore_impl(reader);
        if let Err(ref e) = result {
            warn!(self.logger, "Cannot restore sector table: {}", e; "capacity" => self.capacity);
        }
        result
    }

    /// `path`に保存されたスナップショットからテーブルを復元する.
    pub fn restore_from_file<P: AsRef<Path>>(&self, path: P) -> Result<SectorTable> {
        let file = track_io!(File::open(path))?;
        track!(self.restore(BufReader::new(file)))
    }

    fn restore_impl<R: Read>(&self, mut reader: R) -> Result<SectorTable> {
        track!(self.check_capacity())?;

        let header = track!(SnapshotHeader::read_from(&mut reader))?;
        track_assert_eq!(
            header.capacity,
            self.capacity,
            ErrorKind::InvalidInput,
            "Capacity mismatched"
        );
        if let Some(expected_uuid) = self.instance_uuid {
            track_assert_eq!(header.instance_uuid, expected_uuid, ErrorKind::InvalidInput);
        }

        let records = track!(snapshot::read_records(&mut reader, header.capacity))?;
        let metrics = SectorTableMetrics::new(&self.metrics, u64::from(self.capacity));
        let table = SectorTable::from_parts(
            records,
            header.instance_uuid,
            self.logger.clone(),
            metrics,
        );
        track!(table.check_consistency())?;

        // 復元時点での割当状況をメトリクスに反映する
        let metrics = table.metrics();
        metrics
            .inserted_free_regions
            .add_u64(table.free_regions().count() as u64);
        metrics
            .allocated_regions_at_starting
            .add_u64(table.used_regions().count() as u64);
        metrics
            .allocated_sectors_at_starting
            .add_u64(u64::from(table.used_sectors()));

        info!(self.logger, "Sector table is restored";
              "capacity" => self.capacity, "uuid" => header.instance_uuid.to_string(),
              "used_sectors" => table.used_sectors());
        Ok(table)
    }

    fn check_capacity(&self) -> Result<()> {
        track_assert!(
            self.capacity >= MIN_CAPACITY,
            ErrorKind::InvalidInput,
            "Too small capacity: {} (min={})",
            self.capacity,
            MIN_CAPACITY
        );
        track_assert!(
            self.capacity <= MAX_CAPACITY,
            ErrorKind::InvalidInput,
            "Too large capacity: {} (max={})",
            self.capacity,
            MAX_CAPACITY
        );
        Ok(())
    }
}
