//! セクタテーブルのスナップショット.
//!
//! # フォーマット
//!
//! ```text
//! header:   SnapshotHeader
//! records:  capacity × (prev: i32, next: i32, size: i32)
//! checksum: adler32(records): u32
//! ```
//!
//! 数値は全てビッグエンディアン.
//! リンク情報の`-1`は「隣接要素無し」、サイズは正なら使用済、負なら空き、`0`なら未使用のセクタを表す.
use adler32::RollingAdler32;
use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use std::cmp;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use super::sector::{link_from_i32, link_to_i32};
use super::{SectorRecord, SectorSize, SectorTable, SectorTableBuilder, SnapshotHeader};
use super::{MAJOR_VERSION, MINOR_VERSION};
use crate::{ErrorKind, Result};

impl SectorTable {
    /// テーブルのスナップショットを`writer`に書き込む.
    ///
    /// レコード列は、メモリ上の配列がそのままの順番で書き出される.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        let header = SnapshotHeader {
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
            instance_uuid: self.instance_uuid(),
            capacity: self.capacity(),
        };
        track!(header.write_to(&mut writer))?;
        track!(write_records(self.records(), writer))?;
        Ok(())
    }

    /// テーブルのスナップショットをバイト列として返す.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.write_to(&mut buf).expect("Never fails");
        buf
    }

    /// テーブルのスナップショットを`path`に保存する.
    ///
    /// 既にファイルが存在する場合には上書きされる.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = track_io!(File::create(path))?;
        let mut writer = BufWriter::new(file);
        track!(self.write_to(&mut writer))?;
        track_io!(writer.flush())?;
        track_io!(writer.get_ref().sync_all())?;
        Ok(())
    }

    /// バイト列からテーブルを復元する.
    ///
    /// テーブルの容量はスナップショットのヘッダに記載のものが使われる.
    /// 容量やUUIDの検証、ロガーやメトリクスの設定を行いたい場合には
    /// [`SectorTableBuilder::restore`](./struct.SectorTableBuilder.html#method.restore)を使用すること.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header = track!(SnapshotHeader::read_from(bytes))?;
        track!(SectorTableBuilder::new(header.capacity).restore(bytes))
    }
}

/// レコード列とそのチェックサムを`writer`に書き込む.
pub(crate) fn write_records<W: Write>(records: &[SectorRecord], mut writer: W) -> Result<()> {
    let mut buf = vec![0; records.len() * SectorRecord::SIZE];
    for (r, chunk) in records.iter().zip(buf.chunks_mut(SectorRecord::SIZE)) {
        encode_record(r, chunk);
    }
    let checksum = RollingAdler32::from_buffer(&buf).hash();

    track_io!(writer.write_all(&buf))?;
    track_io!(writer.write_u32::<BigEndian>(checksum))?;
    Ok(())
}

/// 復元時に事前確保するレコード数の上限.
///
/// ヘッダの容量はチェックサムの対象外.
const MAX_PREALLOCATED_RECORDS: usize = 4096;

/// `capacity`個のレコードとチェックサムを`reader`から読み込む.
pub(crate) fn read_records<R: Read>(mut reader: R, capacity: u32) -> Result<Vec<SectorRecord>> {
    let mut adler32 = RollingAdler32::new();
    let mut records = Vec::with_capacity(cmp::min(
        capacity as usize,
        MAX_PREALLOCATED_RECORDS,
    ));
    let mut buf = [0; SectorRecord::SIZE];
    for i in 0..capacity {
        track!(track_io!(reader.read_exact(&mut buf)), "sector={}", i)?;
        adler32.update_buffer(&buf);
        let r = track!(decode_record(&buf), "sector={}", i)?;
        records.push(r);
    }

    let checksum = track_io!(reader.read_u32::<BigEndian>())?;
    track_assert_eq!(
        adler32.hash(),
        checksum,
        ErrorKind::TableCorrupted,
        "Checksum mismatched"
    );
    Ok(records)
}

fn encode_record(r: &SectorRecord, buf: &mut [u8]) {
    BigEndian::write_i32(&mut buf[0..4], link_to_i32(r.prev));
    BigEndian::write_i32(&mut buf[4..8], link_to_i32(r.next));
    BigEndian::write_i32(&mut buf[8..12], r.size.to_i32());
}

fn decode_record(buf: &[u8]) -> Result<SectorRecord> {
    let prev = BigEndian::read_i32(&buf[0..4]);
    let next = BigEndian::read_i32(&buf[4..8]);
    let size = BigEndian::read_i32(&buf[8..12]);

    let prev = track_assert_some!(link_from_i32(prev), ErrorKind::TableCorrupted, "prev={}", prev);
    let next = track_assert_some!(link_from_i32(next), ErrorKind::TableCorrupted, "next={}", next);
    track_assert!(
        size != i32::min_value(),
        ErrorKind::TableCorrupted,
        "size={}",
        size
    );
    Ok(SectorRecord::new(prev, next, SectorSize::from_i32(size)))
}
