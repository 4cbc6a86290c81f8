//! スナップショットのヘッダ.
//!
//! # フォーマット
//!
//! ```text
//! magic_number: [u8; 4] ("shtb")
//! header_size:  u16     (以降のヘッダ部分のバイト数)
//! major:        u16
//! minor:        u16
//! uuid:         [u8; 16]
//! capacity:     u32     (番兵を含むセクタ数)
//! ```
//!
//! ヘッダはチェックサムの対象外.
//! そのため`capacity`の値は、範囲の検査のみを行った上で、続くレコード列の読み込みに使われる.
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use uuid::Uuid;

use crate::table::{
    SectorRecord, MAGIC_NUMBER, MAJOR_VERSION, MAX_CAPACITY, MINOR_VERSION, MIN_CAPACITY,
};
use crate::{ErrorKind, Result};

/// ヘッダを表現するのに必要なバイト数.
const HEADER_SIZE: u16 =
    2 /* major_version */ +
    2 /* minor_version */ +
    16 /* UUID */ +
    4 /* capacity */;

/// **マジックナンバー** と **ヘッダサイズ** も含めたサイズ.
pub(crate) const FULL_HEADER_SIZE: u16 = 4 + 2 + HEADER_SIZE;

/// セクタテーブルのスナップショットのヘッダ情報.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotHeader {
    /// メジャーバージョン.
    ///
    /// メジャーバージョンが異なるスナップショット同士のデータ形式には互換性が無い.
    ///
    /// 現在の最新バージョンは[`MAJOR_VERSION`](./constant.MAJOR_VERSION.html).
    pub major_version: u16,

    /// マイナーバージョン.
    ///
    /// マイナーバージョンには、後方互換性がある.
    ///
    /// 現在の最新バージョンは[`MINOR_VERSION`](./constant.MINOR_VERSION.html).
    pub minor_version: u16,

    /// テーブルの特定のインスタンスを識別するためのUUID.
    pub instance_uuid: Uuid,

    /// テーブルの容量(番兵を含むセクタ数).
    pub capacity: u32,
}
impl SnapshotHeader {
    /// ヘッダに続くレコード列のバイト数を返す.
    pub fn records_size(&self) -> u64 {
        u64::from(self.capacity) * SectorRecord::SIZE as u64
    }

    /// 保存済みのスナップショットファイルからヘッダを取り出す.
    pub fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = track_io!(File::open(path))?;
        track!(Self::read_from(file))
    }

    /// ヘッダ情報を`reader`から読み込む.
    pub fn read_from<R: Read>(mut reader: R) -> Result<Self> {
        // magic number
        let mut magic_number = [0; 4];
        track_io!(reader.read_exact(&mut magic_number))?;
        track_assert_eq!(magic_number, MAGIC_NUMBER, ErrorKind::InvalidInput);

        // header size
        let header_size = track_io!(reader.read_u16::<BigEndian>())?;
        let mut reader = reader.take(u64::from(header_size));

        // versions
        let major_version = track_io!(reader.read_u16::<BigEndian>())?;
        let minor_version = track_io!(reader.read_u16::<BigEndian>())?;
        track_assert_eq!(
            major_version,
            MAJOR_VERSION,
            ErrorKind::InvalidInput,
            "Unsupported major version",
        );
        track_assert!(
            minor_version <= MINOR_VERSION,
            ErrorKind::InvalidInput,
            "Unsupported minor version: actual={}, supported={}",
            minor_version,
            MINOR_VERSION
        );

        // UUID
        let mut instance_uuid = [0; 16];
        track_io!(reader.read_exact(&mut instance_uuid))?;
        let instance_uuid = Uuid::from_bytes(instance_uuid);

        // capacity
        let capacity = track_io!(reader.read_u32::<BigEndian>())?;
        track_assert!(
            MIN_CAPACITY <= capacity && capacity <= MAX_CAPACITY,
            ErrorKind::InvalidInput,
            "capacity:{}",
            capacity
        );

        track_assert_eq!(reader.limit(), 0, ErrorKind::InvalidInput);
        Ok(SnapshotHeader {
            major_version,
            minor_version,
            instance_uuid,
            capacity,
        })
    }

    /// ヘッダ情報を`writer`に書き込む.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<()> {
        track_io!(writer.write_all(&MAGIC_NUMBER[..]))?;
        track_io!(writer.write_u16::<BigEndian>(HEADER_SIZE))?;
        track_io!(writer.write_u16::<BigEndian>(self.major_version))?;
        track_io!(writer.write_u16::<BigEndian>(self.minor_version))?;
        track_io!(writer.write_all(self.instance_uuid.as_bytes()))?;
        track_io!(writer.write_u32::<BigEndian>(self.capacity))?;
        Ok(())
    }
}
