//! Sector Heap.
//!
//! `sectorheap`は、管理領域(セクタテーブル)と実メモリを分離した、固定容量のアロケータ.
//!
//! # 特徴
//!
//! - 割当の結果として返されるのはアドレスではなく **セクタ番号**
//!   - 実メモリは利用者側で別途用意し、セクタ番号からアドレスへの変換も利用者が行う
//! - 管理領域は、位置に依存しない固定長レコードのフラットな配列
//!   - ポインタを含まないので、実メモリに触れることなく、そのまま[シリアライズ][snapshot]・復元が可能
//!   - 厳密な中断・再開処理や、組込み環境での利用を想定している
//! - 使用済領域と空き領域を、別々の双方向リンクリストで管理する
//!   - 空き領域の探索(first-fit)では、使用済領域が探索対象から除外される
//! - 解放時には、アドレス上で隣接する空き領域との併合を行う
//! - スレッドセーフではない (複数スレッドから使う場合の排他は利用者の責務)
//!
//! # モジュールの依存関係
//!
//! ```text
//! table => (sector, list, header, snapshot) => error
//! ```
//!
//! - [table]モジュール:
//!   - 主に[SectorTable]構造体と、そのビルダである[SectorTableBuilder]を提供
//!   - `sectorheap`の利用者が直接触るのはこの構造体
//! - [metrics]モジュール:
//!   - テーブルの割当・解放状況を[Prometheus][prometheus]形式で公開する
//!
//! [table]: ./table/index.html
//! [SectorTable]: ./table/struct.SectorTable.html
//! [SectorTableBuilder]: ./table/struct.SectorTableBuilder.html
//! [metrics]: ./metrics/index.html
//! [snapshot]: ./table/struct.SectorTable.html#method.write_to
//! [prometheus]: https://prometheus.io/
#![warn(missing_docs)]
extern crate adler32;
extern crate byteorder;
extern crate prometrics;
#[cfg(test)]
extern crate tempdir;
#[macro_use]
extern crate trackable;
extern crate uuid;
#[macro_use]
extern crate slog;

pub use crate::error::{Error, ErrorKind};

macro_rules! track_io {
    ($expr:expr) => {
        $expr.map_err(|e: ::std::io::Error| track!(crate::Error::from(e)))
    };
}

pub mod metrics;
pub mod table;

mod error;

/// crate固有の`Result`型.
pub type Result<T> = std::result::Result<T, Error>;
