use trackable::error::ErrorKindExt;

/// crate固有のエラー型.
#[derive(Debug, Clone, TrackableError)]
pub struct Error(trackable::error::TrackableError<ErrorKind>);
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if let Some(e) = e.get_ref().and_then(|e| e.downcast_ref::<Error>()).cloned() {
            e
        } else if e.kind() == std::io::ErrorKind::InvalidInput {
            ErrorKind::InvalidInput.cause(e).into()
        } else {
            ErrorKind::Other.cause(e).into()
        }
    }
}
impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        if *e.kind() == ErrorKind::InvalidInput {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
        } else {
            std::io::Error::new(std::io::ErrorKind::Other, e)
        }
    }
}

/// 発生し得るエラーの種別.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 要求サイズを満たす空き領域が存在しない.
    ///
    /// テーブルの状態は変更されていない.
    ///
    /// # 典型的な対応策
    ///
    /// - 利用者が不要な領域を解放した上でリトライする
    /// - より大きな容量のテーブルを使用する
    OutOfMemory,

    /// 解放対象として、割当済みではないセクタ番号が指定された.
    ///
    /// 利用者側のプログラムにバグがあることを示している.
    /// デバッグビルドでは、このエラーが返される前にパニックする.
    ///
    /// # 典型的な対応策
    ///
    /// - 利用者側のプログラムを修正して、二重解放等を無くす
    InvalidHandle,

    /// テーブルのスナップショットが破損している.
    ///
    /// チェックサムの検証や、テーブルの整合性検査に失敗した場合にこのエラーが返される.
    ///
    /// # 典型的な対応策
    ///
    /// - 別のスナップショットから復元する
    /// - それが無理であれば、諦めて初期化を行う
    TableCorrupted,

    /// 入力が不正.
    ///
    /// E.g., 容量が小さすぎる、サイズ`0`の割当要求、スナップショットのバージョン不一致
    ///
    /// # 典型的な対応策
    ///
    /// - 利用者側のプログラムを修正して入力を正しくする
    InvalidInput,

    /// その他エラー.
    ///
    /// E.g., スナップショット読み書き時のI/Oエラー
    Other,
}
impl trackable::error::ErrorKind for ErrorKind {}
