use crate::models::common::*;
use crate::models::reference::ReferencePath;

/// 運動モデルのインターフェース
///
/// 初期状態と制御入力列から離散時間軌道を生成する純粋関数です。
/// 仮説ごとの並列求解から参照されるため `Send + Sync` を要求します。
pub trait KinematicModel: Send + Sync {
    /// 軌道の生成
    ///
    /// 戻り値の軌道は必ず `horizon_len` サンプルを持ち、先頭は `initial` です。
    /// 入力列が短い場合、不足分はゼロ入力として扱います。
    fn propagate(
        &self,
        initial: &StateSample,
        controls: &ControlSequence,
        horizon_len: usize,
        dt: f64,
    ) -> Trajectory;
}

/// 参照経路の提供元インターフェース
pub trait ReferencePathProvider: Send + Sync {
    /// 走行目標ラベルに対応する参照経路の取得
    fn reference_path(&self, label: &str) -> Option<&ReferencePath>;

    /// 登録済みラベルの一覧
    fn labels(&self) -> Vec<String>;
}
