//! # Game モジュール
//!
//! 2台の車両間の相互作用を、IPV（Interaction Preference Value）で重み付けした
//! 効用の反復最適応答（IBR）ゲームとして解き、観測軌道から相手のIPVを
//! ベイズ的に推定する数値計算の中核です。
//!
//! ## 構成
//!
//! - [`config`]: 重み・上下限・反復方針などの不変設定
//! - [`cost`]: 内部コスト（進捗・経路追従）と集団コスト（接近）
//! - [`optimizer`]: 箱型制約付きの非線形最小化
//! - [`solver`]: 効用関数と最適応答ソルバー
//! - [`ibr`]: 2者間の反復最適応答（状態機械）
//! - [`belief`]: IPV仮説アンサンブルによる信念推定

pub mod belief;
pub mod config;
pub mod cost;
pub mod ibr;
pub mod optimizer;
pub mod solver;

pub use belief::{BeliefEstimator, ErrorMetric, IpvEstimate};
pub use config::{BeliefConfig, CostWeights, GameConfig, IbrPolicy, IpvCandidates, OptimizerConfig};
pub use cost::CostModel;
pub use ibr::{IbrGame, IbrOutcome, IbrTermination};
pub use optimizer::{BoundedMinimizer, OptimizeResult, Termination};
pub use solver::{BestResponse, BestResponseSolver, PlayerContext};

use thiserror::Error;

use crate::models::{
    common::{ControlSequence, StateSample, Trajectory},
    kinematics::BicycleModel,
    reference::{PathLibrary, ReferencePath, DEFAULT_PATH_RESOLUTION},
    traits::{KinematicModel, ReferencePathProvider},
};

/// ゲームソルバーのエラー
///
/// 数値計算自体は常に最善の結果を返すため、ここに含まれるのは
/// 設定や参照経路の指定誤りのみです。
#[derive(Debug, Error)]
pub enum GameError {
    #[error("未登録の走行目標ラベルです: {0}")]
    UnknownManeuver(String),
    #[error("ゲーム設定が不正です: {0}")]
    InvalidConfig(String),
}

/// ゲームの実行環境
///
/// 不変設定、運動モデル、参照経路の提供元をまとめて保持します。
/// 全コンポーネントはこの環境を参照で共有し、変更しません。
pub struct GameEnvironment {
    config: GameConfig,
    kinematics: Box<dyn KinematicModel>,
    paths: Box<dyn ReferencePathProvider>,
}

impl std::fmt::Debug for GameEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameEnvironment")
            .field("config", &self.config)
            .field("paths", &self.paths.labels())
            .finish()
    }
}

impl GameEnvironment {
    /// 設定を検証して環境を作成
    pub fn new(
        config: GameConfig,
        kinematics: Box<dyn KinematicModel>,
        paths: Box<dyn ReferencePathProvider>,
    ) -> Result<Self, GameError> {
        config.validate()?;
        Ok(Self {
            config,
            kinematics,
            paths,
        })
    }

    /// 自転車モデルと交差点の標準経路を用いた環境
    pub fn intersection(config: GameConfig) -> Result<Self, GameError> {
        Self::new(
            config,
            Box::new(BicycleModel::default()),
            Box::new(PathLibrary::intersection(DEFAULT_PATH_RESOLUTION)),
        )
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// 初期状態と入力列から軌道を生成
    pub fn propagate(&self, initial: &StateSample, controls: &ControlSequence, horizon_len: usize) -> Trajectory {
        self.kinematics.propagate(initial, controls, horizon_len, self.config.dt)
    }

    /// 走行目標ラベルから参照経路を取得
    pub fn reference_path(&self, label: &str) -> Result<&ReferencePath, GameError> {
        self.paths
            .reference_path(label)
            .ok_or_else(|| GameError::UnknownManeuver(label.to_string()))
    }

    pub fn cost_model(&self) -> CostModel {
        CostModel::new(self.config.weights)
    }
}
