//! # ipvsim
//!
//! 2台の車両の相互作用を、IPV（Interaction Preference Value）で重み付けした
//! 反復最適応答ゲームとしてシミュレーションし、観測軌道から相手のIPVを
//! 推定するライブラリです。
//!
//! - [`game`]: コストモデル、最適応答、IBR、信念推定
//! - [`models`]: 状態・軌道・運動モデル・参照経路・エージェント
//! - [`scenario`]: YAMLシナリオ設定
//! - [`simulation`]: 対話シミュレーションのエンジン
//! - [`analysis`]: 記録軌道の区間検出とIPV再推定
//! - [`logging`]: ログ出力の初期化

pub mod analysis;
pub mod game;
pub mod logging;
pub mod models;
pub mod scenario;
pub mod simulation;
