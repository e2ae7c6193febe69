// 基本的なデータ型と数学ユーティリティ
pub mod common;

// 運動モデル・参照経路の提供元インターフェース（trait）定義
pub mod traits;

// 運動モデルと参照経路の実装
pub mod kinematics;
pub mod reference;

// 実車両エージェントと相手の内部モデル
pub mod agent;

// 便利な re-export
pub use common::*;
pub use traits::*;
pub use kinematics::BicycleModel;
pub use reference::{PathBuilder, PathLibrary, ReferencePath};
pub use agent::{AgentState, BeliefModel, BeliefState, RealAgent};
