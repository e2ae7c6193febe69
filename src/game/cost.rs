use crate::game::config::CostWeights;
use crate::models::{common::Trajectory, reference::ReferencePath};

/// 内部コストの内訳
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InteriorCostTerms {
    /// 進捗コスト −‖終点 − 始点‖ / サンプル数
    pub progress: f64,
    /// 参照経路からの平均逸脱量
    pub mean_deviation: f64,
    /// 計画変更コスト（未使用のため常に0）
    pub plan_change: f64,
}

/// 軌道評価のコストモデル
///
/// 単独車両の内部コストと、2台間の集団コストを計算します。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    weights: CostWeights,
}

impl CostModel {
    pub fn new(weights: CostWeights) -> Self {
        Self { weights }
    }

    pub fn weights(&self) -> &CostWeights {
        &self.weights
    }

    /// 内部コストの内訳を計算
    ///
    /// 各サンプルを参照経路の最近傍点に対応づけ、平均逸脱量と平均進捗を求めます。
    pub fn interior_terms(&self, trajectory: &Trajectory, path: &ReferencePath) -> InteriorCostTerms {
        let (Some(start), Some(end)) = (trajectory.first(), trajectory.last()) else {
            return InteriorCostTerms::default();
        };
        let len = trajectory.len() as f64;

        let travel = start.position().distance(&end.position()) / len;
        let mean_deviation = trajectory
            .samples()
            .iter()
            .map(|s| path.deviation(&s.position()))
            .sum::<f64>()
            / len;

        InteriorCostTerms {
            progress: -travel,
            mean_deviation,
            plan_change: 0.0,
        }
    }

    /// 内部コスト
    pub fn interior_cost(&self, trajectory: &Trajectory, path: &ReferencePath) -> f64 {
        let terms = self.interior_terms(trajectory, path);
        let w = &self.weights;
        (w.delay * terms.progress + w.deviation * terms.mean_deviation + w.plan_change * terms.plan_change)
            * w.interior
    }

    /// 集団コスト
    ///
    /// 各時刻の2台間距離の最小値と、それが最初に現れる時刻インデックスから
    /// `−最小距離 × インデックス / サンプル数` を計算します。
    /// 同じ最小距離が複数時刻で現れた場合は最も早い時刻を採用します。
    pub fn group_cost(&self, own: &Trajectory, other: &Trajectory) -> f64 {
        let closest = own
            .samples()
            .iter()
            .zip(other.samples())
            .map(|(a, b)| a.position().distance(&b.position()))
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, d)| match best {
                Some((_, best_d)) if best_d <= d => best,
                _ => Some((i, d)),
            });

        match closest {
            Some((index, min_distance)) => {
                -min_distance * index as f64 / own.len() as f64 * self.weights.group
            }
            None => 0.0,
        }
    }

    /// IPVを混合角とした効用（最小化対象）
    pub fn blend(&self, ipv: f64, interior: f64, group: f64) -> f64 {
        ipv.cos() * interior + ipv.sin() * group
    }
}
