//! # Analysis モジュール
//!
//! 記録済みの走行軌道から、相互作用区間を切り出して両車両のIPVを
//! 再推定します。シミュレーション結果だけでなく、外部で計測した
//! 軌道（欠測フレームを含む）にも適用できます。
//!
//! 1. [`detect_segments`] で相手ごとの相互作用区間 `[start, end)` を検出
//! 2. [`SegmentAnalyzer::reestimate`] で区間内の各フレームについて、
//!    直近の観測窓から両車両のIPVをオフライン推定

use tracing::{debug, info};

use crate::game::{belief::BeliefEstimator, solver::PlayerContext, GameEnvironment, GameError};
use crate::models::common::{StateSample, Trajectory};

/// フレームごとの記録（欠測は `None`）
pub type RecordedTrack = [Option<StateSample>];

/// 相互作用区間
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InteractionSegment {
    /// 相手の軌道インデックス
    pub counterpart: usize,
    /// 開始フレーム（含む）
    pub start: usize,
    /// 終了フレーム（含まない）
    pub end: usize,
}

impl InteractionSegment {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, frame: usize) -> bool {
        self.start <= frame && frame < self.end
    }
}

/// 再推定の方針
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReestimationPolicy {
    /// 観測窓として遡る最大フレーム数
    pub history_frames: usize,
    /// 推定に必要な観測フレーム数（窓長がこれを超えたら推定）
    pub min_observations: usize,
}

impl Default for ReestimationPolicy {
    fn default() -> Self {
        Self {
            history_frames: 10,
            min_observations: 3,
        }
    }
}

/// 1フレーム分の再推定結果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameEstimate {
    pub frame: usize,
    pub ego_ipv: f64,
    pub ego_error: f64,
    pub counterpart_ipv: f64,
    pub counterpart_error: f64,
}

/// 2台の距離が `radius` 以内なら相互作用中とみなす判定
pub fn within_distance(radius: f64) -> impl Fn(&StateSample, &StateSample) -> bool {
    move |ego, other| ego.position().distance(&other.position()) <= radius
}

/// 相手ごとの相互作用区間を検出
///
/// 相手が記録されている最初のフレームから最後のフレームの手前までを走査し、
/// 自車も記録されていて `interacting` が真となるフレームを集めます。
/// 該当フレームが2つ以上ある相手について、最初の該当フレームから最後の
/// 該当フレームまでを区間とします。各区間の開始・終了は直前の区間の終了より
/// 前にならないよう連結されます。
pub fn detect_segments<F>(ego: &RecordedTrack, counterparts: &[Vec<Option<StateSample>>], interacting: F) -> Vec<InteractionSegment>
where
    F: Fn(&StateSample, &StateSample) -> bool,
{
    let mut segments: Vec<InteractionSegment> = Vec::new();

    for (index, track) in counterparts.iter().enumerate() {
        let present: Vec<usize> = track
            .iter()
            .enumerate()
            .filter_map(|(frame, sample)| sample.as_ref().map(|_| frame))
            .collect();
        let (Some(&first), Some(&last)) = (present.first(), present.last()) else {
            continue;
        };

        let frames: Vec<usize> = (first..last)
            .filter(|&frame| match (ego.get(frame).copied().flatten(), track[frame]) {
                (Some(e), Some(c)) => interacting(&e, &c),
                _ => false,
            })
            .collect();

        let (Some(&inter_first), Some(&inter_last)) = (frames.first(), frames.last()) else {
            continue;
        };
        if frames.len() < 2 {
            continue;
        }

        let segment = match segments.last() {
            Some(previous) => InteractionSegment {
                counterpart: index,
                start: inter_first.max(previous.end),
                end: inter_last.max(previous.end),
            },
            None => InteractionSegment {
                counterpart: index,
                start: inter_first,
                end: inter_last,
            },
        };
        debug!(
            counterpart = index,
            start = segment.start,
            end = segment.end,
            "SEGMENT_DETECTED: 相互作用区間を検出しました"
        );
        segments.push(segment);
    }

    segments
}

/// 区間ごとのIPV再推定
#[derive(Debug, Clone, Copy)]
pub struct SegmentAnalyzer<'a> {
    env: &'a GameEnvironment,
    policy: ReestimationPolicy,
    ego_target: &'a str,
    counterpart_target: &'a str,
}

impl<'a> SegmentAnalyzer<'a> {
    /// # 引数
    ///
    /// * `env` - ゲームの実行環境
    /// * `ego_target` - 自車の走行目標ラベル
    /// * `counterpart_target` - 相手の走行目標ラベル
    pub fn new(env: &'a GameEnvironment, ego_target: &'a str, counterpart_target: &'a str) -> Result<Self, GameError> {
        env.reference_path(ego_target)?;
        env.reference_path(counterpart_target)?;
        Ok(Self {
            env,
            policy: ReestimationPolicy::default(),
            ego_target,
            counterpart_target,
        })
    }

    pub fn with_policy(mut self, policy: ReestimationPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// 区間内の各フレームで両車両のIPVを推定
    ///
    /// 観測窓は `max(区間開始, t − history_frames)` から `t` まで（両端含む）です。
    /// 窓長が `min_observations` 以下のフレームと、窓内に欠測があるフレームは
    /// 推定しません。そのため短い区間からは結果が得られません。
    pub fn reestimate(
        &self,
        ego: &RecordedTrack,
        counterpart: &RecordedTrack,
        segment: &InteractionSegment,
    ) -> Result<Vec<FrameEstimate>, GameError> {
        let estimator = BeliefEstimator::new(self.env);
        let ego_path = self.env.reference_path(self.ego_target)?;
        let counterpart_path = self.env.reference_path(self.counterpart_target)?;

        let mut rows = Vec::new();
        if segment.len() <= self.policy.min_observations {
            debug!(
                counterpart = segment.counterpart,
                length = segment.len(),
                "SEGMENT_SKIPPED: 区間が短すぎるため推定しません"
            );
            return Ok(rows);
        }

        for frame in segment.start..segment.end {
            let start = segment.start.max(frame.saturating_sub(self.policy.history_frames));
            if frame - start <= self.policy.min_observations {
                continue;
            }

            let (Some(ego_window), Some(counterpart_window)) =
                (complete_window(ego, start, frame), complete_window(counterpart, start, frame))
            else {
                debug!(frame, "FRAME_SKIPPED: 観測窓に欠測があります");
                continue;
            };

            let ego_track = Trajectory::new(ego_window);
            let counterpart_track = Trajectory::new(counterpart_window);

            let ego_estimate = estimator.estimate_offline(
                &PlayerContext::new(ego_track.samples()[0], 0.0, ego_path),
                &counterpart_track,
                ego_track.samples(),
            );
            let counterpart_estimate = estimator.estimate_offline(
                &PlayerContext::new(counterpart_track.samples()[0], 0.0, counterpart_path),
                &ego_track,
                counterpart_track.samples(),
            );

            rows.push(FrameEstimate {
                frame,
                ego_ipv: ego_estimate.ipv,
                ego_error: ego_estimate.error,
                counterpart_ipv: counterpart_estimate.ipv,
                counterpart_error: counterpart_estimate.error,
            });
        }

        info!(
            counterpart = segment.counterpart,
            start = segment.start,
            end = segment.end,
            frames = rows.len(),
            "SEGMENT_REESTIMATED: 区間のIPVを再推定しました"
        );

        Ok(rows)
    }
}

/// `[start, end]` の全フレームが揃っていればその列を返す
fn complete_window(track: &RecordedTrack, start: usize, end: usize) -> Option<Vec<StateSample>> {
    track.get(start..=end)?.iter().copied().collect()
}
