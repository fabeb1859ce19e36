//! 基础形态类型
//!
//! 各层结构均存放在图的实体池中，以整数句柄相互引用。
//! 句柄在实体生命周期内保持稳定，实体删除后句柄失效且不再复用。

use serde_derive::*;

/// K线
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    /// 毫秒时间戳
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// 附加值
    pub info: f64,
}

/// 分型点句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartingId(pub(crate) usize);

/// 笔句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrokeId(pub(crate) usize);

/// 线段句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SegmentId(pub(crate) usize);

/// 中枢句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CenterId(pub(crate) usize);

/// 走势句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrendId(pub(crate) usize);

/// 笔和线段状态
///
/// 最后一个可能会被移除，倒数第二个有效但结束位置可能变，
/// 倒数第三个确认完成，不会再改。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShapeState {
    Init,
    Valid,
    Done,
}

/// 带价格的图上位置
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValuePoint {
    pub bar_id: usize,
    pub price: f64,
}

/// 分型点
///
/// 1为顶分型，-1为底分型。点不单独删除，仅当引用它的结构全部删除后
/// 释放。`next`串起点的发现顺序链。
#[derive(Debug, Clone)]
pub struct Parting {
    pub(crate) dirt: f64,
    pub(crate) bar_id: usize,
    pub(crate) price: f64,
    pub(crate) rev: u64,
    pub(crate) start_sk: Option<StrokeId>,
    pub(crate) end_sk: Option<StrokeId>,
    pub(crate) start_sg: Option<SegmentId>,
    pub(crate) end_sg: Option<SegmentId>,
    pub(crate) start_tr: Option<TrendId>,
    pub(crate) end_tr: Option<TrendId>,
    pub(crate) next: Option<PartingId>,
}

/// 笔
#[derive(Debug, Clone)]
pub struct Stroke {
    pub(crate) start: PartingId,
    pub(crate) end: PartingId,
    /// 1向上，-1向下
    pub(crate) dirt: f64,
    pub(crate) state: ShapeState,
    pub(crate) rev: u64,
    pub(crate) prev: Option<StrokeId>,
    pub(crate) next: Option<StrokeId>,
}

/// 线段
///
/// 线段的完成由下一个线段的开始确认：
/// 特征序列无缺口时新线段开始立刻完成当前线段；
/// 有缺口时新线段须由顶底分型确认有效，当前线段才完成。
#[derive(Debug, Clone)]
pub struct Segment {
    pub(crate) start: PartingId,
    pub(crate) end: Option<PartingId>,
    /// 1向上，0未确定，-1向下
    pub(crate) dirt: f64,
    pub(crate) state: ShapeState,
    /// 特征序列
    pub(crate) feas: Vec<[f64; 2]>,
    /// 此线段是否必须以顶底分型确认
    pub(crate) in_force: bool,
    /// 此线段是假设的，需要再次检查是否有效
    pub(crate) temp: bool,
    pub(crate) rev: u64,
    pub(crate) prev: Option<SegmentId>,
    pub(crate) next: Option<SegmentId>,
    /// 所属中枢，一个线段只可属于一个中枢
    pub(crate) centre: Option<CenterId>,
}

/// 中枢
#[derive(Debug, Clone)]
pub struct Center {
    pub(crate) start: PartingId,
    pub(crate) end: PartingId,
    /// 中枢重叠区间
    pub(crate) overlap: [f64; 2],
    /// 中枢高低区间
    pub(crate) range: [f64; 2],
    pub(crate) dirt: f64,
    pub(crate) rev: u64,
}

/// 走势（未实现，仅保留数据模型占位）
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Trend {
    pub(crate) start: PartingId,
    pub(crate) end: PartingId,
    pub(crate) dirt: f64,
    pub(crate) state: ShapeState,
    pub(crate) prev: Option<TrendId>,
    pub(crate) next: Option<TrendId>,
}

/// 绘图线条
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawLine {
    pub start_pos: usize,
    pub start_price: f64,
    pub stop_pos: usize,
    pub stop_price: f64,
}

/// 判断两个价格区间是否相交（区间已升序排列）
///
/// 返回重叠长度与后者长度之比，不相交返回0。
pub(crate) fn intersect(fa: [f64; 2], fb: [f64; 2]) -> f64 {
    let (a1, a2) = (fa[0], fa[1]);
    let (b1, b2) = (fb[0], fb[1]);
    if a1 <= b2 && b1 <= a2 {
        let overlap = a2.min(b2) - a1.max(b1);
        return overlap / (b2 - b1);
    }
    0.0
}

/// 按给定方向合并两个特征序列区间
pub(crate) fn merge_fea(dirt: f64, a: [f64; 2], b: [f64; 2]) -> [f64; 2] {
    let mut res = a;
    if dirt * (b[0] - a[0]) > 0.0 {
        res[0] = b[0];
    }
    if dirt * (b[1] - a[1]) > 0.0 {
        res[1] = b[1];
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersect_partial_overlap() {
        assert_eq!(1.0 / 3.0, intersect([1.0, 3.0], [2.0, 5.0]));
        assert_eq!(0.5, intersect([2.0, 5.0], [1.0, 3.0]));
    }

    #[test]
    fn test_intersect_disjoint() {
        assert_eq!(0.0, intersect([1.0, 2.0], [3.0, 4.0]));
        assert_eq!(0.0, intersect([3.0, 4.0], [1.0, 2.0]));
    }

    #[test]
    fn test_intersect_touching_edge() {
        // 仅相切视为不相交
        assert_eq!(0.0, intersect([1.0, 2.0], [2.0, 4.0]));
    }

    #[test]
    fn test_intersect_containment() {
        assert_eq!(1.0, intersect([1.0, 10.0], [3.0, 5.0]));
        assert_eq!(0.25, intersect([3.0, 5.0], [1.0, 9.0]));
    }

    #[test]
    fn test_merge_fea_upward() {
        // 向上时保留更高的边界
        assert_eq!([3.0, 8.0], merge_fea(1.0, [2.0, 8.0], [3.0, 7.0]));
        assert_eq!([2.0, 9.0], merge_fea(1.0, [2.0, 8.0], [1.0, 9.0]));
    }

    #[test]
    fn test_merge_fea_downward() {
        assert_eq!([2.0, 7.0], merge_fea(-1.0, [2.0, 8.0], [3.0, 7.0]));
        assert_eq!([1.0, 8.0], merge_fea(-1.0, [2.0, 8.0], [1.0, 9.0]));
    }
}
