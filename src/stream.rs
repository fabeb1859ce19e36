//! 事件流
//!
//! 每根K线解析完成前，所有层级的结构变更按点、笔、线段、中枢的
//! 级联顺序同步推送给监听器。`Changed`与`Removed`表示对此前推送
//! 内容的权威修正，快照中的`rev`单调递增，可用于丢弃过期副本。

use crate::shape::{CenterId, PartingId, SegmentId, ShapeState, StrokeId, ValuePoint};
use serde_derive::*;

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    New,
    Changed,
    Removed,
}

/// 分型点快照
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PointSnap {
    pub id: PartingId,
    pub dirt: f64,
    pub bar_id: usize,
    pub price: f64,
    pub rev: u64,
}

/// 笔快照
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrokeSnap {
    pub id: StrokeId,
    pub dirt: f64,
    pub state: ShapeState,
    pub start: ValuePoint,
    pub end: ValuePoint,
    pub rev: u64,
}

/// 线段快照
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SegmentSnap {
    pub id: SegmentId,
    pub dirt: f64,
    pub state: ShapeState,
    pub start: ValuePoint,
    pub end: ValuePoint,
    pub in_force: bool,
    pub temp: bool,
    pub rev: u64,
}

/// 中枢快照
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CenterSnap {
    pub id: CenterId,
    pub dirt: f64,
    pub start: ValuePoint,
    pub end: ValuePoint,
    pub overlap: [f64; 2],
    pub range: [f64; 2],
    pub rev: u64,
}

/// 图结构变更事件
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum GraphEvent {
    Point(EventKind, PointSnap),
    Stroke(EventKind, StrokeSnap),
    Segment(EventKind, SegmentSnap),
    Center(EventKind, CenterSnap),
}

impl GraphEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GraphEvent::Point(k, _) => *k,
            GraphEvent::Stroke(k, _) => *k,
            GraphEvent::Segment(k, _) => *k,
            GraphEvent::Center(k, _) => *k,
        }
    }
}

/// 图事件监听器
///
/// 闭包可直接作为监听器使用。
pub trait GraphListener {
    fn on_event(&mut self, event: &GraphEvent);
}

impl<F> GraphListener for F
where
    F: FnMut(&GraphEvent),
{
    fn on_event(&mut self, event: &GraphEvent) {
        self(event)
    }
}
