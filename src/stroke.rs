//! 笔的维护
//!
//! 新笔追加时校验方向交替，并滚动提升此前笔的状态：
//! 倒数第二笔确认有效，倒数第三笔确认完成。

use crate::shape::StrokeId;
use crate::stream::EventKind;
use crate::Graph;
use crate::{Error, Result};
use log::debug;

impl Graph {
    /// 将一笔追加到笔序列，并尝试构建线段
    pub(crate) fn add_stroke(&mut self, sid: StrokeId) -> Result<()> {
        let dirt = self.sk(sid).dirt;
        if self.cfg.debug {
            let snap = self.stroke_snap(sid);
            debug!(
                "new {} stroke ({}, {:.3}) ({}, {:.3})",
                dirt, snap.start.bar_id, snap.start.price, snap.end.bar_id, snap.end.price
            );
        }
        if let Some(&last) = self.sk_seq.last() {
            let last_dirt = self.sk(last).dirt;
            if last_dirt * dirt >= 0.0 {
                return Err(Error::BrokenAlternation(last_dirt, dirt));
            }
            if self.sk(last).state == crate::ShapeState::Init {
                // 倒数第二笔确认有效，但结束位置可能变
                self.sk_mut(last).state = crate::ShapeState::Valid;
                self.fire_stroke_changed(last);
            }
            if let Some(prev) = self.sk(last).prev {
                if self.sk(prev).state < crate::ShapeState::Done {
                    // 倒数第三笔确认完成，不会再变动
                    self.sk_mut(prev).state = crate::ShapeState::Done;
                    self.fire_stroke_changed(prev);
                }
            }
            self.sk_mut(last).next = Some(sid);
            self.sk_mut(sid).prev = Some(last);
        }
        self.sk_seq.push(sid);
        self.fire_stroke(sid, EventKind::New);
        let end = self.sk(sid).end;
        self.fire_point(end, EventKind::New);
        self.build_segs()
    }

    /// 删除一笔，解除端点引用并修复前后笔链接
    pub(crate) fn remove_stroke(&mut self, sid: StrokeId) {
        if self.cfg.debug {
            let snap = self.stroke_snap(sid);
            debug!(
                "remove stroke ({}, {:.3}) ({}, {:.3})",
                snap.start.bar_id, snap.start.price, snap.end.bar_id, snap.end.price
            );
        }
        let snap = self.stroke_snap(sid);
        let (start, end, prev, next) = {
            let sk = self.sk(sid);
            (sk.start, sk.end, sk.prev, sk.next)
        };
        let end_snap = self.point_snap(end);
        {
            let p = self.pt_mut(start);
            if p.start_sk == Some(sid) {
                p.start_sk = None;
            }
            if p.next == Some(end) {
                p.next = None;
            }
        }
        if self.pt(end).end_sk == Some(sid) {
            self.pt_mut(end).end_sk = None;
        }
        if let Some(p) = prev {
            self.sk_mut(p).next = next;
        }
        if let Some(n) = next {
            self.sk_mut(n).prev = prev;
        }
        self.sk_seq.retain(|&x| x != sid);
        self.sks[sid.0] = None;
        self.emit(crate::GraphEvent::Stroke(EventKind::Removed, snap));
        self.emit(crate::GraphEvent::Point(EventKind::Removed, end_snap));
        self.maybe_free_point(end);
    }
}

#[cfg(test)]
mod tests {
    use crate::{Graph, ShapeState};

    #[test]
    fn test_alternation_invariant() {
        let mut g = Graph::default();
        let pens = [
            10.0, 30.0, 20.0, 50.0, 40.0, 60.0, 55.0, 150.0, 110.0, 130.0, 105.0, 120.0, 108.0,
            118.0, 80.0, 127.0, 105.0, 130.0, 104.0, 160.0, 155.0, 180.0, 150.0,
        ];
        g.load_strokes(1, &pens).unwrap();
        let sks = g.strokes();
        assert_eq!(22, sks.len());
        for w in sks.windows(2) {
            assert!(w[0].dirt * w[1].dirt < 0.0);
        }
    }

    #[test]
    fn test_segment_alternation_invariant() {
        let mut g = Graph::default();
        let pens = [
            10.0, 30.0, 20.0, 50.0, 40.0, 60.0, 55.0, 150.0, 110.0, 130.0, 105.0, 120.0, 108.0,
            118.0, 80.0, 127.0, 105.0, 130.0, 104.0, 160.0, 155.0, 180.0, 150.0,
        ];
        g.load_strokes(1, &pens).unwrap();
        let segs = g.segments();
        assert!(segs.len() > 1);
        for w in segs.windows(2) {
            assert!(w[0].dirt * w[1].dirt < 0.0);
        }
    }

    #[test]
    fn test_loaded_strokes_are_done() {
        let mut g = Graph::default();
        g.load_strokes(1, &[10.0, 30.0, 20.0, 40.0]).unwrap();
        for sk in g.strokes() {
            assert_eq!(ShapeState::Done, sk.state);
        }
    }
}
