//! 中枢构建
//!
//! 线段完成时触发：优先尝试延伸隔一段的同向中枢，
//! 否则回溯三个无中枢的连续完成线段，检查首尾区间重叠构成新中枢。
//! 中枢一经形成不再删除，只会延伸。

use crate::shape::{intersect, CenterId, PartingId, SegmentId, ShapeState};
use crate::stream::EventKind;
use crate::Graph;
use log::debug;

/// 延伸中枢时，最新两段与重叠区间的最低重合占比
const EXTEND_MAX_LAP: f64 = 0.2;
/// 延伸中枢时，最新一段自身须保持的重合占比
const EXTEND_LAST_LAP: f64 = 0.1;
/// 新中枢重叠区间占中间段区间的最低比例
const NEW_MID_LAP: f64 = 0.3;

impl Graph {
    /// 线段完成后检查中枢的延伸或新建
    pub(crate) fn seg_fire_done(&mut self, sid: SegmentId) {
        if self.sg(sid).state < ShapeState::Done {
            return;
        }
        let prev = match self.sg(sid).prev {
            Some(p) => p,
            None => return,
        };
        let pv2 = match self.sg(prev).prev {
            Some(p) => p,
            None => return,
        };
        if self.sg_seq.len() < 4 {
            return;
        }
        let fea = self.seg_feature(sid);
        let dirt = self.sg(sid).dirt;
        if let Some(cid) = self.sg(pv2).centre {
            if dirt * self.cen(cid).dirt > 0.0 {
                let overlap = self.cen(cid).overlap;
                let lap1 = intersect(overlap, self.seg_feature(prev));
                let lap2 = intersect(overlap, fea);
                if lap1.max(lap2) > EXTEND_MAX_LAP && lap2 > EXTEND_LAST_LAP {
                    // 最新两段依旧在中枢范围内，延伸中枢
                    self.sg_mut(sid).centre = Some(cid);
                    self.sg_mut(prev).centre = Some(cid);
                    let end = self.seg_end(sid);
                    self.center_set_end(cid, end);
                    return;
                }
            }
        }
        // 回溯最多三个无中枢的连续线段
        let mut segs = Vec::with_capacity(3);
        let mut cur = Some(sid);
        while let Some(s) = cur {
            if self.sg(s).centre.is_some() {
                break;
            }
            segs.push(s);
            if segs.len() == 3 {
                break;
            }
            cur = self.sg(s).prev;
        }
        if segs.len() < 3 {
            return;
        }
        let fea3 = self.seg_feature(segs[2]);
        if intersect(fea, fea3) > 0.0 {
            // 首尾有重叠部分，可构成中枢
            let overlap = [fea[0].max(fea3[0]), fea[1].min(fea3[1])];
            if intersect(overlap, self.seg_feature(segs[1])) > NEW_MID_LAP {
                let start = self.sg(segs[2]).start;
                let end = self.seg_end(sid);
                let range = [fea[0].min(fea3[0]), fea[1].max(fea3[1])];
                let cen_dirt = self.sg(segs[2]).dirt;
                let cid = self.alloc_center(start, end, overlap, range, cen_dirt);
                self.cen_seq.push(cid);
                self.sg_mut(segs[2]).centre = Some(cid);
                self.sg_mut(segs[1]).centre = Some(cid);
                self.sg_mut(sid).centre = Some(cid);
                if self.cfg.debug {
                    let snap = self.center_snap(cid);
                    debug!(
                        "new centre ({}, {}) overlap [{:.3}, {:.3}]",
                        snap.start.bar_id, snap.end.bar_id, snap.overlap[0], snap.overlap[1]
                    );
                }
                self.fire_center(cid, EventKind::New);
            }
        }
    }

    /// 延伸中枢终点，高低区间吸收途经的所有笔端点
    fn center_set_end(&mut self, cid: CenterId, pid: PartingId) {
        let mut range = self.cen(cid).range;
        let mut pt = self.cen(cid).end;
        while let Some(sk) = self.pt(pt).start_sk {
            pt = self.sk(sk).end;
            let price = self.pt(pt).price;
            if price > range[1] {
                range[1] = price;
            } else if price < range[0] {
                range[0] = price;
            }
            if pt == pid {
                break;
            }
        }
        {
            let cen = self.cen_mut(cid);
            cen.range = range;
            cen.end = pid;
        }
        self.fire_center_changed(cid);
    }
}

#[cfg(test)]
mod tests {
    use crate::{EventKind, Graph, GraphEvent};
    use std::cell::RefCell;
    use std::rc::Rc;

    const CONS: [f64; 21] = [
        100.0, 80.0, 90.0, 60.0, 85.0, 70.0, 95.0, 65.0, 85.0, 55.0, 80.0, 62.0, 90.0, 70.0, 82.0,
        50.0, 120.0, 100.0, 150.0, 130.0, 160.0,
    ];

    #[test]
    fn test_three_overlapping_segments_form_centre() {
        let mut g = Graph::default();
        g.load_strokes(1, &CONS).unwrap();
        let segs = g.segments();
        assert_eq!(6, segs.len());
        let cens = g.centers();
        assert_eq!(1, cens.len());
        let cen = &cens[0];
        assert_eq!((4, 60.0), (cen.start.bar_id, cen.start.price));
        assert_eq!((13, 90.0), (cen.end.bar_id, cen.end.price));
        assert_eq!([60.0, 90.0], cen.overlap);
        assert_eq!([55.0, 95.0], cen.range);
        assert_eq!(1.0, cen.dirt);
        // 重叠区间始终处于高低区间之内
        assert!(cen.range[0] <= cen.overlap[0] && cen.overlap[1] <= cen.range[1]);
    }

    #[test]
    fn test_centre_extension_grows_range() {
        let mut g = Graph::default();
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        g.set_listener(move |e: &GraphEvent| sink.borrow_mut().push(*e));
        let mut pens = CONS.to_vec();
        pens.extend_from_slice(&[140.0, 155.0, 125.0, 145.0, 115.0, 135.0, 105.0]);
        g.load_strokes(1, &pens).unwrap();
        let cens = g.centers();
        assert_eq!(1, cens.len());
        let cen = &cens[0];
        // 终点推进到延伸段的结束，重叠区间不变，高低区间吸收新极值
        assert_eq!((21, 160.0), (cen.end.bar_id, cen.end.price));
        assert_eq!([60.0, 90.0], cen.overlap);
        assert_eq!([50.0, 160.0], cen.range);
        let log = log.borrow();
        let changed = log
            .iter()
            .filter(|e| matches!(e, GraphEvent::Center(EventKind::Changed, _)))
            .count();
        assert_eq!(1, changed);
        let news = log
            .iter()
            .filter(|e| matches!(e, GraphEvent::Center(EventKind::New, _)))
            .count();
        assert_eq!(1, news);
    }

    #[test]
    fn test_centre_needs_four_segments() {
        // 三段重叠但完成线段不足，不构成中枢
        let mut g = Graph::default();
        g.load_strokes(1, &CONS[..10]).unwrap();
        assert!(g.centers().is_empty());
    }
}
