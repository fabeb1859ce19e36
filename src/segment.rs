//! 线段构建
//!
//! 特征序列由与线段异向的笔构成：线段向上时取向下笔，向下时取向上笔。
//! 当且仅当特征序列走出反向分型时线段结束。转折点前后的特征序列
//! 分属不同的笔，不适用包含关系合并，故缺口前后分别处理。
//!
//! 线段的结束只在其后两笔都已完成时评估，避免未完成的笔带来错误更新。

use crate::shape::{intersect, merge_fea, PartingId, SegmentId, ShapeState, StrokeId};
use crate::stream::EventKind;
use crate::Graph;
use crate::{Error, Result};
use log::debug;

impl Graph {
    /// 两点间价格区间，升序排列
    pub(crate) fn stroke_feature(&self, sid: StrokeId) -> [f64; 2] {
        let sk = self.sk(sid);
        sorted_pair(self.pt(sk.start).price, self.pt(sk.end).price)
    }

    pub(crate) fn seg_feature(&self, sid: SegmentId) -> [f64; 2] {
        let sg = self.sg(sid);
        sorted_pair(self.pt(sg.start).price, self.pt(self.seg_end(sid)).price)
    }

    /// 尝试从笔序列构建或延伸线段
    pub(crate) fn build_segs(&mut self) -> Result<()> {
        let mut seg = match self.sg_seq.last().copied() {
            Some(s) => s,
            None => match self.build_first_seg(0)? {
                Some(s) => s,
                None => return Ok(()),
            },
        };
        loop {
            // 要求线段终点后两笔都已完成才评估
            let seg_end = self.seg_end(seg);
            let fea_pen = match self.pt(seg_end).start_sk {
                Some(f) => f,
                None => break,
            };
            let p2 = match self.sk(fea_pen).next {
                Some(p) => p,
                None => break,
            };
            if self.sk(p2).state < ShapeState::Done {
                break;
            }
            let fea_num = self.sg(seg).feas.len();
            let p3 = self.sk(p2).next;
            let fea = self.sg(seg).feas[fea_num - 1];
            let fea2 = self.stroke_feature(fea_pen);
            let seg_dirt = self.sg(seg).dirt;
            let start_diff = fea2[0] - fea[0];
            // 新特征序列高低点都更高(低)
            let fea_align = start_diff * (fea2[1] - fea[1]) > 0.0;
            // 特征序列方向与线段方向一致
            let fea_dirt_ok = start_diff * seg_dirt > 0.0;
            // 下一个同向笔是否创出新高(低)
            let last_pen_extend =
                (self.pt(self.sk(p2).end).price - self.pt(seg_end).price) * seg_dirt >= 0.0;
            let mut may_new_seg = false;
            let mut new_seg = false;
            let mut new_is_temp = false;
            if let Some(p3_id) = p3 {
                // 后三笔是否能构成新的有效线段
                let start_sub =
                    self.pt(self.sk(p3_id).start).price - self.pt(self.sk(fea_pen).start).price;
                let end_sub =
                    self.pt(self.sk(p3_id).end).price - self.pt(self.sk(fea_pen).end).price;
                let fea_p3_align = start_sub * end_sub > 0.0;
                if fea_p3_align && start_sub * self.sk(fea_pen).dirt > 0.0 {
                    new_seg = true;
                }
                if new_seg && !last_pen_extend {
                    may_new_seg = true;
                }
            }
            let mut new_seg_end: Option<PartingId> = None;
            if !may_new_seg {
                let mut check_cur_fenxing = false;
                if fea_align {
                    if !fea_dirt_ok
                        && (self.sg(seg).in_force && !new_seg || !self.seg_is_valid(seg))
                    {
                        // 要求顶底分型的线段方向不一致且无新有效线段，回退
                        let end_pid = self
                            .sk(self.pt(seg_end).end_sk.expect("segment end has no end stroke"))
                            .start;
                        seg = self.merge_seg_to_prev(seg, end_pid);
                        continue;
                    }
                    if fea_dirt_ok && last_pen_extend {
                        // 与线段方向一致且创出新高(低)，延续线段
                        let p2_end = self.sk(p2).end;
                        self.seg_set_end(seg, p2_end);
                        self.seg_add_feature(seg, fea2);
                    } else if p3.is_none() {
                        // 新线段的第三笔尚未出现
                        break;
                    } else if new_seg && !fea_dirt_ok {
                        may_new_seg = true;
                    } else {
                        // 方向一致但未创新高(低)，或未出现新线段
                        check_cur_fenxing = true;
                    }
                } else if last_pen_extend {
                    // 特征序列包含，按线段方向合并最后一个特征序列
                    self.seg_set_last_fea(seg, merge_fea(seg_dirt, fea, fea2));
                    let p2_end = self.sk(p2).end;
                    self.seg_set_end(seg, p2_end);
                } else if p3.is_some() {
                    if new_seg {
                        may_new_seg = true;
                    } else {
                        check_cur_fenxing = true;
                    }
                } else {
                    break;
                }
                if check_cur_fenxing {
                    // 检查从当前结束点是否走出顶底分型，
                    // 分型不需要严格满足，只需第三元素起点与第一元素
                    // 起点相对第二元素处于同侧
                    let p3_id = p3.expect("fenxing check requires the third stroke");
                    let p4 = match self.sk(p3_id).next {
                        Some(p) => p,
                        None => break,
                    };
                    if self.sk(p4).state < ShapeState::Done {
                        break;
                    }
                    let p3fea = merge_fea(seg_dirt, fea2, self.stroke_feature(p3_id));
                    let col_idx = if seg_dirt > 0.0 { 1 } else { 0 };
                    let p4_end = self.sk(p4).end;
                    let p4_end_price = self.pt(p4_end).price;
                    if (p4_end_price - p3fea[col_idx]) * (p3fea[col_idx] - fea[col_idx]) > 0.0 {
                        // 不构成顶底分型，合并进特征序列
                        self.seg_add_feature(seg, p3fea);
                        self.seg_set_end(seg, p4_end);
                    } else {
                        may_new_seg = true;
                        new_is_temp = true;
                        match self.sk(p4).next {
                            Some(p5) => new_seg_end = Some(self.sk(p5).end),
                            None => break,
                        }
                    }
                }
            }
            if may_new_seg {
                let nse = match new_seg_end {
                    Some(p) => p,
                    None => self.sk(p3.expect("new segment requires the third stroke")).end,
                };
                let has_fenxing = (new_seg || new_is_temp) && (fea_num > 1 || fea_align);
                if self.sg(seg).in_force && !has_fenxing || !self.seg_is_valid(seg) {
                    // 必须顶底分型确认而未确认，或假设线段检验失败，
                    // 移除此线段并合并到前一线段
                    seg = self.merge_seg_to_prev(seg, nse);
                    continue;
                }
                let start = self.seg_end(seg);
                let dirt = self.sg(seg).dirt;
                let next = self.alloc_segment(
                    start,
                    Some(nse),
                    ShapeState::Valid,
                    -dirt,
                    Some(seg),
                    new_is_temp,
                );
                self.pt_mut(start).start_sg = Some(next);
                self.sg_mut(seg).next = Some(next);
                // 当前线段最后的特征序列有缺口时，新线段必须以顶底分型结束
                let require_force = intersect(fea, fea2) == 0.0;
                if require_force {
                    self.sg_mut(next).state = ShapeState::Init;
                    self.sg_mut(next).in_force = true;
                    self.sg_mut(seg).state = ShapeState::Valid;
                    self.fire_seg_changed(seg);
                    if let Some(prev) = self.sg(seg).prev {
                        if self.sg(prev).state < ShapeState::Done {
                            self.sg_mut(prev).state = ShapeState::Done;
                            self.seg_fire_done(prev);
                            self.fire_seg_changed(prev);
                        }
                    }
                } else {
                    self.sg_mut(seg).state = ShapeState::Done;
                    self.seg_fire_done(seg);
                }
                self.add_seg(next)?;
                self.seg_calc_features(next);
                if self.cfg.debug {
                    let snap = self.seg_snap(next);
                    debug!(
                        "new seg ({}, {:.3}) ({}, {:.3})",
                        snap.start.bar_id, snap.start.price, snap.end.bar_id, snap.end.price
                    );
                }
                seg = next;
            }
        }
        Ok(())
    }

    /// 从指定笔向后构建最小线段，仅用于第一个线段
    fn build_first_seg(&mut self, sk_idx: usize) -> Result<Option<SegmentId>> {
        if self.sk_seq.len() < sk_idx + 3 {
            return Ok(None);
        }
        let (mut c_start, mut c_end, mut c_dirt) = {
            let sk = self.sk(self.sk_seq[sk_idx]);
            (sk.start, sk.end, sk.dirt)
        };
        let init_idx = sk_idx;
        let mut idx = sk_idx;
        while idx + 2 < self.sk_seq.len() {
            let sk3_id = self.sk_seq[idx + 2];
            let (sk3_start, sk3_end, sk3_dirt) = {
                let sk = self.sk(sk3_id);
                (sk.start, sk.end, sk.dirt)
            };
            let start_diff = self.pt(sk3_start).price - self.pt(c_start).price;
            let end_diff = self.pt(sk3_end).price - self.pt(c_end).price;
            if start_diff * end_diff > 0.0 {
                // 第三笔相比第一笔高低都更高(低)
                if start_diff * c_dirt > 0.0 {
                    // 且方向相同，线段有效，记录特征序列
                    let seg = self.alloc_segment(c_start, None, ShapeState::Init, 0.0, None, false);
                    self.pt_mut(c_start).start_sg = Some(seg);
                    self.seg_set_end(seg, sk3_end);
                    let fea_pen = self.sk(sk3_id).prev.expect("third stroke has no prev");
                    let fea = self.stroke_feature(fea_pen);
                    self.seg_add_feature(seg, fea);
                    self.add_seg(seg)?;
                    if self.cfg.debug {
                        let snap = self.seg_snap(seg);
                        debug!(
                            "first {} seg ({}, {:.3}) ({}, {:.3})",
                            snap.dirt,
                            snap.start.bar_id,
                            snap.start.price,
                            snap.end.bar_id,
                            snap.end.price
                        );
                    }
                    return Ok(Some(seg));
                }
                // 与第一笔方向不同，第一笔不能作为线段起始
                return self.build_first_seg(init_idx + 1);
            }
            // 有包含关系，合并后继续向后看
            c_end = sk3_end;
            c_dirt = sk3_dirt;
            idx += 2;
        }
        // 所有奇数笔都有包含关系，无法构成线段
        Ok(None)
    }

    fn add_seg(&mut self, sid: SegmentId) -> Result<()> {
        if let Some(&last) = self.sg_seq.last() {
            let (last_dirt, dirt) = (self.sg(last).dirt, self.sg(sid).dirt);
            if last_dirt * dirt >= 0.0 {
                return Err(Error::BrokenAlternation(last_dirt, dirt));
            }
            self.sg_mut(last).next = Some(sid);
            self.sg_mut(sid).prev = Some(last);
        }
        self.sg_seq.push(sid);
        self.fire_seg(sid, EventKind::New);
        Ok(())
    }

    /// 修改线段终点
    ///
    /// 线段笔数达到阈值后，回看每隔一笔的起点，如有突破线段起点的，
    /// 将起点移到两线段的交界点并重算前后两段的特征序列。
    pub(crate) fn seg_set_end(&mut self, sid: SegmentId, pid: PartingId) {
        if let Some(old_end) = self.sg(sid).end {
            if self.pt(old_end).end_sg == Some(sid) {
                self.pt_mut(old_end).end_sg = None;
            }
        }
        if self.cfg.debug {
            let p = self.pt(pid);
            debug!("set seg end: ({}, {:.3})", p.bar_id, p.price);
        }
        self.sg_mut(sid).end = Some(pid);
        self.pt_mut(pid).end_sg = Some(sid);
        self.sg_mut(sid).state = ShapeState::Valid;
        if self.sg(sid).dirt == 0.0 {
            let dirt = if self.pt(pid).price > self.pt(self.sg(sid).start).price {
                1.0
            } else {
                -1.0
            };
            self.sg_mut(sid).dirt = dirt;
        }
        self.fire_seg_changed(sid);
        if self.sg(sid).prev.is_none() {
            return;
        }
        let start = self.sg(sid).start;
        let mut pen = self.pt(pid).end_sk.expect("segment end has no end stroke");
        let mut pens = vec![pen];
        while self.sk(pen).start != start {
            match self.sk(pen).prev {
                Some(p) => {
                    pen = p;
                    pens.push(pen);
                }
                None => break,
            }
        }
        if pens.len() >= self.cfg.seg_review_strokes {
            let dirt = self.sg(sid).dirt;
            let ent_price = self.pt(start).price;
            let mut cmp_val = 0.0;
            let mut cmp_point: Option<PartingId> = None;
            let mut i = 2;
            while i < pens.len() - 1 {
                let pen_start = self.sk(pens[i]).start;
                let cur_diff = (self.pt(pen_start).price - ent_price) * dirt;
                if cur_diff < cmp_val {
                    // 发现更高(低)的点，改为两线段的交界点
                    cmp_val = cur_diff;
                    cmp_point = Some(pen_start);
                }
                i += 2;
            }
            if let Some(cp) = cmp_point {
                if self.pt(start).start_sg == Some(sid) {
                    self.pt_mut(start).start_sg = None;
                }
                self.sg_mut(sid).start = cp;
                self.pt_mut(cp).start_sg = Some(sid);
                let prev = self.sg(sid).prev.expect("relocation requires prev segment");
                self.seg_set_end(prev, cp);
                self.seg_calc_features(prev);
                self.seg_calc_features(sid);
            }
        }
    }

    /// 重算线段的全部特征序列，线段端点变动时调用
    pub(crate) fn seg_calc_features(&mut self, sid: SegmentId) {
        let start = self.sg(sid).start;
        let first_sk = self.pt(start).start_sk.expect("segment start has no start stroke");
        let second = self.sk(first_sk).next.expect("segment has no second stroke");
        let first_fea = self.stroke_feature(second);
        self.sg_mut(sid).feas = vec![first_fea];
        let dirt = self.sg(sid).dirt;
        let temp = self.sg(sid).temp;
        let mut fea_pen = self.sk(second).next.and_then(|n| self.sk(n).next);
        while let Some(fp) = fea_pen {
            let next = match self.sk(fp).next {
                Some(n) => n,
                None => break,
            };
            if self.sk(next).state < ShapeState::Done {
                break;
            }
            let last_fea = *self.sg(sid).feas.last().expect("feature sequence is empty");
            let fea2 = self.stroke_feature(fp);
            fea_pen = self.sk(next).next;
            let start_diff = fea2[0] - last_fea[0];
            let end_diff = fea2[1] - last_fea[1];
            if start_diff * end_diff > 0.0 && start_diff * dirt > 0.0 {
                // 高低点都向线段方向推进，延续线段
                self.seg_add_feature(sid, fea2);
                continue;
            }
            // 包含或方向不一致，按线段方向更新最后一个特征序列
            if temp {
                self.seg_set_last_fea(sid, fea2);
            } else {
                self.seg_set_last_fea(sid, merge_fea(dirt, last_fea, fea2));
            }
        }
        if self.cfg.debug {
            debug!("seg features recalculated, {} entries", self.sg(sid).feas.len());
        }
    }

    fn seg_add_feature(&mut self, sid: SegmentId, fea: [f64; 2]) {
        self.sg_mut(sid).feas.push(fea);
        self.seg_check_in_force(sid);
    }

    fn seg_set_last_fea(&mut self, sid: SegmentId, fea: [f64; 2]) {
        *self
            .sg_mut(sid)
            .feas
            .last_mut()
            .expect("feature sequence is empty") = fea;
        self.seg_check_in_force(sid);
    }

    /// 要求分型确认的线段，特征序列再次出现缺口时解除该要求
    fn seg_check_in_force(&mut self, sid: SegmentId) {
        let clear = {
            let sg = self.sg(sid);
            sg.in_force
                && sg.feas.len() > 1
                && intersect(sg.feas[sg.feas.len() - 2], sg.feas[sg.feas.len() - 1]) == 0.0
        };
        if clear {
            self.sg_mut(sid).in_force = false;
        }
    }

    /// 假设线段的有效性检验：终点须超出最后一个特征序列区间
    fn seg_is_valid(&self, sid: SegmentId) -> bool {
        let sg = self.sg(sid);
        if !sg.temp {
            return true;
        }
        let fea = match sg.feas.last() {
            Some(f) => *f,
            None => return false,
        };
        let end_price = self.pt(self.seg_end(sid)).price;
        if sg.dirt > 0.0 {
            end_price > fea[1]
        } else {
            end_price < fea[0]
        }
    }

    /// 将最后一个线段合并回前一线段
    fn merge_seg_to_prev(&mut self, sid: SegmentId, end_pid: PartingId) -> SegmentId {
        let prev = self.sg(sid).prev.expect("first segment cannot merge back");
        self.seg_set_end(prev, end_pid);
        self.seg_calc_features(prev);
        self.remove_segment(sid);
        prev
    }

    /// 删除一个线段，解除端点引用并修复前后链接
    pub(crate) fn remove_segment(&mut self, sid: SegmentId) {
        if self.cfg.debug {
            let snap = self.seg_snap(sid);
            debug!(
                "remove seg ({}, {:.3}) ({}, {:.3})",
                snap.start.bar_id, snap.start.price, snap.end.bar_id, snap.end.price
            );
        }
        let snap = self.seg_snap(sid);
        let (start, end, prev, next) = {
            let sg = self.sg(sid);
            (sg.start, sg.end, sg.prev, sg.next)
        };
        if self.pt(start).start_sg == Some(sid) {
            self.pt_mut(start).start_sg = None;
        }
        if let Some(end) = end {
            if self.pt(end).end_sg == Some(sid) {
                self.pt_mut(end).end_sg = None;
            }
        }
        if let Some(p) = prev {
            self.sg_mut(p).next = next;
        }
        if let Some(n) = next {
            self.sg_mut(n).prev = prev;
        }
        self.sg_seq.retain(|&x| x != sid);
        self.sgs[sid.0] = None;
        self.emit(crate::GraphEvent::Segment(EventKind::Removed, snap));
    }
}

fn sorted_pair(a: f64, b: f64) -> [f64; 2] {
    if a > b {
        [b, a]
    } else {
        [a, b]
    }
}

#[cfg(test)]
mod tests {
    use crate::{Graph, ShapeState};

    fn seg_bounds(g: &Graph) -> Vec<(usize, f64)> {
        let segs = g.segments();
        let mut res = Vec::new();
        if let Some(first) = segs.first() {
            res.push((first.start.bar_id, first.start.price));
        }
        for s in &segs {
            res.push((s.end.bar_id, s.end.price));
        }
        res
    }

    #[test]
    fn test_three_strokes_form_one_segment() {
        let mut g = Graph::default();
        g.load_strokes(1, &[10.0, 30.0, 20.0, 40.0]).unwrap();
        let segs = g.segments();
        assert_eq!(1, segs.len());
        assert_eq!((1, 10.0), (segs[0].start.bar_id, segs[0].start.price));
        assert_eq!((4, 40.0), (segs[0].end.bar_id, segs[0].end.price));
        assert_eq!(ShapeState::Valid, segs[0].state);
        assert_eq!(1.0, segs[0].dirt);
        assert_eq!(vec![[20.0, 30.0]], g.segment_features(segs[0].id).unwrap());
    }

    #[test]
    fn test_gap_forces_fractal_confirmation() {
        let mut g = Graph::default();
        let pens = [
            10.0, 30.0, 20.0, 50.0, 40.0, 60.0, 55.0, 150.0, 110.0, 130.0, 105.0, 120.0, 108.0,
            118.0, 80.0, 127.0, 105.0, 130.0, 104.0, 160.0, 155.0, 180.0, 150.0,
        ];
        g.load_strokes(1, &pens).unwrap();
        assert_eq!(
            vec![(1, 10.0), (8, 150.0), (15, 80.0), (22, 180.0)],
            seg_bounds(&g)
        );
        let segs = g.segments();
        assert_eq!(ShapeState::Valid, segs[0].state);
        // 中间的下降段由缺口开启，须顶底分型确认，完成后仍保留该标记
        assert_eq!(ShapeState::Done, segs[1].state);
        assert!(segs[1].in_force);
        assert_eq!(ShapeState::Valid, segs[2].state);
        assert_eq!(
            vec![[20.0, 30.0], [40.0, 50.0], [55.0, 60.0]],
            g.segment_features(segs[0].id).unwrap()
        );
        assert_eq!(
            vec![[110.0, 130.0], [105.0, 118.0]],
            g.segment_features(segs[1].id).unwrap()
        );
        assert_eq!(
            vec![[105.0, 130.0], [155.0, 160.0]],
            g.segment_features(segs[2].id).unwrap()
        );
    }

    #[test]
    fn test_long_decline_single_segment() {
        let mut g = Graph::default();
        let pens = [
            100.0, 95.0, 110.0, 90.0, 112.0, 60.0, 70.0, 63.0, 80.0, 63.0, 72.0, 20.0, 30.0, 10.0,
            27.0, 11.0, 25.0, 5.0,
        ];
        g.load_strokes(1, &pens).unwrap();
        assert_eq!(vec![(1, 100.0), (18, 5.0)], seg_bounds(&g));
        let segs = g.segments();
        assert_eq!(-1.0, segs[0].dirt);
        assert_eq!(
            vec![[63.0, 72.0], [20.0, 30.0], [10.0, 25.0]],
            g.segment_features(segs[0].id).unwrap()
        );
    }

    #[test]
    fn test_open_tail_keeps_recorded_start() {
        // 长序列结尾尚未确认，首段起点保持不变，末段保持未完成
        let mut g = Graph::default();
        let pens = [
            3670.0, 3691.0, 3684.0, 3715.0, 3684.0, 3711.0, 3695.0, 3710.0, 3642.0, 3715.0,
            3651.0, 3679.0, 3501.0, 3543.0, 3523.0, 3547.0, 3427.0, 3498.0, 3489.0, 3510.0,
            3462.0, 3657.0, 3512.0, 3574.0, 3476.0, 3515.0, 3472.0, 3541.0, 3426.0, 3492.0,
            3461.0, 3529.0, 3361.0, 3529.0, 3472.0, 3557.0,
        ];
        g.load_strokes(1, &pens).unwrap();
        assert_eq!(
            vec![(1, 3670.0), (4, 3715.0), (33, 3361.0), (36, 3557.0)],
            seg_bounds(&g)
        );
        let segs = g.segments();
        assert_eq!(ShapeState::Done, segs[0].state);
        // 中间长下降段为假设分段，经过起点回看修正，终点落在极值处
        assert!(segs[1].temp);
        assert_eq!(ShapeState::Valid, segs[1].state);
        assert_eq!(ShapeState::Valid, segs[2].state);
    }

    #[test]
    fn test_tentative_segment_revalidated() {
        let mut g = Graph::default();
        let pens = [
            50.0, 40.0, 48.0, 35.0, 70.0, 40.0, 50.0, 45.0, 65.0, 35.0, 43.0, 10.0,
        ];
        g.load_strokes(1, &pens).unwrap();
        assert_eq!(
            vec![(1, 50.0), (4, 35.0), (9, 65.0), (12, 10.0)],
            seg_bounds(&g)
        );
        let segs = g.segments();
        assert!(segs[1].temp);
        assert_eq!(ShapeState::Done, segs[1].state);
    }

    #[test]
    fn test_in_force_cleared_by_second_gap() {
        let mut g = Graph::default();
        let pens = [
            100.0, 50.0, 70.0, 45.0, 60.0, 25.0, 55.0, 24.0, 40.0, 24.0, 45.0, 10.0, 23.0, 15.0,
            31.0, 25.0, 63.0, 43.0, 53.0, 40.0, 75.0, 45.0, 105.0, 85.0, 100.0, 60.0, 70.0, 67.0,
            98.0, 75.0,
        ];
        g.load_strokes(1, &pens).unwrap();
        assert_eq!(
            vec![(1, 100.0), (12, 10.0), (23, 105.0), (26, 60.0), (29, 98.0)],
            seg_bounds(&g)
        );
        // 第二段以缺口开启但随后特征序列再现缺口，分型确认要求解除
        let segs = g.segments();
        assert!(!segs[1].in_force);
        assert!(segs[2].in_force);
    }
}
