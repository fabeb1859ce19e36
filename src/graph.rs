//! 结构图
//!
//! 缠论的主要构件：笔、线段、中枢、走势。
//! 不同品种的不同周期对笔和线段适用不一，
//! 有些指数行情1分钟上可以用线段，但很多个股5分钟都不适用线段。
//!
//! 各层实现进度：
//! * 笔：和原文略有不同，兼容一根极大K线包含几十根K线的情况
//! * 线段：和原文略有不同，向后看最多若干笔确定线段完成点
//! * 中枢：只按最基本方法实现
//! * 走势：未实现
//!
//! 图持有全部实体池并独占修改权。单层的修改可能级联删除其余各层，
//! 解析过程中图处于不一致状态，读取方须在两根K线之间取快照，
//! 或以外部互斥保证一根K线解析的原子性。历史结构不做裁剪。

use crate::shape::{
    Center, CenterId, DrawLine, Kline, Parting, PartingId, Segment, SegmentId, ShapeState, Stroke,
    StrokeId, Trend, TrendId, ValuePoint,
};
use crate::stream::{
    CenterSnap, EventKind, GraphEvent, GraphListener, PointSnap, SegmentSnap, StrokeSnap,
};
use crate::{Error, Result};

/// 图配置
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// 构成一笔的最少K线数
    pub min_stroke_len: usize,
    /// 线段笔数达到该值后，回看检查线段起点是否应内移
    pub seg_review_strokes: usize,
    /// 打印结构变更日志
    pub debug: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            min_stroke_len: 5,
            seg_review_strokes: 7,
            debug: false,
        }
    }
}

/// 缠论结构图
///
/// 逐根输入K线，增量维护分型点、笔、线段与中枢。
pub struct Graph {
    pub(crate) cfg: GraphConfig,
    pub(crate) bars: Vec<Kline>,
    /// 最后一根K线的序号，从1开始
    pub(crate) bar_num: usize,
    /// 解析到的K线序号
    pub(crate) parse_to: usize,
    pub(crate) pts: Vec<Option<Parting>>,
    pub(crate) sks: Vec<Option<Stroke>>,
    pub(crate) sgs: Vec<Option<Segment>>,
    pub(crate) cens: Vec<Option<Center>>,
    pub(crate) trs: Vec<Option<Trend>>,
    pub(crate) sk_seq: Vec<StrokeId>,
    pub(crate) sg_seq: Vec<SegmentId>,
    pub(crate) cen_seq: Vec<CenterId>,
    pub(crate) tr_seq: Vec<TrendId>,
    /// 最新一个点，用于从最新笔之后继续扫描
    pub(crate) last_pt: Option<PartingId>,
    listener: Option<Box<dyn GraphListener>>,
    poisoned: bool,
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new(GraphConfig::default())
    }
}

impl Graph {
    pub fn new(cfg: GraphConfig) -> Self {
        Graph {
            cfg,
            bars: Vec::new(),
            bar_num: 0,
            parse_to: 0,
            pts: Vec::new(),
            sks: Vec::new(),
            sgs: Vec::new(),
            cens: Vec::new(),
            trs: Vec::new(),
            sk_seq: Vec::new(),
            sg_seq: Vec::new(),
            cen_seq: Vec::new(),
            tr_seq: Vec::new(),
            last_pt: None,
            listener: None,
            poisoned: false,
        }
    }

    /// 设置事件监听器，覆盖已有监听器
    pub fn set_listener<L: GraphListener + 'static>(&mut self, listener: L) {
        self.listener = Some(Box::new(listener));
    }

    /// 追加一根K线并解析，序号为当前最后序号加一
    pub fn add_bar(&mut self, k: Kline) -> Result<()> {
        self.check_poisoned()?;
        self.bars.push(k);
        self.bar_num += 1;
        self.run_parse()
    }

    /// 批量追加K线并解析
    ///
    /// `bar_id`为首根K线的序号，必须与已有K线连续，首次必须为1。
    pub fn add_bars(&mut self, bar_id: usize, ks: &[Kline]) -> Result<()> {
        self.check_poisoned()?;
        let expect = self.bar_num + 1;
        if bar_id != expect {
            return Err(Error::BarDiscontinuity {
                expect,
                got: bar_id,
            });
        }
        self.bars.extend_from_slice(ks);
        self.bar_num += ks.len();
        self.run_parse()
    }

    /// 以已确认的笔端点预载结构
    ///
    /// 端点价格须严格交替构成笔，生成的笔全部为完成状态，
    /// 用于从持久化的笔历史热启动。端点序号从`start_bar_id`起逐一递增。
    pub fn load_strokes(&mut self, start_bar_id: usize, prices: &[f64]) -> Result<()> {
        self.check_poisoned()?;
        if prices.len() < 2 {
            return Err(Error::InvalidSeed(
                "at least two endpoints required".to_string(),
            ));
        }
        let mut dirt = if prices[1] < prices[0] { 1.0 } else { -1.0 };
        let mut pv: Option<PartingId> = None;
        for (i, &price) in prices.iter().enumerate() {
            let pid = self.alloc_point(dirt, start_bar_id + i, price);
            if let Some(prev) = pv {
                let sk = self.stroke_between(prev, pid);
                self.sk_mut(sk).state = ShapeState::Done;
                let r = self.add_stroke(sk);
                if r.is_err() {
                    self.poisoned = true;
                    return r;
                }
            }
            pv = Some(pid);
            self.last_pt = Some(pid);
            dirt = -dirt;
        }
        Ok(())
    }

    /// 导出绘图线条：每个线段一条线，每个中枢上下沿各一条线
    pub fn dump(&self) -> Vec<DrawLine> {
        let mut res = Vec::new();
        for &sid in &self.sg_seq {
            let start = self.pt(self.sg(sid).start);
            let end = self.pt(self.seg_end(sid));
            res.push(DrawLine {
                start_pos: start.bar_id,
                start_price: start.price,
                stop_pos: end.bar_id,
                stop_price: end.price,
            });
        }
        for &cid in &self.cen_seq {
            let cen = self.cen(cid);
            let (start, stop) = (self.pt(cen.start).bar_id, self.pt(cen.end).bar_id);
            let (top, btm) = (cen.overlap[1], cen.overlap[0]);
            res.push(DrawLine {
                start_pos: start,
                start_price: top,
                stop_pos: stop,
                stop_price: top,
            });
            res.push(DrawLine {
                start_pos: start,
                start_price: btm,
                stop_pos: stop,
                stop_price: btm,
            });
        }
        res
    }

    /// 清空全部结构与K线，保留配置与监听器
    pub fn reset(&mut self) {
        self.bars.clear();
        self.bar_num = 0;
        self.parse_to = 0;
        self.pts.clear();
        self.sks.clear();
        self.sgs.clear();
        self.cens.clear();
        self.trs.clear();
        self.sk_seq.clear();
        self.sg_seq.clear();
        self.cen_seq.clear();
        self.tr_seq.clear();
        self.last_pt = None;
        self.poisoned = false;
    }

    pub fn bar_num(&self) -> usize {
        self.bar_num
    }

    pub fn poisoned(&self) -> bool {
        self.poisoned
    }

    /// 全部笔的快照，按时间顺序
    pub fn strokes(&self) -> Vec<StrokeSnap> {
        self.sk_seq.iter().map(|&id| self.stroke_snap(id)).collect()
    }

    /// 全部线段的快照，按时间顺序
    pub fn segments(&self) -> Vec<SegmentSnap> {
        self.sg_seq.iter().map(|&id| self.seg_snap(id)).collect()
    }

    /// 全部中枢的快照，按时间顺序
    pub fn centers(&self) -> Vec<CenterSnap> {
        self.cen_seq.iter().map(|&id| self.center_snap(id)).collect()
    }

    /// 线段的特征序列
    pub fn segment_features(&self, id: SegmentId) -> Option<Vec<[f64; 2]>> {
        self.sgs.get(id.0).and_then(|s| s.as_ref()).map(|s| s.feas.clone())
    }

    fn run_parse(&mut self) -> Result<()> {
        let r = self.parse();
        if r.is_err() {
            self.poisoned = true;
        }
        r
    }

    pub(crate) fn check_poisoned(&self) -> Result<()> {
        if self.poisoned {
            return Err(Error::Poisoned);
        }
        Ok(())
    }

    /// 返回指定序号的K线
    pub(crate) fn bar(&self, v: usize) -> &Kline {
        &self.bars[v - 1]
    }

    pub(crate) fn pt(&self, id: PartingId) -> &Parting {
        self.pts[id.0].as_ref().expect("parting slot already freed")
    }

    pub(crate) fn pt_mut(&mut self, id: PartingId) -> &mut Parting {
        self.pts[id.0].as_mut().expect("parting slot already freed")
    }

    pub(crate) fn sk(&self, id: StrokeId) -> &Stroke {
        self.sks[id.0].as_ref().expect("stroke slot already freed")
    }

    pub(crate) fn sk_mut(&mut self, id: StrokeId) -> &mut Stroke {
        self.sks[id.0].as_mut().expect("stroke slot already freed")
    }

    pub(crate) fn sg(&self, id: SegmentId) -> &Segment {
        self.sgs[id.0].as_ref().expect("segment slot already freed")
    }

    pub(crate) fn sg_mut(&mut self, id: SegmentId) -> &mut Segment {
        self.sgs[id.0].as_mut().expect("segment slot already freed")
    }

    pub(crate) fn cen(&self, id: CenterId) -> &Center {
        self.cens[id.0].as_ref().expect("center slot already freed")
    }

    pub(crate) fn cen_mut(&mut self, id: CenterId) -> &mut Center {
        self.cens[id.0].as_mut().expect("center slot already freed")
    }

    pub(crate) fn seg_end(&self, id: SegmentId) -> PartingId {
        self.sg(id).end.expect("segment end not set")
    }

    pub(crate) fn alloc_point(&mut self, dirt: f64, bar_id: usize, price: f64) -> PartingId {
        let id = PartingId(self.pts.len());
        self.pts.push(Some(Parting {
            dirt,
            bar_id,
            price,
            rev: 0,
            start_sk: None,
            end_sk: None,
            start_sg: None,
            end_sg: None,
            start_tr: None,
            end_tr: None,
            next: None,
        }));
        id
    }

    /// 在两点之间建立一笔并挂接端点引用
    pub(crate) fn stroke_between(&mut self, start: PartingId, end: PartingId) -> StrokeId {
        let dirt = if self.pt(start).price < self.pt(end).price {
            1.0
        } else {
            -1.0
        };
        let id = StrokeId(self.sks.len());
        self.sks.push(Some(Stroke {
            start,
            end,
            dirt,
            state: ShapeState::Init,
            rev: 0,
            prev: None,
            next: None,
        }));
        self.pt_mut(start).start_sk = Some(id);
        self.pt_mut(start).next = Some(end);
        self.pt_mut(end).end_sk = Some(id);
        id
    }

    pub(crate) fn alloc_segment(
        &mut self,
        start: PartingId,
        end: Option<PartingId>,
        state: ShapeState,
        dirt: f64,
        prev: Option<SegmentId>,
        temp: bool,
    ) -> SegmentId {
        let id = SegmentId(self.sgs.len());
        self.sgs.push(Some(Segment {
            start,
            end,
            dirt,
            state,
            feas: Vec::new(),
            in_force: false,
            temp,
            rev: 0,
            prev,
            next: None,
            centre: None,
        }));
        id
    }

    pub(crate) fn alloc_center(
        &mut self,
        start: PartingId,
        end: PartingId,
        overlap: [f64; 2],
        range: [f64; 2],
        dirt: f64,
    ) -> CenterId {
        let id = CenterId(self.cens.len());
        self.cens.push(Some(Center {
            start,
            end,
            overlap,
            range,
            dirt,
            rev: 0,
        }));
        id
    }

    /// 点已无任何结构引用时释放其槽位
    pub(crate) fn maybe_free_point(&mut self, pid: PartingId) {
        if self.last_pt == Some(pid) {
            return;
        }
        let free = {
            let p = self.pt(pid);
            p.start_sk.is_none()
                && p.end_sk.is_none()
                && p.start_sg.is_none()
                && p.end_sg.is_none()
                && p.start_tr.is_none()
                && p.end_tr.is_none()
        };
        if free {
            self.pts[pid.0] = None;
        }
    }

    pub(crate) fn remove_trend(&mut self, tid: TrendId) {
        let (start, end, prev, next) = {
            let t = self.trs[tid.0].as_ref().expect("trend slot already freed");
            (t.start, t.end, t.prev, t.next)
        };
        if self.pt(start).start_tr == Some(tid) {
            self.pt_mut(start).start_tr = None;
        }
        if self.pt(end).end_tr == Some(tid) {
            self.pt_mut(end).end_tr = None;
        }
        if let Some(p) = prev {
            self.trs[p.0].as_mut().expect("trend slot already freed").next = next;
        }
        if let Some(n) = next {
            self.trs[n.0].as_mut().expect("trend slot already freed").prev = prev;
        }
        self.tr_seq.retain(|&x| x != tid);
        self.trs[tid.0] = None;
    }

    pub(crate) fn point_snap(&self, id: PartingId) -> PointSnap {
        let p = self.pt(id);
        PointSnap {
            id,
            dirt: p.dirt,
            bar_id: p.bar_id,
            price: p.price,
            rev: p.rev,
        }
    }

    pub(crate) fn stroke_snap(&self, id: StrokeId) -> StrokeSnap {
        let sk = self.sk(id);
        let (start, end) = (self.pt(sk.start), self.pt(sk.end));
        StrokeSnap {
            id,
            dirt: sk.dirt,
            state: sk.state,
            start: ValuePoint {
                bar_id: start.bar_id,
                price: start.price,
            },
            end: ValuePoint {
                bar_id: end.bar_id,
                price: end.price,
            },
            rev: sk.rev,
        }
    }

    pub(crate) fn seg_snap(&self, id: SegmentId) -> SegmentSnap {
        let sg = self.sg(id);
        let (start, end) = (self.pt(sg.start), self.pt(self.seg_end(id)));
        SegmentSnap {
            id,
            dirt: sg.dirt,
            state: sg.state,
            start: ValuePoint {
                bar_id: start.bar_id,
                price: start.price,
            },
            end: ValuePoint {
                bar_id: end.bar_id,
                price: end.price,
            },
            in_force: sg.in_force,
            temp: sg.temp,
            rev: sg.rev,
        }
    }

    pub(crate) fn center_snap(&self, id: CenterId) -> CenterSnap {
        let cen = self.cen(id);
        let (start, end) = (self.pt(cen.start), self.pt(cen.end));
        CenterSnap {
            id,
            dirt: cen.dirt,
            start: ValuePoint {
                bar_id: start.bar_id,
                price: start.price,
            },
            end: ValuePoint {
                bar_id: end.bar_id,
                price: end.price,
            },
            overlap: cen.overlap,
            range: cen.range,
            rev: cen.rev,
        }
    }

    pub(crate) fn emit(&mut self, event: GraphEvent) {
        if let Some(listener) = self.listener.as_mut() {
            listener.on_event(&event);
        }
    }

    pub(crate) fn fire_point(&mut self, id: PartingId, kind: EventKind) {
        if self.listener.is_none() {
            return;
        }
        let snap = self.point_snap(id);
        self.emit(GraphEvent::Point(kind, snap));
    }

    pub(crate) fn fire_point_changed(&mut self, id: PartingId) {
        self.pt_mut(id).rev += 1;
        self.fire_point(id, EventKind::Changed);
    }

    pub(crate) fn fire_stroke(&mut self, id: StrokeId, kind: EventKind) {
        if self.listener.is_none() {
            return;
        }
        let snap = self.stroke_snap(id);
        self.emit(GraphEvent::Stroke(kind, snap));
    }

    pub(crate) fn fire_stroke_changed(&mut self, id: StrokeId) {
        self.sk_mut(id).rev += 1;
        self.fire_stroke(id, EventKind::Changed);
    }

    pub(crate) fn fire_seg(&mut self, id: SegmentId, kind: EventKind) {
        if self.listener.is_none() {
            return;
        }
        let snap = self.seg_snap(id);
        self.emit(GraphEvent::Segment(kind, snap));
    }

    pub(crate) fn fire_seg_changed(&mut self, id: SegmentId) {
        self.sg_mut(id).rev += 1;
        self.fire_seg(id, EventKind::Changed);
    }

    pub(crate) fn fire_center(&mut self, id: CenterId, kind: EventKind) {
        if self.listener.is_none() {
            return;
        }
        let snap = self.center_snap(id);
        self.emit(GraphEvent::Center(kind, snap));
    }

    pub(crate) fn fire_center_changed(&mut self, id: CenterId) {
        self.cen_mut(id).rev += 1;
        self.fire_center(id, EventKind::Changed);
    }
}
