//! 分型点识别
//!
//! 从解析游标处逐根扫描K线，识别顶底分型候选点：
//! 同向候选仅保留更极端的一个，逆向候选必须完全突破上个点所在
//! K线的中价才有效，距离不足最少笔长的逆向候选按幅度决定是否
//! 吞并上一笔，避免极值点丢失。

use crate::shape::{PartingId, ShapeState};
use crate::Graph;
use crate::Result;
use chrono::NaiveDateTime;
use log::debug;

impl Graph {
    /// 解析全部未扫描K线，识别分型点并逐层驱动笔、线段、中枢
    pub(crate) fn parse(&mut self) -> Result<()> {
        if self.bars.len() < 3 {
            return Ok(());
        }
        let (mut pv, mut pv2) = if let Some(&last) = self.sk_seq.last() {
            let sk = self.sk(last);
            (Some(sk.end), Some(sk.start))
        } else {
            (self.last_pt, None)
        };
        let mut st_price = self.bars[0].close;
        let mut gap_price = 0.0;
        if let Some(pid) = pv {
            let (price, bar_id) = {
                let p = self.pt(pid);
                (p.price, p.bar_id)
            };
            st_price = price;
            gap_price = self.mid_price(bar_id);
        }
        if self.parse_to == 0 {
            // 从第二根开始处理，需要前一根K线
            self.parse_to = 1;
        }
        while self.parse_to + 1 < self.bar_num {
            let n = self.parse_to + 1;
            self.parse_to = n;
            let (pb, cb, nb) = (*self.bar(n - 1), *self.bar(n), *self.bar(n + 1));
            let (vhigh, vlow) = (cb.high, cb.low);
            // 处理一根特别长的K线包含前面许多K线的情况，
            // 以距离上个参考价的上下幅度确定取高还是取低
            let is_up = vhigh > st_price && vhigh - st_price >= st_price - vlow;
            let (pt_dirt, pt_price) = if is_up && vhigh > pb.high.max(nb.high) {
                (1.0, vhigh)
            } else if !is_up && vlow < pb.low.min(nb.low) {
                (-1.0, vlow)
            } else {
                continue;
            };
            let pt_bar = n;
            if let Some(pv_id) = pv {
                let (pv_dirt, pv_price, pv_bar) = {
                    let p = self.pt(pv_id);
                    (p.dirt, p.price, p.bar_id)
                };
                if pv_dirt * pt_dirt > 0.0 {
                    // 多个连续同方向的分型，只保留最极端的一个
                    if (pt_price - pv_price) * pv_dirt > 0.0 {
                        self.move_point(pv_id, pt_bar, pt_price);
                        st_price = pt_price;
                        gap_price = self.mid_price(pt_bar);
                    }
                    continue;
                } else if pt_dirt < 0.0 && cb.high > gap_price
                    || pt_dirt > 0.0 && cb.low < gap_price
                {
                    // 未完全突破上个点的中价，不是有效的逆向点
                    continue;
                } else if pt_bar - pv_bar < self.cfg.min_stroke_len - 1 {
                    // K线数不足，不能构成笔
                    if let Some(pv2_id) = pv2 {
                        let pv2_price = self.pt(pv2_id).price;
                        if (pt_price - pv2_price).abs() > (pv_price - pv2_price).abs() {
                            // 当前点变化幅度超过上一笔，删除上一笔并将
                            // 倒数第二个点移到当前，避免极值点丢失
                            let end_sk =
                                self.pt(pv_id).end_sk.expect("last point has no end stroke");
                            self.remove_stroke(end_sk);
                            self.move_point(pv2_id, pt_bar, pt_price);
                            pv = Some(pv2_id);
                            pv2 = self.pt(pv2_id).end_sk.map(|sk| self.sk(sk).start);
                            st_price = pt_price;
                            gap_price = self.mid_price(pt_bar);
                        }
                    }
                    continue;
                }
            }
            if self.cfg.debug {
                debug!(
                    "[{}] point ({}, {:.3}), up: {}",
                    fmt_bar_time(cb.time),
                    pt_bar,
                    pt_price,
                    is_up
                );
            }
            let pt_id = self.alloc_point(pt_dirt, pt_bar, pt_price);
            if let Some(pv_id) = pv {
                let sk = self.stroke_between(pv_id, pt_id);
                self.add_stroke(sk)?;
            }
            pv2 = pv;
            pv = Some(pt_id);
            st_price = pt_price;
            gap_price = cb.low * 0.5 + cb.high * 0.5;
        }
        self.last_pt = pv;
        Ok(())
    }

    /// 点的压力或支撑中价，新的逆向点必须完全突破此价
    fn mid_price(&self, bar_id: usize) -> f64 {
        let b = self.bar(bar_id);
        b.low * 0.5 + b.high * 0.5
    }

    /// 移动一个分型点到更极端的位置
    ///
    /// 移动越过出发笔或线段的终点时，该笔或线段被删除；
    /// 作为线段终点的移动会触发特征序列重算。
    pub(crate) fn move_point(&mut self, pid: PartingId, bar_id: usize, price: f64) {
        let (old_bar, old_price) = {
            let p = self.pt(pid);
            (p.bar_id, p.price)
        };
        if old_bar == bar_id && old_price == price {
            return;
        }
        if self.cfg.debug {
            debug!(
                "point move ({}, {:.3}) -> ({}, {:.3})",
                old_bar, old_price, bar_id, price
            );
        }
        if let Some(sk_id) = self.pt(pid).start_sk {
            let end_bar = self.pt(self.sk(sk_id).end).bar_id;
            if bar_id >= end_bar {
                self.remove_stroke(sk_id);
            }
        }
        if let Some(sg_id) = self.pt(pid).start_sg {
            let end_bar = self.pt(self.seg_end(sg_id)).bar_id;
            if bar_id >= end_bar {
                self.remove_segment(sg_id);
            }
        }
        if let Some(tr_id) = self.pt(pid).start_tr {
            self.remove_trend(tr_id);
        }
        {
            let p = self.pt_mut(pid);
            p.bar_id = bar_id;
            p.price = price;
        }
        if let Some(sg_id) = self.pt(pid).end_sg {
            self.seg_calc_features(sg_id);
            self.fire_seg_changed(sg_id);
        }
        self.fire_point_changed(pid);
        if let Some(sk_id) = self.pt(pid).end_sk {
            self.fire_stroke_changed(sk_id);
        }
    }

    /// 分型点的衍生状态
    ///
    /// 存在后继点即有效；否则游标须离开足够远且最新K线未再突破
    /// 其极值。返回`None`表示句柄已失效。
    pub fn point_state(&self, pid: PartingId) -> Option<ShapeState> {
        let p = self.pts.get(pid.0)?.as_ref()?;
        if p.next.is_some() {
            return Some(ShapeState::Done);
        }
        if self.parse_to < p.bar_id + self.cfg.min_stroke_len - 1 {
            return Some(ShapeState::Init);
        }
        let last_b = match self.bars.get(self.parse_to - 1) {
            Some(b) => b,
            None => return Some(ShapeState::Init),
        };
        if p.dirt > 0.0 && last_b.high < p.price {
            // 顶分型，最新价格低于最高价，有效
            return Some(ShapeState::Done);
        }
        if p.dirt < 0.0 && last_b.low > p.price {
            return Some(ShapeState::Done);
        }
        // 中继分型，无效
        Some(ShapeState::Init)
    }
}

fn fmt_bar_time(ms: i64) -> String {
    NaiveDateTime::from_timestamp_opt(ms / 1000, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}
