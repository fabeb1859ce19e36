use thiserror::Error;

/// 结构解析错误
///
/// 笔或线段方向未严格交替属于结构性错误，图实例将进入中毒状态，
/// 调用`reset`前拒绝继续接收K线。
#[derive(Debug, Error)]
pub enum Error {
    #[error("up and down must appear alternately, {0} -> {1}")]
    BrokenAlternation(f64, f64),
    #[error("graph is poisoned by a structural error, reset before feeding more bars")]
    Poisoned,
    #[error("bar id must be continuous, expect {expect}, got {got}")]
    BarDiscontinuity { expect: usize, got: usize },
    #[error("invalid stroke seed: {0}")]
    InvalidSeed(String),
}
