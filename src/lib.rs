//! 缠论形态增量解析
//!
//! 将K线流逐根解析为分型点、笔、线段与中枢，并以事件流同步推送
//! 各层结构的新建、修改与删除。

mod center;
mod error;
mod graph;
mod parting;
mod segment;
mod shape;
mod stream;
mod stroke;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
pub use graph::{Graph, GraphConfig};
pub use shape::*;
pub use stream::*;
