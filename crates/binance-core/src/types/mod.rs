//! 크레이트 전반에서 사용되는 공통 타입.

mod interval;
mod symbol;

pub use interval::*;
pub use symbol::*;
