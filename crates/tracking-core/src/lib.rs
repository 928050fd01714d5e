//! # Tracking Core
//!
//! 责任追踪引擎的核心模块，提供基础数据结构、错误定义和引用解析。

pub mod error;
pub mod models;
pub mod reference;

pub use error::{Result, TrackingError};
pub use models::*;
pub use reference::{Reference, ReferenceKind};
