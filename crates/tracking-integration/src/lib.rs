//! # 责任追踪集成模块
//!
//! 提供与外部FHIR服务器的集成功能，包括：
//! - FHIR资源解析：结果、申请单、医生、组织和执业角色
//! - 追踪记录与 Task 资源的相互映射
//! - FHIR连接器：实现临床数据源和追踪记录存储接口

pub mod connectors;
pub mod fhir;

pub use connectors::{AuthenticationConfig, FhirConfig, FhirConnector};
