/// 服务层模块
/// 按基础设施/领域/应用三层组织

/// 服务层基础trait定义
pub mod traits;

/// 基础设施层服务模块
pub mod infrastructure;

/// 领域层服务模块
pub mod domain;

/// 应用层服务模块
pub mod application;

// 重新导出常用类型，方便使用
pub use application::{CorrectionClient, HandshakeService};
pub use domain::{
    ActuatorCoordinator, CommandProcessor, CorrectionWorkflow, SystemStateMachine,
    VisionCoordinator,
};
pub use infrastructure::{
    IRegisterBus, MockRegisterBus, ModbusRtuRegisterBus, ModbusTcpRegisterBus, SharedRegisterBus,
};
pub use traits::BaseService;
