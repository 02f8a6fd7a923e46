/// 领域层服务模块
/// 包含状态机、设备协调器、工作流编排器与指令处理器

/// 系统状态机模块
pub mod state_machine;

/// 视觉检测协调器模块
pub mod vision_coordinator;

/// 执行器协调器模块
pub mod actuator_coordinator;

/// 角度校正工作流编排器模块
pub mod correction_workflow;

/// 指令处理器模块（含自动清零）
pub mod command_processor;

pub use actuator_coordinator::ActuatorCoordinator;
pub use command_processor::CommandProcessor;
pub use correction_workflow::CorrectionWorkflow;
pub use state_machine::SystemStateMachine;
pub use vision_coordinator::VisionCoordinator;
