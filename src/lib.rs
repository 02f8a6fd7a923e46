/// 角度校正与设备协调系统 - Rust核心库
///
/// 通过共享的Modbus寄存器地址空间协调视觉检测、马达驱动与监控PLC：
/// 状态寄存器发布独立标志位，指令寄存器在确认后自动清零，
/// 32位量拆分为两个16位寄存器，固定周期轮询驱动整个交握。
pub mod models;
pub mod utils;
pub mod services;

// 重新导出常用类型，方便使用
pub use models::*;
pub use services::*;
pub use utils::{AppConfig, AppError, AppResult, ConfigManager};
