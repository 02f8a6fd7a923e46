/// 工具模块，包含错误处理、配置管理等通用功能

/// 统一错误处理模块
pub mod error;

/// 配置管理模块
pub mod config;

/// 寄存器数值编解码模块
pub mod value_codec;

// 重新导出常用类型，方便使用
pub use config::{
    AngleCalculationConfig, AppConfig, AppSettings, ConfigManager, LoggingConfig,
    ModbusTcpConfig, ActuatorRtuConfig, RegisterMapConfig, TimingConfig,
};
pub use error::{AppError, AppResult};
