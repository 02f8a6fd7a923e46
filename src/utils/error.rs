use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 应用程序统一错误类型
/// 用于封装系统中可能出现的各种错误，提供统一的错误处理机制
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum AppError {
    /// 通用错误，包含错误消息
    #[error("通用错误: {message}")]
    Generic { message: String },

    /// 输入/输出错误
    #[error("IO错误: {message} (Kind: {kind})")]
    IoError { message: String, kind: String },

    /// 系统未就绪错误（前置条件不满足，未执行任何动作）
    #[error("系统未就绪: {message}")]
    NotReady { message: String },

    /// 超时错误（有界等待到期）
    #[error("操作超时: {operation} - {message}")]
    Timeout { operation: String, message: String },

    /// 通信连接错误
    ///
    /// **业务含义**: 传输层不可达，或设备返回了不完整/畸形的寄存器数据
    /// **注意**: 读取到的寄存器数量少于请求数量属于本错误，
    /// 绝不允许把缺失数据当作零值继续处理
    #[error("通信连接错误: {message}")]
    ConnectionError { message: String },

    /// 设备故障错误（设备明确报告了错误状态，区别于单纯的未完成）
    #[error("设备故障: {message}")]
    DeviceFault { message: String },

    /// 数值超出可表示范围错误
    #[error("数值超出范围: {message}")]
    OutOfRange { message: String },

    /// 系统内部错误（编排器内部的意外异常）
    #[error("系统错误: {message}")]
    SystemError { message: String },

    /// 数据序列化/反序列化错误
    #[error("序列化错误: {message}")]
    SerializationError { message: String },

    /// JSON序列化/反序列化错误
    #[error("JSON序列化/反序列化错误: {message}")]
    JsonError { message: String },

    /// 配置相关错误
    #[error("配置错误: {message}")]
    ConfigurationError { message: String },

    /// 状态转换错误
    #[error("状态转换错误: 从 {from_state} 到 {to_state} - {message}")]
    StateTransitionError {
        from_state: String,
        to_state: String,
        message: String,
    },
}

impl AppError {
    /// 创建通用错误
    pub fn generic(message: impl Into<String>) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// 创建IO错误
    pub fn io_error(message: impl Into<String>, kind_str: impl Into<String>) -> Self {
        Self::IoError {
            message: message.into(),
            kind: kind_str.into(),
        }
    }

    /// 创建系统未就绪错误
    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::NotReady {
            message: message.into(),
        }
    }

    /// 创建超时错误
    pub fn timeout(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// 创建通信连接错误
    ///
    /// **使用场景**:
    /// - Modbus连接建立失败时
    /// - 寄存器读写操作失败时
    /// - 设备返回数据不完整时
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self::ConnectionError {
            message: message.into(),
        }
    }

    /// 创建设备故障错误
    pub fn device_fault(message: impl Into<String>) -> Self {
        Self::DeviceFault {
            message: message.into(),
        }
    }

    /// 创建数值超出范围错误
    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::OutOfRange {
            message: message.into(),
        }
    }

    /// 创建系统内部错误
    pub fn system_error(message: impl Into<String>) -> Self {
        Self::SystemError {
            message: message.into(),
        }
    }

    /// 创建序列化错误
    pub fn serialization_error(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }

    /// 创建JSON错误
    pub fn json_error(message: impl Into<String>) -> Self {
        Self::JsonError {
            message: message.into(),
        }
    }

    /// 创建配置错误
    pub fn configuration_error(message: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
        }
    }

    /// 创建状态转换错误
    pub fn state_transition_error(
        from_state: impl Into<String>,
        to_state: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::StateTransitionError {
            from_state: from_state.into(),
            to_state: to_state.into(),
            message: message.into(),
        }
    }

    /// 映射为对外发布的数值错误代码
    ///
    /// ERROR_CODE寄存器的数值在版本间保持稳定，
    /// 外部控制器按数值分支，不做字符串匹配
    pub fn error_code(&self) -> u16 {
        match self {
            Self::NotReady { .. } => 1,
            Self::Timeout { .. } => 2,
            Self::ConnectionError { .. } | Self::IoError { .. } => 3,
            Self::DeviceFault { .. } => 4,
            Self::OutOfRange { .. } => 5,
            _ => 6,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::IoError {
            message: error.to_string(),
            kind: error.kind().to_string(),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::JsonError {
            message: error.to_string(),
        }
    }
}

/// 应用程序统一结果类型
pub type AppResult<T> = Result<T, AppError>;
