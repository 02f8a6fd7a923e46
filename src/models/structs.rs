//! # 核心结构体定义模块
//!
//! 定义工作流结果、校正数据与系统状态快照。`OperationResult`使用封闭的
//! 标签联合（和类型）表达，强制调用方显式处理每一种结果，
//! 而不是一个携带大量可空字段的结构体。

use serde::{Deserialize, Serialize};

use crate::models::enums::StatusBit;
use crate::utils::error::AppError;

/// 一次成功校正的测量输入与计算输出
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CorrectionData {
    /// 视觉检测到的原始角度（度，0.01精度）
    pub measured_angle: f64,
    /// 与目标角度的差值（带符号，度）
    pub angle_diff: f64,
    /// 计算出的执行器目标位置（设备原生单位）
    pub target_position: i32,
}

/// 一次编排工作流的结果
///
/// 每次调用创建一份，返回后不可变；只有最新一次结果保留在
/// 结果寄存器块中（新结果覆盖旧结果）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperationResult {
    /// 校正成功
    Success {
        /// 测量与计算数据
        data: CorrectionData,
        /// 执行耗时（毫秒）
        elapsed_ms: u64,
    },
    /// 执行失败（设备故障、数值超限等）
    Failed {
        /// 失败描述
        message: String,
        /// 对外发布的错误代码
        error_code: u16,
        /// 执行耗时（毫秒）
        elapsed_ms: u64,
    },
    /// 有界等待超时
    Timeout {
        /// 超时描述
        message: String,
        /// 执行耗时（毫秒）
        elapsed_ms: u64,
    },
    /// 前置条件不满足，未执行任何动作
    NotReady {
        /// 原因描述
        message: String,
    },
    /// 传输层不可达或数据不完整
    ConnectionError {
        /// 错误描述
        message: String,
    },
    /// 编排器内部意外错误
    SystemError {
        /// 错误描述
        message: String,
        /// 详细信息
        detail: String,
    },
}

impl OperationResult {
    /// 由坐标器/工作流内部错误构造对应的结果种类
    pub fn from_error(error: &AppError, elapsed_ms: u64) -> Self {
        match error {
            AppError::NotReady { message } => Self::NotReady {
                message: message.clone(),
            },
            AppError::Timeout { operation, message } => Self::Timeout {
                message: format!("{}: {}", operation, message),
                elapsed_ms,
            },
            AppError::ConnectionError { message } | AppError::IoError { message, .. } => {
                Self::ConnectionError {
                    message: message.clone(),
                }
            }
            AppError::DeviceFault { .. } | AppError::OutOfRange { .. } => Self::Failed {
                message: error.to_string(),
                error_code: error.error_code(),
                elapsed_ms,
            },
            other => Self::SystemError {
                message: "角度校正系统异常".to_string(),
                detail: other.to_string(),
            },
        }
    }

    /// 是否成功
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// 对外发布的数值错误代码（0表示成功）
    pub fn error_code(&self) -> u16 {
        match self {
            Self::Success { .. } => 0,
            Self::NotReady { .. } => 1,
            Self::Timeout { .. } => 2,
            Self::ConnectionError { .. } => 3,
            Self::Failed { error_code, .. } => *error_code,
            Self::SystemError { .. } => 6,
        }
    }

    /// 人类可读的结果消息
    pub fn message(&self) -> String {
        match self {
            Self::Success { data, elapsed_ms } => format!(
                "角度校正完成: 角度={:.2}度, 角度差={:.2}度, 位置={}, 耗时={}毫秒",
                data.measured_angle, data.angle_diff, data.target_position, elapsed_ms
            ),
            Self::Failed { message, .. } => message.clone(),
            Self::Timeout { message, .. } => message.clone(),
            Self::NotReady { message } => message.clone(),
            Self::ConnectionError { message } => message.clone(),
            Self::SystemError { message, detail } => format!("{} (详细: {})", message, detail),
        }
    }

    /// 成功时的校正数据
    pub fn correction_data(&self) -> Option<&CorrectionData> {
        match self {
            Self::Success { data, .. } => Some(data),
            _ => None,
        }
    }
}

/// 系统状态快照
///
/// 状态字与计数器的解码视图，供高阶客户端与状态查询使用
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatusSnapshot {
    /// 原始状态字
    pub status_word: u16,
    /// 就绪
    pub ready: bool,
    /// 执行中
    pub running: bool,
    /// 报警
    pub alarm: bool,
    /// 已初始化
    pub initialized: bool,
    /// 视觉检测进行中
    pub detecting: bool,
    /// 执行器运动中
    pub actuator_moving: bool,
    /// 错误代码
    pub error_code: u16,
    /// 成功操作计数
    pub operation_count: u32,
    /// 错误计数
    pub error_count: u16,
}

impl SystemStatusSnapshot {
    /// 从寄存器数值构造快照
    pub fn from_registers(
        status_word: u16,
        error_code: u16,
        operation_count: u32,
        error_count: u16,
    ) -> Self {
        Self {
            status_word,
            ready: StatusBit::Ready.is_set(status_word),
            running: StatusBit::Running.is_set(status_word),
            alarm: StatusBit::Alarm.is_set(status_word),
            initialized: StatusBit::Initialized.is_set(status_word),
            detecting: StatusBit::DetectingBusy.is_set(status_word),
            actuator_moving: StatusBit::ActuatorMoving.is_set(status_word),
            error_code,
            operation_count,
            error_count,
        }
    }

    /// 系统是否可接受新指令（Ready且无Alarm且已初始化）
    pub fn is_operational(&self) -> bool {
        self.ready && !self.alarm && self.initialized
    }
}
