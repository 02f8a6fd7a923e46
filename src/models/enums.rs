//! # 模型枚举类型模块
//!
//! 定义系统中使用的各种枚举类型：
//! - **状态位枚举**: 状态寄存器中各个独立标志位的位置
//! - **控制指令枚举**: 外部控制器写入指令寄存器的指令码
//! - **系统核心状态枚举**: 四态互斥的核心状态机状态
//! - **流程阶段枚举**: 角度校正工作流的阶段
//!
//! 设计原则：使用强类型枚举避免魔法数字，位运算只在传输边界发生。

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// 状态寄存器标志位位置
///
/// 状态字只在传输边界由状态机生成，系统其余部分不接触原始位
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusBit {
    /// 就绪，可接受新指令
    Ready = 0,
    /// 指令执行中
    Running = 1,
    /// 报警（粘滞，需外部显式复位）
    Alarm = 2,
    /// 已完成初始化
    Initialized = 3,
    /// 视觉检测进行中
    DetectingBusy = 4,
    /// 执行器运动中
    ActuatorMoving = 5,
}

impl StatusBit {
    /// 该标志位对应的位掩码
    pub fn mask(self) -> u16 {
        1 << (self as u16)
    }

    /// 判断状态字中该位是否置位
    pub fn is_set(self, status_word: u16) -> bool {
        status_word & self.mask() != 0
    }
}

/// 外部控制指令码
///
/// 指令码数值是对外契约，在版本间保持稳定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ControlCommand {
    /// 空闲/清除
    Clear = 0,
    /// 角度校正（检测 → 计算 → 移动 → 发布）
    AngleCorrection = 1,
    /// 执行器重置（清除设备侧指令寄存器）
    ActuatorReset = 2,
    /// 错误复位（Alarm → Ready，清除错误代码与计数）
    ErrorReset = 7,
    /// 紧急停止（任意状态下强制进入Alarm）
    EmergencyStop = 99,
}

impl ControlCommand {
    /// 从寄存器数值解析指令码，未知数值返回None
    pub fn from_register(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Clear),
            1 => Some(Self::AngleCorrection),
            2 => Some(Self::ActuatorReset),
            7 => Some(Self::ErrorReset),
            99 => Some(Self::EmergencyStop),
            _ => None,
        }
    }
}

impl Display for ControlCommand {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Clear => "清除",
            Self::AngleCorrection => "角度校正",
            Self::ActuatorReset => "执行器重置",
            Self::ErrorReset => "错误复位",
            Self::EmergencyStop => "紧急停止",
        };
        write!(f, "{}({})", name, *self as u16)
    }
}

/// 系统核心状态
///
/// 四态互斥：Ready与Running绝不同时成立，Alarm置位时两者均清除
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SystemState {
    /// 未初始化
    Uninitialized,
    /// 就绪
    Ready,
    /// 执行中
    Running,
    /// 报警
    Alarm,
}

impl Display for SystemState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Uninitialized => "Uninitialized",
            Self::Ready => "Ready",
            Self::Running => "Running",
            Self::Alarm => "Alarm",
        };
        write!(f, "{}", name)
    }
}

/// 角度校正工作流阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowPhase {
    /// 空闲
    Idle,
    /// 视觉检测中
    Detecting,
    /// 目标位置计算中
    Computing,
    /// 执行器移动中
    Moving,
    /// 结果发布中
    Publishing,
    /// 已失败
    Failed,
}

impl Display for WorkflowPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "Idle",
            Self::Detecting => "Detecting",
            Self::Computing => "Computing",
            Self::Moving => "Moving",
            Self::Publishing => "Publishing",
            Self::Failed => "Failed",
        };
        write!(f, "{}", name)
    }
}
