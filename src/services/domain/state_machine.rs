//! # 系统状态机模块
//!
//! 维护四态互斥的核心状态（Uninitialized/Ready/Running/Alarm）、
//! 独立的设备忙碌标志位以及操作/错误计数器。所有组件在开始工作前
//! 必须征询本状态机，但它本身不知道"工作"是什么。
//!
//! 每次状态转换都是单一互斥锁保护下的一次原子更新；
//! 状态字的位编码只在 `status_word()` 边界产生。

use log::{info, warn};
use std::sync::Mutex;

use crate::models::enums::{StatusBit, SystemState};
use crate::models::structs::{OperationResult, SystemStatusSnapshot};
use crate::utils::error::{AppError, AppResult};

/// 锁内状态数据
struct StateInner {
    state: SystemState,
    initialized: bool,
    detecting: bool,
    actuator_moving: bool,
    error_code: u16,
    operation_count: u32,
    error_count: u16,
}

/// 系统状态机
///
/// 状态转换经由单一锁线性化；状态字的并发读取只在位运算期间
/// 阻塞写入者。计数器只由工作任务在同一把锁下更新，避免丢失更新。
pub struct SystemStateMachine {
    inner: Mutex<StateInner>,
}

impl SystemStateMachine {
    /// 创建处于未初始化状态的状态机
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                state: SystemState::Uninitialized,
                initialized: false,
                detecting: false,
                actuator_moving: false,
                error_code: 0,
                operation_count: 0,
                error_count: 0,
            }),
        }
    }

    /// 初始化完成: Uninitialized -> Ready
    pub fn initialize(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != SystemState::Uninitialized {
            return Err(AppError::state_transition_error(
                inner.state.to_string(),
                SystemState::Ready.to_string(),
                "只能从未初始化状态执行初始化",
            ));
        }
        inner.state = SystemState::Ready;
        inner.initialized = true;
        info!("系统状态机初始化完成: Ready");
        Ok(())
    }

    /// 开始执行指令: Ready -> Running（非Ready状态下失败）
    pub fn begin_command(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != SystemState::Ready {
            return Err(AppError::state_transition_error(
                inner.state.to_string(),
                SystemState::Running.to_string(),
                "系统未Ready，无法开始执行指令",
            ));
        }
        inner.state = SystemState::Running;
        Ok(())
    }

    /// 指令执行结束: Running -> Ready（成功）或 Running -> Alarm（失败）
    ///
    /// 执行期间被强制进入Alarm（紧急停止）时保持Alarm不变
    pub fn complete(&self, success: bool) -> AppResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            SystemState::Running => {
                inner.state = if success {
                    SystemState::Ready
                } else {
                    SystemState::Alarm
                };
                inner.detecting = false;
                inner.actuator_moving = false;
                Ok(())
            }
            SystemState::Alarm => {
                // 紧急停止已抢先生效，保持Alarm粘滞
                inner.detecting = false;
                inner.actuator_moving = false;
                Ok(())
            }
            other => Err(AppError::state_transition_error(
                other.to_string(),
                "Ready/Alarm".to_string(),
                "非Running状态下不能结束指令",
            )),
        }
    }

    /// 报警复位: Alarm -> Ready（仅外部指令触发，绝不自动）
    ///
    /// Ready状态下调用只清除错误代码与错误计数
    pub fn clear_alarm(&self) -> AppResult<()> {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            SystemState::Alarm => {
                inner.state = SystemState::Ready;
                inner.error_code = 0;
                inner.error_count = 0;
                info!("报警已复位，系统恢复Ready");
                Ok(())
            }
            SystemState::Ready => {
                inner.error_code = 0;
                inner.error_count = 0;
                Ok(())
            }
            other => Err(AppError::state_transition_error(
                other.to_string(),
                SystemState::Ready.to_string(),
                "当前状态下不能执行报警复位",
            )),
        }
    }

    /// 强制进入报警状态（紧急停止路径，任意状态有效）
    pub fn force_alarm(&self, error_code: u16) {
        let mut inner = self.inner.lock().unwrap();
        warn!(
            "系统被强制进入Alarm状态 (原状态: {}, 错误代码: {})",
            inner.state, error_code
        );
        inner.state = SystemState::Alarm;
        inner.error_code = error_code;
        inner.detecting = false;
        inner.actuator_moving = false;
    }

    /// 设置视觉检测忙碌标志
    pub fn set_detecting(&self, detecting: bool) {
        self.inner.lock().unwrap().detecting = detecting;
    }

    /// 设置执行器运动忙碌标志
    pub fn set_actuator_moving(&self, moving: bool) {
        self.inner.lock().unwrap().actuator_moving = moving;
    }

    /// 记录一次工作流结果，更新计数器与错误代码
    ///
    /// 只允许工作任务调用，与状态位共用同一把锁避免丢失更新；
    /// 返回更新后的 (成功计数, 错误计数) 供结果发布使用
    pub fn record_outcome(&self, result: &OperationResult) -> (u32, u16) {
        let mut inner = self.inner.lock().unwrap();
        if result.is_success() {
            inner.operation_count = inner.operation_count.wrapping_add(1);
            inner.error_code = 0;
        } else {
            inner.error_count = inner.error_count.wrapping_add(1);
            inner.error_code = result.error_code();
        }
        (inner.operation_count, inner.error_count)
    }

    /// 当前核心状态
    pub fn state(&self) -> SystemState {
        self.inner.lock().unwrap().state
    }

    /// 是否处于Ready状态
    pub fn is_ready(&self) -> bool {
        self.state() == SystemState::Ready
    }

    /// 是否处于Alarm状态
    pub fn is_alarm(&self) -> bool {
        self.state() == SystemState::Alarm
    }

    /// 当前错误代码
    pub fn error_code(&self) -> u16 {
        self.inner.lock().unwrap().error_code
    }

    /// 当前计数器 (成功计数, 错误计数)
    pub fn counters(&self) -> (u32, u16) {
        let inner = self.inner.lock().unwrap();
        (inner.operation_count, inner.error_count)
    }

    /// 生成对外发布的状态字
    ///
    /// 位编码只在此边界发生：bit0 Ready, bit1 Running, bit2 Alarm,
    /// bit3 Initialized, bit4 视觉检测中, bit5 执行器运动中
    pub fn status_word(&self) -> u16 {
        let inner = self.inner.lock().unwrap();
        Self::encode_word(&inner)
    }

    /// 生成状态快照
    pub fn snapshot(&self) -> SystemStatusSnapshot {
        let inner = self.inner.lock().unwrap();
        SystemStatusSnapshot::from_registers(
            Self::encode_word(&inner),
            inner.error_code,
            inner.operation_count,
            inner.error_count,
        )
    }

    fn encode_word(inner: &StateInner) -> u16 {
        let mut word = 0u16;
        match inner.state {
            SystemState::Ready => word |= StatusBit::Ready.mask(),
            SystemState::Running => word |= StatusBit::Running.mask(),
            SystemState::Alarm => word |= StatusBit::Alarm.mask(),
            SystemState::Uninitialized => {}
        }
        if inner.initialized {
            word |= StatusBit::Initialized.mask();
        }
        if inner.detecting {
            word |= StatusBit::DetectingBusy.mask();
        }
        if inner.actuator_moving {
            word |= StatusBit::ActuatorMoving.mask();
        }
        word
    }
}

impl Default for SystemStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
