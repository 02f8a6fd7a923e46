//! # 执行器协调器模块
//!
//! 马达驱动器的两段式契约：`trigger(target)` 按设备要求的顺序
//! 先写目标位置、再写移动指令（顺序不可颠倒），`await_completion()`
//! 有界轮询状态寄存器的忙碌/就绪位对直到"停止且就绪"或超时，
//! 完成后清除设备侧指令寄存器。

use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::models::register_map::{ACTUATOR_STATUS_MOVING_BIT, ACTUATOR_STATUS_READY_BIT};
use crate::services::domain::state_machine::SystemStateMachine;
use crate::services::infrastructure::register_bus::SharedRegisterBus;
use crate::utils::config::{RegisterMapConfig, TimingConfig};
use crate::utils::error::{AppError, AppResult};

/// 执行器协调器
pub struct ActuatorCoordinator {
    bus: SharedRegisterBus,
    state_machine: Arc<SystemStateMachine>,
    position_register: u16,
    command_register: u16,
    status_register: u16,
    move_command: u16,
    settle_delay: Duration,
    completion_timeout: Duration,
    poll_interval: Duration,
}

impl ActuatorCoordinator {
    /// 创建执行器协调器
    pub fn new(
        bus: SharedRegisterBus,
        state_machine: Arc<SystemStateMachine>,
        register_map: &RegisterMapConfig,
        timing: &TimingConfig,
    ) -> Self {
        Self {
            bus,
            state_machine,
            position_register: register_map.actuator_position_register,
            command_register: register_map.actuator_command_register,
            status_register: register_map.actuator_status_register,
            move_command: register_map.actuator_move_command,
            settle_delay: Duration::from_millis(timing.actuator_settle_delay_ms),
            completion_timeout: Duration::from_millis(timing.actuator_timeout_ms),
            poll_interval: Duration::from_millis(timing.device_poll_interval_ms),
        }
    }

    /// 下发移动指令
    ///
    /// 设备契约要求两次写入严格有序：先目标位置、短暂稳定延迟、
    /// 再移动指令。目标位置必须能放入单个无符号16位寄存器。
    pub async fn trigger(&self, target_position: i32) -> AppResult<()> {
        if target_position < 0 || target_position > u16::MAX as i32 {
            return Err(AppError::out_of_range(format!(
                "马达目标位置{}超出16位寄存器可表示范围",
                target_position
            )));
        }

        info!("发送马达移动指令: 位置={}", target_position);

        self.bus
            .write_register(self.position_register, target_position as u16)
            .await?;

        sleep(self.settle_delay).await;

        self.bus
            .write_register(self.command_register, self.move_command)
            .await?;

        info!("马达移动指令发送成功: 目标位置={}", target_position);
        Ok(())
    }

    /// 有界等待马达运动完成
    ///
    /// 轮询状态寄存器直到"不在运动且就绪"，随后清除设备侧指令寄存器。
    /// 等待期间系统被强制进入Alarm（紧急停止）时提前中止。
    pub async fn await_completion(&self) -> AppResult<()> {
        info!("等待马达运动完成...");
        let deadline = Instant::now() + self.completion_timeout;

        loop {
            if self.state_machine.is_alarm() {
                return Err(AppError::device_fault("马达等待期间系统进入Alarm，提前中止"));
            }
            if Instant::now() >= deadline {
                return Err(AppError::timeout(
                    "马达运动",
                    format!("{}毫秒内未完成", self.completion_timeout.as_millis()),
                ));
            }

            match self.bus.read_registers(self.status_register, 1).await {
                Ok(registers) => {
                    // 截断的响应不是有效状态
                    let status_word = *registers.first().ok_or_else(|| {
                        AppError::connection_error("马达状态响应为空")
                    })?;
                    let moving = status_word & (1 << ACTUATOR_STATUS_MOVING_BIT) != 0;
                    let ready = status_word & (1 << ACTUATOR_STATUS_READY_BIT) != 0;

                    if !moving && ready {
                        info!("马达运动完成");
                        self.reset().await?;
                        return Ok(());
                    }
                }
                Err(AppError::ConnectionError { message }) => {
                    // 瞬时读取失败继续轮询，由截止时间兜底
                    warn!("读取马达状态失败，继续等待: {}", message);
                }
                Err(e) => return Err(e),
            }

            sleep(self.poll_interval).await;
        }
    }

    /// 清除设备侧指令寄存器
    ///
    /// 正常完成、失败清理与外部"执行器重置"指令共用此路径
    pub async fn reset(&self) -> AppResult<()> {
        self.bus.write_register(self.command_register, 0).await
    }
}
