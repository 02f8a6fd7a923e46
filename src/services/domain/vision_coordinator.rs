//! # 视觉检测协调器模块
//!
//! 把"触发检测、等待完成、读取角度"包装为统一的两段式契约：
//! `trigger()` 下发检测指令，`await_completion()` 有界等待成功标志
//! 并解码带符号定点角度。设备侧寄存器块经共享TCP总线访问，
//! 所有地址来自配置。

use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::models::register_map::{
    VISION_REG_COMMAND, VISION_REG_RESULT, VISION_RESULT_ANGLE_HIGH, VISION_RESULT_ANGLE_LOW,
    VISION_RESULT_SUCCESS,
};
use crate::services::domain::state_machine::SystemStateMachine;
use crate::services::infrastructure::register_bus::SharedRegisterBus;
use crate::utils::config::{RegisterMapConfig, TimingConfig};
use crate::utils::error::{AppError, AppResult};
use crate::utils::value_codec;

/// 视觉检测协调器
pub struct VisionCoordinator {
    bus: SharedRegisterBus,
    state_machine: Arc<SystemStateMachine>,
    base_address: u16,
    detect_command: u16,
    mode_offset: Option<u16>,
    completion_timeout: Duration,
    poll_interval: Duration,
    value_scale: u32,
}

impl VisionCoordinator {
    /// 创建视觉检测协调器
    pub fn new(
        bus: SharedRegisterBus,
        state_machine: Arc<SystemStateMachine>,
        register_map: &RegisterMapConfig,
        timing: &TimingConfig,
        value_scale: u32,
    ) -> Self {
        Self {
            bus,
            state_machine,
            base_address: register_map.vision_base_address,
            detect_command: register_map.vision_detect_command,
            mode_offset: register_map.vision_mode_offset,
            completion_timeout: Duration::from_millis(timing.vision_timeout_ms),
            poll_interval: Duration::from_millis(timing.device_poll_interval_ms),
            value_scale,
        }
    }

    /// 下发检测模式参数（配置了模式寄存器时）
    pub async fn write_detection_mode(&self, mode: u16) -> AppResult<()> {
        if let Some(offset) = self.mode_offset {
            self.bus
                .write_register(self.base_address + offset, mode)
                .await?;
            debug!("检测模式已下发: {}", mode);
        }
        Ok(())
    }

    /// 触发视觉检测
    ///
    /// 先清除上次检测的成功标志，再写入检测指令，
    /// 避免等待阶段读到陈旧结果
    pub async fn trigger(&self) -> AppResult<()> {
        info!("触发CCD角度检测...");

        self.bus
            .write_register(self.base_address + VISION_REG_RESULT + VISION_RESULT_SUCCESS, 0)
            .await?;
        self.bus
            .write_register(self.base_address + VISION_REG_COMMAND, self.detect_command)
            .await?;

        info!("CCD检测指令发送成功，等待检测完成...");
        Ok(())
    }

    /// 有界等待检测完成并读取角度（度）
    ///
    /// 轮询结果块的成功标志直到置位或超时；等待期间系统被强制
    /// 进入Alarm（紧急停止）时提前中止。返回的寄存器数量不足
    /// 视为连接错误，绝不当作零值角度。
    pub async fn await_completion(&self) -> AppResult<f64> {
        let deadline = Instant::now() + self.completion_timeout;
        let result_address = self.base_address + VISION_REG_RESULT;
        let read_count = (VISION_RESULT_ANGLE_LOW + 1) as u16;

        loop {
            if self.state_machine.is_alarm() {
                return Err(AppError::device_fault("CCD检测等待期间系统进入Alarm，提前中止"));
            }
            if Instant::now() >= deadline {
                return Err(AppError::timeout(
                    "CCD检测",
                    format!("{}毫秒内未完成", self.completion_timeout.as_millis()),
                ));
            }

            match self.bus.read_registers(result_address, read_count).await {
                Ok(registers) => {
                    // 总线保证数量，这里再防御一次：截断数据不是零值结果
                    if registers.len() < read_count as usize {
                        return Err(AppError::connection_error(format!(
                            "CCD结果块数据不完整: 期望{}个寄存器, 实际{}个",
                            read_count,
                            registers.len()
                        )));
                    }

                    if registers[VISION_RESULT_SUCCESS as usize] == 1 {
                        let angle = value_codec::decode32(
                            registers[VISION_RESULT_ANGLE_HIGH as usize],
                            registers[VISION_RESULT_ANGLE_LOW as usize],
                            self.value_scale,
                        );
                        info!("CCD角度读取成功: {:.2}度", angle);
                        return Ok(angle);
                    }
                }
                Err(AppError::ConnectionError { message }) => {
                    // 瞬时读取失败继续轮询，由截止时间兜底
                    warn!("读取CCD结果失败，继续等待: {}", message);
                }
                Err(e) => return Err(e),
            }

            sleep(self.poll_interval).await;
        }
    }

    /// 清除视觉模块指令寄存器
    ///
    /// 所有退出路径（成功、失败、超时）都必须调用，
    /// 保证设备侧不残留已置位的指令
    pub async fn clear_command(&self) -> AppResult<()> {
        self.bus
            .write_register(self.base_address + VISION_REG_COMMAND, 0)
            .await
    }
}
