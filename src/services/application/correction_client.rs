//! # 角度校正高阶客户端模块
//!
//! 外部控制器侧的简洁API：隐藏底层寄存器交握细节，供上层流程
//! 一键执行90度角度校正。
//!
//! 完成判定只依赖STATUS寄存器（等待Running升起再回落），绝不依赖
//! 指令寄存器——指令寄存器在宽限时间内自动清零，只表示"已接受"。
//!
//! 约定：同一时刻只应有一个外部写者操作CONTROL_COMMAND
//! （本客户端或监控PLC，二选一），这是文档化约定而非代码强制。

use log::{debug, info, warn};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::models::register_map::{
    REG_COMMAND_ID, REG_CONTROL_COMMAND, REG_ERROR_CODE, REG_RESULT_BLOCK, REG_STATS_BLOCK,
    REG_STATUS, RESULT_ANGLE_HIGH, RESULT_ANGLE_LOW, RESULT_DIFF_HIGH, RESULT_DIFF_LOW,
    RESULT_POSITION_HIGH, RESULT_POSITION_LOW, RESULT_SUCCESS, STATS_BLOCK_LEN,
    STATS_ERROR_COUNT, STATS_OPERATION_HIGH, STATS_OPERATION_LOW,
};
use crate::models::enums::ControlCommand;
use crate::models::structs::{CorrectionData, OperationResult, SystemStatusSnapshot};
use crate::services::infrastructure::register_bus::SharedRegisterBus;
use crate::utils::config::AppConfig;
use crate::utils::error::{AppError, AppResult};
use crate::utils::value_codec;

/// 角度校正高阶客户端
pub struct CorrectionClient {
    bus: SharedRegisterBus,
    base_address: u16,
    value_scale: u32,
    /// 校正总超时
    correction_timeout: Duration,
    /// 状态检查间隔
    status_check_interval: Duration,
    /// 短指令（复位类）确认超时
    ack_timeout: Duration,
    /// 下一个指令关联ID（从1开始，跳过0）
    next_command_id: Mutex<u16>,
}

impl CorrectionClient {
    /// 创建高阶客户端
    pub fn new(bus: SharedRegisterBus, config: &AppConfig) -> Self {
        Self {
            bus,
            base_address: config.register_map.base_address,
            value_scale: config.angle_calculation.value_scale,
            correction_timeout: Duration::from_secs(15),
            status_check_interval: Duration::from_millis(500),
            ack_timeout: Duration::from_secs(2),
            next_command_id: Mutex::new(0),
        }
    }

    /// 覆盖等待时序（测试用）
    pub fn with_timeouts(
        mut self,
        correction_timeout: Duration,
        status_check_interval: Duration,
        ack_timeout: Duration,
    ) -> Self {
        self.correction_timeout = correction_timeout;
        self.status_check_interval = status_check_interval;
        self.ack_timeout = ack_timeout;
        self
    }

    /// 连接到角度校正模块
    pub async fn connect(&self) -> AppResult<()> {
        info!("正在连接角度校正模块...");
        self.bus.connect().await?;

        // 验证模块回应
        let status = self.system_status().await?;
        info!(
            "角度校正模块连接成功 - Ready:{}, Initialized:{}",
            status.ready, status.initialized
        );
        Ok(())
    }

    /// 断开连接
    pub async fn disconnect(&self) -> AppResult<()> {
        self.bus.disconnect().await?;
        info!("角度校正模块连接已断开");
        Ok(())
    }

    /// 读取系统状态快照
    pub async fn system_status(&self) -> AppResult<SystemStatusSnapshot> {
        let head = self
            .bus
            .read_registers(self.base_address, REG_COMMAND_ID + 1)
            .await?;
        let stats = self
            .bus
            .read_registers(self.base_address + REG_STATS_BLOCK, STATS_BLOCK_LEN)
            .await?;
        if head.len() <= REG_ERROR_CODE as usize || stats.len() < STATS_BLOCK_LEN as usize {
            return Err(AppError::connection_error("系统状态寄存器数据不完整"));
        }

        let operation_count = (stats[STATS_OPERATION_LOW] as u32)
            | ((stats[STATS_OPERATION_HIGH] as u32) << 16);

        Ok(SystemStatusSnapshot::from_registers(
            head[REG_STATUS as usize],
            head[REG_ERROR_CODE as usize],
            operation_count,
            stats[STATS_ERROR_COUNT],
        ))
    }

    /// 检查系统是否准备就绪（Ready且无Alarm且已初始化）
    pub async fn is_system_ready(&self) -> bool {
        match self.system_status().await {
            Ok(status) => {
                debug!(
                    "系统状态检查: Ready={}, Alarm={}, Initialized={}",
                    status.ready, status.alarm, status.initialized
                );
                status.is_operational()
            }
            Err(e) => {
                warn!("读取系统状态失败: {}", e);
                false
            }
        }
    }

    /// 读取最后一次校正结果寄存器块
    pub async fn last_result(&self) -> AppResult<Option<CorrectionData>> {
        let registers = self
            .bus
            .read_registers(
                self.base_address + REG_RESULT_BLOCK,
                (RESULT_POSITION_LOW + 1) as u16,
            )
            .await?;

        if registers.len() <= RESULT_POSITION_LOW {
            return Err(AppError::connection_error("校正结果寄存器数据不完整"));
        }
        if registers[RESULT_SUCCESS] != 1 {
            return Ok(None);
        }

        Ok(Some(CorrectionData {
            measured_angle: value_codec::decode32(
                registers[RESULT_ANGLE_HIGH],
                registers[RESULT_ANGLE_LOW],
                self.value_scale,
            ),
            angle_diff: value_codec::decode32(
                registers[RESULT_DIFF_HIGH],
                registers[RESULT_DIFF_LOW],
                self.value_scale,
            ),
            target_position: value_codec::decode32_int(
                registers[RESULT_POSITION_HIGH],
                registers[RESULT_POSITION_LOW],
            ),
        }))
    }

    /// 执行角度校正到90度
    ///
    /// 主要的公开方法：检查状态、发送指令、等待完成、读取结果。
    /// 完整流程（检测 → 计算 → 移动）由模块侧执行。
    pub async fn execute_correction(&self) -> OperationResult {
        let started = Instant::now();
        info!("=== 开始执行角度校正到90度 ===");

        if !self.bus.is_connected().await {
            return OperationResult::ConnectionError {
                message: "Modbus连接未建立，请先调用connect()".to_string(),
            };
        }

        let initial_status = match self.system_status().await {
            Ok(status) => status,
            Err(e) => {
                return OperationResult::ConnectionError {
                    message: format!("读取系统状态失败: {}", e),
                }
            }
        };
        if !initial_status.is_operational() {
            return OperationResult::NotReady {
                message: "角度校正系统未准备就绪，请检查系统状态".to_string(),
            };
        }

        info!("发送角度校正指令...");
        if let Err(e) = self.send_command(ControlCommand::AngleCorrection).await {
            return OperationResult::ConnectionError {
                message: format!("发送角度校正指令失败: {}", e),
            };
        }

        info!("等待角度校正执行完成...");
        if let Err(result) = self.wait_for_completion(started, &initial_status).await {
            return result;
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        match self.last_result().await {
            Ok(Some(data)) => {
                info!("角度校正成功完成，耗时: {}毫秒", elapsed_ms);
                info!("检测角度: {:.2}度", data.measured_angle);
                info!("角度差: {:.2}度", data.angle_diff);
                info!("马达位置: {}", data.target_position);
                OperationResult::Success { data, elapsed_ms }
            }
            Ok(None) => {
                let error_code = self.read_error_code().await.unwrap_or(0);
                OperationResult::Failed {
                    message: "角度校正执行失败，无有效结果".to_string(),
                    error_code,
                    elapsed_ms,
                }
            }
            Err(e) => OperationResult::ConnectionError {
                message: format!("读取校正结果失败: {}", e),
            },
        }
    }

    /// 执行器重置
    pub async fn reset_actuator(&self) -> AppResult<()> {
        info!("执行马达重置...");
        self.send_command(ControlCommand::ActuatorReset).await?;
        self.wait_command_accepted().await?;
        info!("马达重置完成");
        Ok(())
    }

    /// 错误复位
    pub async fn reset_errors(&self) -> AppResult<()> {
        info!("执行错误复位...");
        self.send_command(ControlCommand::ErrorReset).await?;
        self.wait_command_accepted().await?;
        info!("错误复位完成");
        Ok(())
    }

    /// 紧急停止
    pub async fn emergency_stop(&self) -> AppResult<()> {
        warn!("发送紧急停止指令...");
        self.send_command(ControlCommand::EmergencyStop).await?;
        self.wait_command_accepted().await
    }

    /// 写入关联ID与指令码
    ///
    /// 先写ID后写指令：模块以指令值变化为触发条件，
    /// 指令写入时关联ID必须已经就位
    async fn send_command(&self, command: ControlCommand) -> AppResult<()> {
        let command_id = {
            let mut next = self.next_command_id.lock().unwrap();
            *next = next.wrapping_add(1);
            if *next == 0 {
                *next = 1;
            }
            *next
        };

        self.bus
            .write_register(self.base_address + REG_COMMAND_ID, command_id)
            .await?;
        self.bus
            .write_register(self.base_address + REG_CONTROL_COMMAND, command as u16)
            .await
    }

    /// 等待工作流完成（私有方法）
    ///
    /// 两段式等待：先等Running升起（指令被接受），再等其回落
    /// （工作流结束）。工作流快到在两次检查之间完成时，
    /// 以计数器变化作为完成依据。Alarm在任一阶段出现都视为失败。
    async fn wait_for_completion(
        &self,
        started: Instant,
        initial_status: &SystemStatusSnapshot,
    ) -> Result<(), OperationResult> {
        let deadline = started + self.correction_timeout;
        let mut accepted = false;

        loop {
            if Instant::now() >= deadline {
                let message = format!(
                    "角度校正执行超时 ({}毫秒)",
                    self.correction_timeout.as_millis()
                );
                warn!("{}", message);
                return Err(OperationResult::Timeout {
                    message,
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }

            match self.system_status().await {
                Ok(status) => {
                    debug!(
                        "执行状态: Ready={}, Running={}, Alarm={}",
                        status.ready, status.running, status.alarm
                    );

                    if status.alarm {
                        return Err(OperationResult::Failed {
                            message: "角度校正过程发生错误，系统进入Alarm状态".to_string(),
                            error_code: status.error_code,
                            elapsed_ms: started.elapsed().as_millis() as u64,
                        });
                    }
                    let progressed = status.operation_count != initial_status.operation_count
                        || status.error_count != initial_status.error_count;
                    if status.running {
                        accepted = true;
                    } else if status.ready && (accepted || progressed) {
                        info!("角度校正执行完成");
                        return Ok(());
                    }
                }
                Err(e) => {
                    // 瞬时读取失败继续等待，由截止时间兜底
                    warn!("状态检查失败: {}", e);
                }
            }

            sleep(self.status_check_interval).await;
        }
    }

    /// 等待短指令被模块接受（指令寄存器归零）
    async fn wait_command_accepted(&self) -> AppResult<()> {
        let deadline = Instant::now() + self.ack_timeout;
        loop {
            if Instant::now() >= deadline {
                return Err(AppError::timeout(
                    "指令确认",
                    format!("{}毫秒内指令寄存器未归零", self.ack_timeout.as_millis()),
                ));
            }

            let registers = self
                .bus
                .read_registers(self.base_address + REG_CONTROL_COMMAND, 1)
                .await?;
            if registers.first() == Some(&0) {
                return Ok(());
            }

            sleep(self.status_check_interval).await;
        }
    }

    async fn read_error_code(&self) -> AppResult<u16> {
        let registers = self
            .bus
            .read_registers(self.base_address + REG_ERROR_CODE, 1)
            .await?;
        registers
            .first()
            .copied()
            .ok_or_else(|| AppError::connection_error("错误代码寄存器响应为空"))
    }
}
