//! # 角度校正工作流编排器
//!
//! 把两个设备协调器串接为一次完整的具名操作：
//! `Idle -> Detecting -> Computing -> Moving -> Publishing -> Idle`
//! （任意阶段可进入 `Failed`）。
//!
//! 目标位置公式: `target = base_position - round(角度 × angle_multiplier)`，
//! 基准位置与系数均为配置项。任何非成功结果都保证设备侧指令寄存器
//! 被显式清除，错误计数恰好加一，并发布失败结果块。

use log::{error, info, warn};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use crate::models::enums::WorkflowPhase;
use crate::models::register_map::{
    REG_RESULT_BLOCK, RESULT_ANGLE_HIGH, RESULT_ANGLE_LOW, RESULT_BLOCK_LEN, RESULT_DIFF_HIGH,
    RESULT_DIFF_LOW, RESULT_POSITION_HIGH, RESULT_POSITION_LOW, RESULT_SUCCESS,
};
use crate::models::structs::{CorrectionData, OperationResult};
use crate::services::domain::actuator_coordinator::ActuatorCoordinator;
use crate::services::domain::state_machine::SystemStateMachine;
use crate::services::domain::vision_coordinator::VisionCoordinator;
use crate::services::infrastructure::register_bus::SharedRegisterBus;
use crate::utils::config::{AngleCalculationConfig, AppConfig};
use crate::utils::error::{AppError, AppResult};
use crate::utils::value_codec;

/// 角度校正工作流编排器
pub struct CorrectionWorkflow {
    main_bus: SharedRegisterBus,
    actuator_bus: SharedRegisterBus,
    state_machine: Arc<SystemStateMachine>,
    vision: VisionCoordinator,
    actuator: ActuatorCoordinator,
    base_address: u16,
    detection_mode: u16,
    calculation: AngleCalculationConfig,
    phase: Mutex<WorkflowPhase>,
}

impl CorrectionWorkflow {
    /// 创建角度校正工作流
    pub fn new(
        main_bus: SharedRegisterBus,
        actuator_bus: SharedRegisterBus,
        state_machine: Arc<SystemStateMachine>,
        config: &AppConfig,
    ) -> Self {
        let vision = VisionCoordinator::new(
            main_bus.clone(),
            state_machine.clone(),
            &config.register_map,
            &config.timing,
            config.angle_calculation.value_scale,
        );
        let actuator = ActuatorCoordinator::new(
            actuator_bus.clone(),
            state_machine.clone(),
            &config.register_map,
            &config.timing,
        );
        Self {
            main_bus,
            actuator_bus,
            state_machine,
            vision,
            actuator,
            base_address: config.register_map.base_address,
            detection_mode: config.register_map.vision_detection_mode,
            calculation: config.angle_calculation.clone(),
            phase: Mutex::new(WorkflowPhase::Idle),
        }
    }

    /// 当前工作流阶段
    pub fn current_phase(&self) -> WorkflowPhase {
        *self.phase.lock().unwrap()
    }

    /// 清除执行器设备侧指令寄存器（外部"执行器重置"指令路径）
    pub async fn reset_actuator(&self) -> AppResult<()> {
        self.actuator.reset().await
    }

    fn set_phase(&self, phase: WorkflowPhase) {
        info!("角度校正流程阶段: {}", phase);
        *self.phase.lock().unwrap() = phase;
    }

    /// 按公式计算执行器目标位置
    ///
    /// `base_position - round(角度 × angle_multiplier)`，
    /// 例: 83.03度 → 9000 - 830 = 8170
    pub fn calculate_target_position(&self, measured_angle: f64) -> AppResult<i32> {
        let offset = (measured_angle * self.calculation.angle_multiplier).round();
        if !offset.is_finite() || offset.abs() > i32::MAX as f64 {
            return Err(AppError::out_of_range(format!(
                "角度{}计算出的位置偏移超出范围",
                measured_angle
            )));
        }

        let target = self.calculation.base_position as i64 - offset as i64;
        if target < i32::MIN as i64 || target > i32::MAX as i64 {
            return Err(AppError::out_of_range(format!(
                "计算出的目标位置{}超出32位范围",
                target
            )));
        }

        info!(
            "角度计算: 检测角度={:.2}度, 目标位置={} (公式: {} - round({:.2} × {}))",
            measured_angle, target, self.calculation.base_position, measured_angle,
            self.calculation.angle_multiplier
        );
        Ok(target as i32)
    }

    /// 执行完整的角度校正流程
    ///
    /// 前置条件（状态机Ready）由指令处理器在上游保证；
    /// 本方法只校验传输层连接。返回的结果一经产生不再变化。
    pub async fn execute(&self) -> OperationResult {
        let started = Instant::now();
        info!("=== 开始执行角度校正流程 ===");

        // 前置条件: 两条总线均已连接
        if !self.main_bus.is_connected().await || !self.actuator_bus.is_connected().await {
            let result = OperationResult::ConnectionError {
                message: "传输层未连接，无法执行角度校正".to_string(),
            };
            return self.finish(result).await;
        }

        let outcome = self.run_phases().await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(data) => {
                info!("=== 角度校正流程完成 ===");
                info!("检测角度: {:.2}度", data.measured_angle);
                info!("角度差: {:.2}度", data.angle_diff);
                info!("马达位置: {}", data.target_position);
                OperationResult::Success { data, elapsed_ms }
            }
            Err(e) => {
                error!("角度校正流程失败: {}", e);
                OperationResult::from_error(&e, elapsed_ms)
            }
        };

        self.finish(result).await
    }

    /// 依次执行检测、计算、移动三个阶段
    async fn run_phases(&self) -> AppResult<CorrectionData> {
        // 阶段1: 视觉检测
        self.set_phase(WorkflowPhase::Detecting);
        self.state_machine.set_detecting(true);

        let detection = async {
            self.vision.write_detection_mode(self.detection_mode).await?;
            self.vision.trigger().await?;
            self.vision.await_completion().await
        }
        .await;

        // 检测指令在成功与失败路径都要清除
        if let Err(e) = self.vision.clear_command().await {
            warn!("清除CCD指令寄存器失败: {}", e);
        }
        self.state_machine.set_detecting(false);
        let measured_angle = detection?;

        // 阶段2: 目标位置计算
        self.set_phase(WorkflowPhase::Computing);
        let target_position = self.calculate_target_position(measured_angle)?;

        // 阶段3: 执行器移动
        self.set_phase(WorkflowPhase::Moving);
        self.state_machine.set_actuator_moving(true);

        let movement = async {
            self.actuator.trigger(target_position).await?;
            self.actuator.await_completion().await
        }
        .await;

        self.state_machine.set_actuator_moving(false);
        movement?;

        let angle_diff = measured_angle - self.calculation.target_angle;
        Ok(CorrectionData {
            measured_angle,
            angle_diff,
            target_position,
        })
    }

    /// 收尾: 失败清理、计数更新、结果发布、阶段复位
    async fn finish(&self, result: OperationResult) -> OperationResult {
        if !result.is_success() {
            self.set_phase(WorkflowPhase::Failed);
            self.safe_cleanup().await;
        } else {
            self.set_phase(WorkflowPhase::Publishing);
        }

        // 计数器只在状态机的锁下更新，每次调用恰好记账一次
        self.state_machine.record_outcome(&result);

        if let Err(e) = self.publish_result(&result).await {
            warn!("写入结果寄存器失败: {}", e);
        }

        self.set_phase(WorkflowPhase::Idle);
        result
    }

    /// 显式清除两个设备侧可能残留的指令
    ///
    /// 失败路径的强制步骤，单个清除动作失败只记录日志，
    /// 不阻止另一个设备的清理
    async fn safe_cleanup(&self) {
        if let Err(e) = self.vision.clear_command().await {
            warn!("失败清理: 清除CCD指令寄存器失败: {}", e);
        }
        if let Err(e) = self.actuator.reset().await {
            warn!("失败清理: 清除马达指令寄存器失败: {}", e);
        }
    }

    /// 把结果编码进结果寄存器块
    ///
    /// 布局: +0 成功标志，随后为各发布量的 (高字, 低字) 带符号定点数对；
    /// 新结果整块覆盖旧结果
    async fn publish_result(&self, result: &OperationResult) -> AppResult<()> {
        let mut block = [0u16; RESULT_BLOCK_LEN as usize];

        if let Some(data) = result.correction_data() {
            let scale = self.calculation.value_scale;
            block[RESULT_SUCCESS] = 1;
            let (high, low) = value_codec::encode32(data.measured_angle, scale)?;
            block[RESULT_ANGLE_HIGH] = high;
            block[RESULT_ANGLE_LOW] = low;
            let (high, low) = value_codec::encode32(data.angle_diff, scale)?;
            block[RESULT_DIFF_HIGH] = high;
            block[RESULT_DIFF_LOW] = low;
            let (high, low) = value_codec::encode32_int(data.target_position);
            block[RESULT_POSITION_HIGH] = high;
            block[RESULT_POSITION_LOW] = low;
        }

        self.main_bus
            .write_registers(self.base_address + REG_RESULT_BLOCK, &block)
            .await?;

        info!("检测结果已写入寄存器: 成功={}", result.is_success());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::infrastructure::mock_register_bus::MockRegisterBus;
    use crate::services::infrastructure::register_bus::IRegisterBus;
    use crate::utils::config::TimingConfig;

    /// 就绪且不在运动的马达状态字 (bit5)
    const ACTUATOR_IDLE_READY: u16 = 1 << 5;

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.timing = TimingConfig {
            handshake_interval_ms: 10,
            command_clear_delay_ms: 50,
            device_poll_interval_ms: 10,
            vision_timeout_ms: 300,
            actuator_timeout_ms: 300,
            actuator_settle_delay_ms: 5,
        };
        config
    }

    struct Fixture {
        main_bus: Arc<MockRegisterBus>,
        actuator_bus: Arc<MockRegisterBus>,
        state_machine: Arc<SystemStateMachine>,
        workflow: CorrectionWorkflow,
    }

    async fn build_fixture(config: AppConfig) -> Fixture {
        let main_bus = Arc::new(MockRegisterBus::new_for_testing("主服务器"));
        let actuator_bus = Arc::new(MockRegisterBus::new_for_testing("马达"));
        main_bus.connect().await.unwrap();
        actuator_bus.connect().await.unwrap();

        let state_machine = Arc::new(SystemStateMachine::new());
        state_machine.initialize().unwrap();

        let workflow = CorrectionWorkflow::new(
            main_bus.clone() as SharedRegisterBus,
            actuator_bus.clone() as SharedRegisterBus,
            state_machine.clone(),
            &config,
        );
        Fixture {
            main_bus,
            actuator_bus,
            state_machine,
            workflow,
        }
    }

    /// 预设视觉检测成功返回指定角度（按0.01度取整后写入寄存器）
    fn preset_vision_success(fixture: &Fixture, angle: f64) {
        let (high, low) = value_codec::encode32_int((angle * 100.0).round() as i32);
        fixture.main_bus.preset_registers(&[(840, 1), (843, high), (844, low)]);
    }

    #[tokio::test]
    async fn test_successful_correction_83_degrees() {
        let fixture = build_fixture(fast_config()).await;
        preset_vision_success(&fixture, 83.03);
        fixture.actuator_bus.preset_register(127, ACTUATOR_IDLE_READY);

        let result = fixture.workflow.execute().await;

        let data = result.correction_data().expect("应返回成功结果");
        assert!((data.measured_angle - 83.03).abs() < 0.01);
        // 9000 - round(83.03 × 10) = 8170
        assert_eq!(data.target_position, 8170);
        // 角度差带符号: 83.03 - 90 = -6.97
        assert!((data.angle_diff - (-6.97)).abs() < 0.01);

        // 马达写入顺序: 位置(6147)在前、移动指令(125)在后
        assert_eq!(fixture.actuator_bus.writes_to(6147), vec![8170]);
        assert_eq!(fixture.actuator_bus.writes_to(125), vec![8, 0]);

        // 结果寄存器块: 成功标志 + 三个(高,低)对
        assert_eq!(fixture.main_bus.register_value(720), 1);
        let angle = value_codec::decode32(
            fixture.main_bus.register_value(721),
            fixture.main_bus.register_value(722),
            100,
        );
        assert!((angle - 83.03).abs() < 0.01);
        let diff = value_codec::decode32(
            fixture.main_bus.register_value(723),
            fixture.main_bus.register_value(724),
            100,
        );
        assert!((diff - (-6.97)).abs() < 0.01);
        let position = value_codec::decode32_int(
            fixture.main_bus.register_value(725),
            fixture.main_bus.register_value(726),
        );
        assert_eq!(position, 8170);

        // 成功计数加一，错误计数不变
        assert_eq!(fixture.state_machine.counters(), (1, 0));
    }

    #[tokio::test]
    async fn test_target_position_rounding_87_45() {
        let fixture = build_fixture(fast_config()).await;
        // 87.45 × 10 = 874.5，四舍五入到875: 9000 - 875 = 8125
        assert_eq!(fixture.workflow.calculate_target_position(87.45).unwrap(), 8125);
        assert_eq!(fixture.workflow.calculate_target_position(83.03).unwrap(), 8170);
    }

    #[tokio::test]
    async fn test_vision_timeout_increments_error_counter_once() {
        let fixture = build_fixture(fast_config()).await;
        // 视觉成功标志始终未置位
        fixture.actuator_bus.preset_register(127, ACTUATOR_IDLE_READY);

        let result = fixture.workflow.execute().await;

        assert!(matches!(result, OperationResult::Timeout { .. }));
        assert_eq!(result.error_code(), 2);
        assert_eq!(fixture.state_machine.counters(), (0, 1), "错误计数恰好加一");

        // 失败清理: 两个设备侧指令寄存器都被清除
        assert_eq!(fixture.main_bus.register_value(800), 0);
        assert_eq!(fixture.actuator_bus.register_value(125), 0);

        // 失败结果块: 成功标志为0
        assert_eq!(fixture.main_bus.register_value(720), 0);
    }

    #[tokio::test]
    async fn test_actuator_timeout_maps_to_timeout_result() {
        let fixture = build_fixture(fast_config()).await;
        preset_vision_success(&fixture, 83.03);
        // 马达始终报告运动中 (bit13)
        fixture.actuator_bus.preset_register(127, 1 << 13);

        let result = fixture.workflow.execute().await;

        assert!(matches!(result, OperationResult::Timeout { .. }));
        // 失败清理清除了马达指令
        assert_eq!(fixture.actuator_bus.register_value(125), 0);
        assert_eq!(fixture.state_machine.counters(), (0, 1));
    }

    #[tokio::test]
    async fn test_out_of_range_position_fails_before_device_write() {
        let mut config = fast_config();
        // 让计算结果为负数: base 0, 角度为正
        config.angle_calculation.base_position = 0;
        let fixture = build_fixture(config).await;
        preset_vision_success(&fixture, 83.03);

        let result = fixture.workflow.execute().await;

        assert!(matches!(result, OperationResult::Failed { .. }));
        assert_eq!(result.error_code(), 5);
        // 越界时马达未收到任何位置写入
        assert!(fixture.actuator_bus.writes_to(6147).is_empty());
    }

    #[tokio::test]
    async fn test_disconnected_transport_returns_connection_error() {
        let fixture = build_fixture(fast_config()).await;
        fixture.actuator_bus.disconnect().await.unwrap();

        let result = fixture.workflow.execute().await;
        assert!(matches!(result, OperationResult::ConnectionError { .. }));
        assert_eq!(result.error_code(), 3);
    }

    #[tokio::test]
    async fn test_detection_mode_written_before_trigger() {
        let fixture = build_fixture(fast_config()).await;
        preset_vision_success(&fixture, 90.0);
        fixture.actuator_bus.preset_register(127, ACTUATOR_IDLE_READY);

        fixture.workflow.execute().await;

        // 模式寄存器(810)与检测指令(800)都被写入
        assert_eq!(fixture.main_bus.writes_to(810), vec![0]);
        assert!(fixture.main_bus.writes_to(800).contains(&16));
    }
}
