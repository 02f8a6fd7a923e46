//! # 指令处理器模块（含自动清零）
//!
//! 把外部控制器的一次指令写入翻译为恰好一次工作流调用，并保证
//! 指令寄存器无论执行成败都会归零——这是外部控制器赖以判断
//! "指令已被接受"的行为契约。
//!
//! ## 双信号契约
//! 指令寄存器在接受后的宽限时间（默认500毫秒）内清零，只表示
//! "指令已接受"；工作流是否完成由STATUS寄存器的
//! Running → Ready/Alarm 迁移表示。两个信号刻意解耦，请勿合并。
//!
//! ## 并发保证
//! - 每个模块实例至多一个在途工作流：Running期间的新指令被拒绝
//!   （立即清零，不排队），计数器不变
//! - 工作流在独立的分离任务中执行，轮询任务绝不阻塞等待
//! - 每条指令至多清零一次：工作任务与宽限定时器通过原子标志协商，
//!   避免两者的清零写入与外部控制器的下一条指令竞争

use log::{info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::enums::ControlCommand;
use crate::models::register_map::{REG_COMMAND_ID, REG_CONTROL_COMMAND};
use crate::services::domain::correction_workflow::CorrectionWorkflow;
use crate::services::domain::state_machine::SystemStateMachine;
use crate::services::infrastructure::register_bus::SharedRegisterBus;
use crate::utils::config::AppConfig;
use crate::utils::error::{AppError, AppResult};

/// 紧急停止对外发布的错误代码
const EMERGENCY_STOP_ERROR_CODE: u16 = 6;

/// 指令处理器
pub struct CommandProcessor {
    bus: SharedRegisterBus,
    state_machine: Arc<SystemStateMachine>,
    workflow: Arc<CorrectionWorkflow>,
    base_address: u16,
    clear_delay: Duration,
    /// 上次观察到的指令寄存器值（变化检测）
    last_seen_command: Mutex<u16>,
    /// 上次已处理的指令关联ID（重复指令抑制）
    last_processed_id: Mutex<u16>,
}

impl CommandProcessor {
    /// 创建指令处理器
    pub fn new(
        bus: SharedRegisterBus,
        state_machine: Arc<SystemStateMachine>,
        workflow: Arc<CorrectionWorkflow>,
        config: &AppConfig,
    ) -> Self {
        Self {
            bus,
            state_machine,
            workflow,
            base_address: config.register_map.base_address,
            clear_delay: Duration::from_millis(config.timing.command_clear_delay_ms),
            last_seen_command: Mutex::new(0),
            last_processed_id: Mutex::new(0),
        }
    }

    /// 轮询一次: 读取指令寄存器并分发新指令
    ///
    /// 由握手服务在每个轮询周期调用；读取失败向上传播由轮询循环退避
    pub async fn process_pending(&self) -> AppResult<()> {
        let registers = self
            .bus
            .read_registers(self.base_address + REG_CONTROL_COMMAND, REG_COMMAND_ID + 1)
            .await?;
        if registers.len() <= REG_COMMAND_ID as usize {
            return Err(AppError::connection_error("指令寄存器块数据不完整"));
        }
        let command_value = registers[REG_CONTROL_COMMAND as usize];
        let command_id = registers[REG_COMMAND_ID as usize];

        // 与上次观察值相同或为零: 无新指令
        {
            let mut last_seen = self.last_seen_command.lock().unwrap();
            if command_value == *last_seen {
                return Ok(());
            }
            *last_seen = command_value;
        }
        if command_value == 0 {
            return Ok(());
        }

        let command = match ControlCommand::from_register(command_value) {
            Some(command) => command,
            None => {
                warn!("未知指令: {}，已清除", command_value);
                return self.clear_command_register().await;
            }
        };

        // 重复指令抑制: 关联ID与上次已处理的ID相同则不再执行
        if command_id != 0 && command_id == *self.last_processed_id.lock().unwrap() {
            info!("重复指令被抑制: {} (关联ID: {})", command, command_id);
            return self.clear_command_register().await;
        }

        info!("收到新控制指令: {} (关联ID: {})", command, command_id);
        self.dispatch(command, command_id).await
    }

    /// 分发指令
    async fn dispatch(&self, command: ControlCommand, command_id: u16) -> AppResult<()> {
        match command {
            ControlCommand::Clear => Ok(()),

            ControlCommand::EmergencyStop => {
                // 任意状态下有效；在途工作任务在下次设备轮询时观察到
                // Alarm并提前中止自己的等待循环
                warn!("收到紧急停止指令，强制进入Alarm");
                self.state_machine.force_alarm(EMERGENCY_STOP_ERROR_CODE);
                self.record_processed_id(command_id);
                self.clear_command_register().await
            }

            ControlCommand::ErrorReset => {
                match self.state_machine.clear_alarm() {
                    Ok(()) => info!("错误复位完成"),
                    Err(e) => warn!("错误复位被拒绝: {}", e),
                }
                self.record_processed_id(command_id);
                self.clear_command_register().await
            }

            ControlCommand::ActuatorReset => {
                if !self.state_machine.is_ready() {
                    warn!("系统未Ready，拒绝执行器重置指令");
                    return self.clear_command_register().await;
                }
                if let Err(e) = self.workflow.reset_actuator().await {
                    warn!("执行器重置失败: {}", e);
                }
                self.record_processed_id(command_id);
                self.clear_command_register().await
            }

            ControlCommand::AngleCorrection => {
                // 验证并占用状态机: Ready -> Running。被拒绝的指令立即
                // 清零，绝不让控制器悬等，也不触碰任何计数器
                if let Err(e) = self.state_machine.begin_command() {
                    warn!("拒绝角度校正指令: {}", e);
                    return self.clear_command_register().await;
                }
                self.record_processed_id(command_id);
                self.spawn_worker(command_id);
                Ok(())
            }
        }
    }

    /// 启动分离的工作任务与一次性自动清零定时器
    fn spawn_worker(&self, command_id: u16) {
        let tracking_id = Uuid::new_v4();
        info!(
            "接受角度校正指令 (关联ID: {}, 任务: {})",
            command_id, tracking_id
        );

        // 每条指令恰好清零一次: 工作任务与定时器通过该标志协商
        let cleared = Arc::new(AtomicBool::new(false));
        let timer_cancel = CancellationToken::new();
        let command_address = self.base_address + REG_CONTROL_COMMAND;

        // 一次性自动清零定时器: 宽限时间到即重申零值，
        // 工作任务若先完成则取消本定时器
        {
            let bus = self.bus.clone();
            let cleared = cleared.clone();
            let cancel = timer_cancel.clone();
            let delay = self.clear_delay;
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = sleep(delay) => {
                        if !cleared.swap(true, Ordering::SeqCst) {
                            if let Err(e) = bus.write_register(command_address, 0).await {
                                warn!("自动清零指令寄存器失败: {}", e);
                            }
                        }
                    }
                }
            });
        }

        // 分离的工作任务: 轮询循环绝不阻塞等待工作流完成
        let workflow = self.workflow.clone();
        let state_machine = self.state_machine.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let result = workflow.execute().await;

            // 完成信号经STATUS发布: Running -> Ready/Alarm
            if let Err(e) = state_machine.complete(result.is_success()) {
                warn!("工作流结束时状态转换失败: {}", e);
            }

            // 宽限定时器尚未清零时由工作任务清零
            if !cleared.swap(true, Ordering::SeqCst) {
                timer_cancel.cancel();
                if let Err(e) = bus.write_register(command_address, 0).await {
                    warn!("工作任务清零指令寄存器失败: {}", e);
                }
            }

            info!(
                "控制指令执行完成 (任务: {}): {}",
                tracking_id,
                result.message()
            );
        });
    }

    fn record_processed_id(&self, command_id: u16) {
        if command_id != 0 {
            *self.last_processed_id.lock().unwrap() = command_id;
        }
    }

    async fn clear_command_register(&self) -> AppResult<()> {
        self.bus
            .write_register(self.base_address + REG_CONTROL_COMMAND, 0)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::SystemState;
    use crate::services::infrastructure::mock_register_bus::MockRegisterBus;
    use crate::services::infrastructure::register_bus::IRegisterBus;
    use crate::utils::config::TimingConfig;
    use crate::utils::value_codec;

    const ACTUATOR_IDLE_READY: u16 = 1 << 5;

    fn fast_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.timing = TimingConfig {
            handshake_interval_ms: 10,
            command_clear_delay_ms: 60,
            device_poll_interval_ms: 10,
            vision_timeout_ms: 250,
            actuator_timeout_ms: 250,
            actuator_settle_delay_ms: 5,
        };
        config
    }

    struct Fixture {
        main_bus: Arc<MockRegisterBus>,
        actuator_bus: Arc<MockRegisterBus>,
        state_machine: Arc<SystemStateMachine>,
        processor: CommandProcessor,
    }

    async fn build_fixture() -> Fixture {
        let config = fast_config();
        let main_bus = Arc::new(MockRegisterBus::new_for_testing("主服务器"));
        let actuator_bus = Arc::new(MockRegisterBus::new_for_testing("马达"));
        main_bus.connect().await.unwrap();
        actuator_bus.connect().await.unwrap();

        let state_machine = Arc::new(SystemStateMachine::new());
        state_machine.initialize().unwrap();

        let workflow = Arc::new(CorrectionWorkflow::new(
            main_bus.clone(),
            actuator_bus.clone(),
            state_machine.clone(),
            &config,
        ));
        let processor = CommandProcessor::new(
            main_bus.clone(),
            state_machine.clone(),
            workflow,
            &config,
        );
        Fixture {
            main_bus,
            actuator_bus,
            state_machine,
            processor,
        }
    }

    /// 预设一次必然成功的校正环境（角度83.03度）
    fn preset_success_environment(fixture: &Fixture) {
        let (high, low) = value_codec::encode32_int(8303);
        fixture
            .main_bus
            .preset_registers(&[(840, 1), (843, high), (844, low)]);
        fixture.actuator_bus.preset_register(127, ACTUATOR_IDLE_READY);
    }

    /// 等待状态机离开Running（工作任务结束）
    async fn wait_until_idle(fixture: &Fixture) {
        for _ in 0..100 {
            if fixture.state_machine.state() != SystemState::Running {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("工作任务未在预期时间内结束");
    }

    #[tokio::test]
    async fn test_accepted_command_runs_workflow_and_clears_register() {
        let fixture = build_fixture().await;
        preset_success_environment(&fixture);

        fixture.main_bus.preset_register(700, 1);
        fixture.main_bus.preset_register(704, 11);

        fixture.processor.process_pending().await.unwrap();
        assert_eq!(fixture.state_machine.state(), SystemState::Running);

        wait_until_idle(&fixture).await;
        assert_eq!(fixture.state_machine.state(), SystemState::Ready);
        assert_eq!(fixture.state_machine.counters(), (1, 0));
        // 指令寄存器已归零
        assert_eq!(fixture.main_bus.register_value(700), 0);
        // 恰好清零一次: 接受后的清零写入只有一条
        assert_eq!(fixture.main_bus.writes_to(700), vec![0]);
    }

    #[tokio::test]
    async fn test_auto_clear_fires_before_slow_workflow_finishes() {
        let fixture = build_fixture().await;
        // 视觉永不完成: 工作流将在250毫秒后超时，而宽限是60毫秒
        fixture.main_bus.preset_register(700, 1);

        fixture.processor.process_pending().await.unwrap();
        assert_eq!(fixture.state_machine.state(), SystemState::Running);

        // 宽限时间过后指令寄存器必须已清零，即使工作流仍在执行
        sleep(Duration::from_millis(120)).await;
        assert_eq!(fixture.main_bus.register_value(700), 0, "自动清零必须先于工作流完成");
        assert_eq!(fixture.state_machine.state(), SystemState::Running, "工作流此时仍在执行");

        wait_until_idle(&fixture).await;
        assert_eq!(fixture.state_machine.state(), SystemState::Alarm);
        assert_eq!(fixture.state_machine.counters(), (0, 1));
        assert_eq!(fixture.state_machine.error_code(), 2);
    }

    #[tokio::test]
    async fn test_command_rejected_while_running() {
        let fixture = build_fixture().await;
        // 视觉永不完成: 工作流长时间处于Running
        fixture.main_bus.preset_register(700, 1);
        fixture.processor.process_pending().await.unwrap();
        assert_eq!(fixture.state_machine.state(), SystemState::Running);

        // 宽限定时器清零后轮询观察到0
        sleep(Duration::from_millis(90)).await;
        fixture.processor.process_pending().await.unwrap();
        assert_eq!(fixture.main_bus.register_value(700), 0);

        // Running期间外部控制器写入新指令
        fixture.main_bus.preset_register(700, 1);
        fixture.main_bus.preset_register(704, 22);
        fixture.processor.process_pending().await.unwrap();

        // 被立即清零、不排队，计数器不变
        assert_eq!(fixture.main_bus.register_value(700), 0);
        assert_eq!(fixture.state_machine.state(), SystemState::Running);
        assert_eq!(fixture.state_machine.counters(), (0, 0));

        wait_until_idle(&fixture).await;
    }

    #[tokio::test]
    async fn test_duplicate_command_id_suppressed() {
        let fixture = build_fixture().await;
        preset_success_environment(&fixture);

        fixture.main_bus.preset_register(700, 1);
        fixture.main_bus.preset_register(704, 33);
        fixture.processor.process_pending().await.unwrap();
        wait_until_idle(&fixture).await;
        assert_eq!(fixture.state_machine.counters(), (1, 0));

        // 轮询观察到指令寄存器已归零
        fixture.processor.process_pending().await.unwrap();

        // 相同关联ID重新出现: 不再触发工作流
        fixture.main_bus.preset_register(700, 1);
        fixture.processor.process_pending().await.unwrap();
        sleep(Duration::from_millis(50)).await;

        assert_eq!(fixture.state_machine.state(), SystemState::Ready);
        assert_eq!(fixture.state_machine.counters(), (1, 0), "重复指令不得重新执行");
        assert_eq!(fixture.main_bus.register_value(700), 0);
    }

    #[tokio::test]
    async fn test_new_command_id_allows_reexecution() {
        let fixture = build_fixture().await;
        preset_success_environment(&fixture);

        fixture.main_bus.preset_register(700, 1);
        fixture.main_bus.preset_register(704, 40);
        fixture.processor.process_pending().await.unwrap();
        wait_until_idle(&fixture).await;

        // 轮询观察到指令寄存器已归零
        fixture.processor.process_pending().await.unwrap();

        // 新的关联ID: 允许再次执行
        fixture.main_bus.preset_register(700, 1);
        fixture.main_bus.preset_register(704, 41);
        fixture.processor.process_pending().await.unwrap();
        wait_until_idle(&fixture).await;

        assert_eq!(fixture.state_machine.counters(), (2, 0));
    }

    #[tokio::test]
    async fn test_emergency_stop_aborts_running_workflow() {
        let fixture = build_fixture().await;
        // 马达始终报告运动中，工作流会长时间等待
        let (high, low) = value_codec::encode32_int(8303);
        fixture
            .main_bus
            .preset_registers(&[(840, 1), (843, high), (844, low)]);
        fixture.actuator_bus.preset_register(127, 1 << 13);

        fixture.main_bus.preset_register(700, 1);
        fixture.processor.process_pending().await.unwrap();
        assert_eq!(fixture.state_machine.state(), SystemState::Running);

        // 紧急停止: 任意状态下被接受
        sleep(Duration::from_millis(30)).await;
        fixture.main_bus.preset_register(700, 99);
        fixture.processor.process_pending().await.unwrap();

        assert!(fixture.state_machine.is_alarm());
        // 在途工作任务在下次设备轮询观察到Alarm后提前中止
        sleep(Duration::from_millis(60)).await;
        assert!(fixture.state_machine.is_alarm());
        // 马达指令寄存器被失败清理清除
        assert_eq!(fixture.actuator_bus.register_value(125), 0);
    }

    #[tokio::test]
    async fn test_error_reset_restores_ready() {
        let fixture = build_fixture().await;
        fixture.state_machine.force_alarm(4);

        fixture.main_bus.preset_register(700, 7);
        fixture.processor.process_pending().await.unwrap();

        assert!(fixture.state_machine.is_ready());
        assert_eq!(fixture.state_machine.error_code(), 0);
        assert_eq!(fixture.main_bus.register_value(700), 0);
    }

    #[tokio::test]
    async fn test_unknown_command_cleared_without_state_change() {
        let fixture = build_fixture().await;
        fixture.main_bus.preset_register(700, 55);

        fixture.processor.process_pending().await.unwrap();

        assert_eq!(fixture.main_bus.register_value(700), 0);
        assert!(fixture.state_machine.is_ready());
        assert_eq!(fixture.state_machine.counters(), (0, 0));
    }

    #[tokio::test]
    async fn test_actuator_reset_clears_device_command() {
        let fixture = build_fixture().await;
        fixture.actuator_bus.preset_register(125, 8);

        fixture.main_bus.preset_register(700, 2);
        fixture.processor.process_pending().await.unwrap();

        assert_eq!(fixture.actuator_bus.register_value(125), 0);
        assert_eq!(fixture.main_bus.register_value(700), 0);
        assert!(fixture.state_machine.is_ready());
    }
}
