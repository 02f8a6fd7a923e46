//! # 握手服务模块
//!
//! 进程生命周期内运行的固定周期轮询驱动（默认50毫秒）：
//! 每个周期先重新发布状态寄存器，再排空待处理的外部指令。
//! 被接受的指令在分离的工作任务中执行，轮询节拍不受工作流耗时影响。

use async_trait::async_trait;
use log::{error, info, warn};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};
use tokio_util::sync::CancellationToken;

use crate::models::register_map::{
    MODULE_VERSION_MAJOR, MODULE_VERSION_MINOR, REG_STATS_BLOCK, REG_STATUS, STATS_BLOCK_LEN,
    STATS_ERROR_COUNT, STATS_OPERATION_HIGH, STATS_OPERATION_LOW, STATS_UPTIME_HOURS,
    STATS_UPTIME_MINUTES, STATS_VERSION_MAJOR, STATS_VERSION_MINOR,
};
use crate::services::domain::command_processor::CommandProcessor;
use crate::services::domain::correction_workflow::CorrectionWorkflow;
use crate::services::domain::state_machine::SystemStateMachine;
use crate::services::infrastructure::register_bus::SharedRegisterBus;
use crate::services::traits::BaseService;
use crate::utils::config::AppConfig;
use crate::utils::error::{AppError, AppResult};

/// 握手服务
///
/// 持有状态机、指令处理器与两条总线的所有权引用；
/// 没有任何进程级可变全局量，多实例各自独立
pub struct HandshakeService {
    config: AppConfig,
    main_bus: SharedRegisterBus,
    actuator_bus: SharedRegisterBus,
    state_machine: Arc<SystemStateMachine>,
    processor: Arc<CommandProcessor>,
    cancel_token: CancellationToken,
    started_at: Instant,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl HandshakeService {
    /// 创建握手服务，组装状态机、工作流与指令处理器
    pub fn new(
        config: AppConfig,
        main_bus: SharedRegisterBus,
        actuator_bus: SharedRegisterBus,
    ) -> Self {
        let state_machine = Arc::new(SystemStateMachine::new());
        let workflow = Arc::new(CorrectionWorkflow::new(
            main_bus.clone(),
            actuator_bus.clone(),
            state_machine.clone(),
            &config,
        ));
        let processor = Arc::new(CommandProcessor::new(
            main_bus.clone(),
            state_machine.clone(),
            workflow,
            &config,
        ));

        Self {
            config,
            main_bus,
            actuator_bus,
            state_machine,
            processor,
            cancel_token: CancellationToken::new(),
            started_at: Instant::now(),
            loop_handle: Mutex::new(None),
        }
    }

    /// 系统状态机（状态查询用）
    pub fn state_machine(&self) -> Arc<SystemStateMachine> {
        self.state_machine.clone()
    }

    /// 启动握手轮询循环（分离任务）
    pub fn start(&self) {
        let mut handle_guard = self.loop_handle.lock().unwrap();
        if handle_guard.is_some() {
            warn!("握手服务已在运行，忽略重复启动");
            return;
        }

        let main_bus = self.main_bus.clone();
        let state_machine = self.state_machine.clone();
        let processor = self.processor.clone();
        let cancel_token = self.cancel_token.clone();
        let base_address = self.config.register_map.base_address;
        let tick = Duration::from_millis(self.config.timing.handshake_interval_ms);
        let started_at = self.started_at;

        let handle = tokio::spawn(async move {
            info!("角度校正握手同步任务启动 (周期: {:?})", tick);
            let mut ticker = interval(tick);

            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = ticker.tick() => {
                        let tick_result = Self::run_tick(
                            &main_bus,
                            &state_machine,
                            &processor,
                            base_address,
                            started_at,
                        )
                        .await;

                        if let Err(e) = tick_result {
                            // 单次通信失败不退出循环，退避一秒后继续
                            warn!("握手同步错误: {}", e);
                            tokio::select! {
                                _ = cancel_token.cancelled() => break,
                                _ = sleep(Duration::from_secs(1)) => {}
                            }
                        }
                    }
                }
            }

            // 退出前发布最后一次状态
            let _ = Self::publish_status(&main_bus, &state_machine, base_address, started_at).await;
            info!("角度校正握手同步任务停止");
        });

        *handle_guard = Some(handle);
    }

    /// 执行一个轮询周期: 发布状态、排空指令
    async fn run_tick(
        main_bus: &SharedRegisterBus,
        state_machine: &Arc<SystemStateMachine>,
        processor: &Arc<CommandProcessor>,
        base_address: u16,
        started_at: Instant,
    ) -> AppResult<()> {
        Self::publish_status(main_bus, state_machine, base_address, started_at).await?;
        processor.process_pending().await
    }

    /// 发布状态字、错误代码与统计块
    async fn publish_status(
        main_bus: &SharedRegisterBus,
        state_machine: &Arc<SystemStateMachine>,
        base_address: u16,
        started_at: Instant,
    ) -> AppResult<()> {
        let status_word = state_machine.status_word();
        let error_code = state_machine.error_code();
        let (operation_count, error_count) = state_machine.counters();

        // +1 状态字, +2 保留, +3 错误代码
        main_bus
            .write_registers(base_address + REG_STATUS, &[status_word, 0, error_code])
            .await?;

        // 统计块: 版本号 + 计数器 (低字, 高字) + 运行时间
        let uptime_secs = started_at.elapsed().as_secs();
        let mut stats = [0u16; STATS_BLOCK_LEN as usize];
        stats[STATS_VERSION_MAJOR] = MODULE_VERSION_MAJOR;
        stats[STATS_VERSION_MINOR] = MODULE_VERSION_MINOR;
        stats[STATS_OPERATION_LOW] = (operation_count & 0xFFFF) as u16;
        stats[STATS_OPERATION_HIGH] = ((operation_count >> 16) & 0xFFFF) as u16;
        stats[STATS_ERROR_COUNT] = error_count;
        stats[STATS_UPTIME_HOURS] = (uptime_secs / 3600).min(u16::MAX as u64) as u16;
        stats[STATS_UPTIME_MINUTES] = ((uptime_secs % 3600) / 60) as u16;

        main_bus
            .write_registers(base_address + REG_STATS_BLOCK, &stats)
            .await
    }
}

#[async_trait]
impl BaseService for HandshakeService {
    fn service_name(&self) -> &'static str {
        "HandshakeService"
    }

    /// 初始化: 连接两条总线并把状态机带入Ready
    ///
    /// 主服务器连接失败直接报错（无处发布状态）；
    /// 执行器连接失败进入Alarm但服务照常运行，等待外部复位后重试
    async fn initialize(&mut self) -> AppResult<()> {
        info!("=== 角度校正系统初始化开始 ===");

        self.main_bus.connect().await?;
        info!("主服务器连接成功");

        self.state_machine.initialize()?;

        if let Err(e) = self.actuator_bus.connect().await {
            error!("马达驱动器连接失败: {}", e);
            self.state_machine.force_alarm(e.error_code());
        } else {
            info!("马达驱动器连接成功");
        }

        info!("=== 角度校正系统初始化完成 ===");
        Ok(())
    }

    /// 关闭: 停止轮询循环并断开连接
    async fn shutdown(&mut self) -> AppResult<()> {
        info!("正在停止角度校正握手服务...");
        self.cancel_token.cancel();

        let handle = self.loop_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("等待握手任务退出失败: {}", e);
            }
        }

        self.actuator_bus.disconnect().await?;
        self.main_bus.disconnect().await?;
        info!("角度校正系统已断开所有连接");
        Ok(())
    }

    async fn health_check(&self) -> AppResult<()> {
        if !self.main_bus.is_connected().await {
            return Err(AppError::connection_error("主服务器连接不可用"));
        }
        if !self.actuator_bus.is_connected().await {
            return Err(AppError::connection_error("马达驱动器连接不可用"));
        }
        Ok(())
    }
}
