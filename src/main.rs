// 角度校正系统主入口
// 加载配置、初始化日志、组装服务并运行握手循环直到收到退出信号

use anyhow::Context;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;

use correction_lib::services::{
    BaseService, HandshakeService, ModbusRtuRegisterBus, ModbusTcpRegisterBus, SharedRegisterBus,
};
use correction_lib::utils::ConfigManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 配置文件路径: 第一个命令行参数，默认当前目录的angle_config.json
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("angle_config.json"));

    let mut config_manager = ConfigManager::new(config_path.clone());
    config_manager
        .load_from_file()
        .await
        .with_context(|| format!("加载配置文件失败: {}", config_path.display()))?;
    config_manager.override_from_env();
    let config = config_manager.get_config().clone();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging_config.log_level.clone()),
    )
    .init();

    info!("角度校正系统启动中...");
    info!("系统架构: Modbus TCP Client + RTU桥接 - 状态机交握模式");
    info!("基地址: {}", config.register_map.base_address);
    info!("CCD基地址: {}", config.register_map.vision_base_address);
    info!(
        "Modbus服务器: {}:{}",
        config.modbus_tcp.host, config.modbus_tcp.port
    );
    info!(
        "马达驱动器: {}, {}, 从站{}",
        config.actuator_rtu.port, config.actuator_rtu.baudrate, config.actuator_rtu.slave_id
    );
    info!("功能: CCD拍照 → 角度计算 → 马达补正");

    let main_bus: SharedRegisterBus = Arc::new(ModbusTcpRegisterBus::new(config.modbus_tcp.clone()));
    let actuator_bus: SharedRegisterBus =
        Arc::new(ModbusRtuRegisterBus::new(config.actuator_rtu.clone()));

    let mut service = HandshakeService::new(config, main_bus, actuator_bus);
    if let Err(e) = service.initialize().await {
        error!("系统初始化失败: {}", e);
        return Err(e.into());
    }
    service.start();

    info!("系统已就绪，等待PLC指令...");
    info!("控制指令:");
    info!("  1 = 角度校正 (拍照→计算→马达移动)");
    info!("  2 = 马达重置");
    info!("  7 = 错误复位");
    info!("  99 = 紧急停止");

    tokio::signal::ctrl_c()
        .await
        .context("等待退出信号失败")?;

    info!("正在关闭角度校正系统...");
    service.shutdown().await?;
    Ok(())
}
