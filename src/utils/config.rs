use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::utils::error::{AppError, AppResult};

/// 应用程序主配置结构
/// 包含角度校正系统运行所需的所有配置信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// 应用程序基本设置
    pub app_settings: AppSettings,
    /// Modbus TCP主服务器连接配置
    pub modbus_tcp: ModbusTcpConfig,
    /// 执行器（马达驱动器）RTU连接配置
    pub actuator_rtu: ActuatorRtuConfig,
    /// 寄存器地址映射配置
    pub register_map: RegisterMapConfig,
    /// 角度计算配置
    pub angle_calculation: AngleCalculationConfig,
    /// 时序配置
    pub timing: TimingConfig,
    /// 日志配置
    pub logging_config: LoggingConfig,
}

/// 应用程序基本设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// 模块标识
    pub module_id: String,
    /// 应用程序版本
    pub app_version: String,
    /// 是否启用调试模式
    pub debug_mode: bool,
}

/// Modbus TCP主服务器连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusTcpConfig {
    /// 服务器IP地址
    pub host: String,
    /// 服务器端口
    pub port: u16,
    /// 从站ID
    pub unit_id: u8,
    /// 连接超时时间（毫秒）
    pub connection_timeout_ms: u64,
    /// 读取超时时间（毫秒）
    pub read_timeout_ms: u64,
    /// 写入超时时间（毫秒）
    pub write_timeout_ms: u64,
}

/// 执行器RTU连接配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActuatorRtuConfig {
    /// 串口设备路径
    pub port: String,
    /// 波特率
    pub baudrate: u32,
    /// 校验位 (N / E / O)
    pub parity: String,
    /// 停止位
    pub stopbits: u8,
    /// 数据位
    pub bytesize: u8,
    /// 读写超时时间（毫秒）
    pub timeout_ms: u64,
    /// 从站ID
    pub slave_id: u8,
}

/// 寄存器地址映射配置
///
/// 所有地址均为配置项，编排器内部不得硬编码设备地址
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterMapConfig {
    /// 本模块寄存器块基地址
    pub base_address: u16,
    /// 视觉检测模块寄存器块基地址
    pub vision_base_address: u16,
    /// 视觉检测触发指令值（拍照+角度检测）
    pub vision_detect_command: u16,
    /// 视觉检测模式参数寄存器偏移（基地址+偏移），None表示不下发模式
    pub vision_mode_offset: Option<u16>,
    /// 下发的视觉检测模式值
    pub vision_detection_mode: u16,
    /// 执行器目标位置寄存器地址
    pub actuator_position_register: u16,
    /// 执行器指令寄存器地址
    pub actuator_command_register: u16,
    /// 执行器状态寄存器地址
    pub actuator_status_register: u16,
    /// 执行器移动指令值
    pub actuator_move_command: u16,
}

/// 角度计算配置
///
/// 目标位置公式: base_position - round(检测角度 × angle_multiplier)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AngleCalculationConfig {
    /// 校正目标角度（度）
    pub target_angle: f64,
    /// 执行器基准位置（设备原生单位）
    pub base_position: i32,
    /// 角度到位置的线性系数
    pub angle_multiplier: f64,
    /// 定点数比例因子（×100即0.01度精度）
    pub value_scale: u32,
}

/// 时序配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// 握手轮询周期（毫秒）
    pub handshake_interval_ms: u64,
    /// 指令寄存器自动清零宽限时间（毫秒）
    pub command_clear_delay_ms: u64,
    /// 设备完成标志轮询间隔（毫秒）
    pub device_poll_interval_ms: u64,
    /// 视觉检测超时（毫秒）
    pub vision_timeout_ms: u64,
    /// 执行器运动超时（毫秒）
    pub actuator_timeout_ms: u64,
    /// 写入目标位置后到下发移动指令前的稳定延迟（毫秒）
    pub actuator_settle_delay_ms: u64,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别 (debug, info, warn, error)
    pub log_level: String,
    /// 是否启用控制台输出
    pub console_output: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            app_settings: AppSettings::default(),
            modbus_tcp: ModbusTcpConfig::default(),
            actuator_rtu: ActuatorRtuConfig::default(),
            register_map: RegisterMapConfig::default(),
            angle_calculation: AngleCalculationConfig::default(),
            timing: TimingConfig::default(),
            logging_config: LoggingConfig::default(),
        }
    }
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            module_id: "Angle_Adjustment_System".to_string(),
            app_version: "0.1.0".to_string(),
            debug_mode: false,
        }
    }
}

impl Default for ModbusTcpConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 502,
            unit_id: 1,
            connection_timeout_ms: 3000,
            read_timeout_ms: 1000,
            write_timeout_ms: 1000,
        }
    }
}

impl Default for ActuatorRtuConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baudrate: 115200,
            parity: "N".to_string(),
            stopbits: 1,
            bytesize: 8,
            timeout_ms: 1000,
            slave_id: 3,
        }
    }
}

impl Default for RegisterMapConfig {
    fn default() -> Self {
        Self {
            base_address: 700,
            vision_base_address: 800,
            vision_detect_command: 16,
            vision_mode_offset: Some(10),
            vision_detection_mode: 0,
            actuator_position_register: 6147,
            actuator_command_register: 125,
            actuator_status_register: 127,
            actuator_move_command: 8,
        }
    }
}

impl Default for AngleCalculationConfig {
    fn default() -> Self {
        Self {
            target_angle: 90.0,
            base_position: 9000,
            angle_multiplier: 10.0,
            value_scale: 100,
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            handshake_interval_ms: 50,
            command_clear_delay_ms: 500,
            device_poll_interval_ms: 100,
            vision_timeout_ms: 10_000,
            actuator_timeout_ms: 30_000,
            actuator_settle_delay_ms: 100,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            console_output: true,
        }
    }
}

/// 配置管理器
/// 负责加载、保存和管理应用程序配置
pub struct ConfigManager {
    config: AppConfig,
    config_file_path: PathBuf,
}

impl ConfigManager {
    /// 创建新的配置管理器
    pub fn new(config_file_path: PathBuf) -> Self {
        Self {
            config: AppConfig::default(),
            config_file_path,
        }
    }

    /// 从文件加载配置
    /// 配置文件不存在时写出默认配置文件后返回默认值
    pub async fn load_from_file(&mut self) -> AppResult<()> {
        if !self.config_file_path.exists() {
            self.save_to_file().await?;
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.config_file_path)
            .await
            .map_err(|e| {
                AppError::io_error(format!("读取配置文件失败: {}", e), e.kind().to_string())
            })?;

        self.config = serde_json::from_str(&content)
            .map_err(|e| AppError::configuration_error(format!("解析配置文件失败: {}", e)))?;

        Ok(())
    }

    /// 将配置保存到文件
    pub async fn save_to_file(&self) -> AppResult<()> {
        // 确保目录存在
        if let Some(parent) = self.config_file_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    AppError::io_error(format!("创建配置目录失败: {}", e), e.kind().to_string())
                })?;
            }
        }

        let content = serde_json::to_string_pretty(&self.config)
            .map_err(|e| AppError::json_error(format!("序列化配置失败: {}", e)))?;

        tokio::fs::write(&self.config_file_path, content)
            .await
            .map_err(|e| {
                AppError::io_error(format!("写入配置文件失败: {}", e), e.kind().to_string())
            })?;

        Ok(())
    }

    /// 从环境变量覆盖配置
    pub fn override_from_env(&mut self) {
        if let Ok(host) = std::env::var("MODBUS_HOST") {
            self.config.modbus_tcp.host = host;
        }
        if let Ok(port) = std::env::var("MODBUS_PORT") {
            if let Ok(port) = port.parse::<u16>() {
                self.config.modbus_tcp.port = port;
            }
        }
        if let Ok(port) = std::env::var("ACTUATOR_PORT") {
            self.config.actuator_rtu.port = port;
        }
        if let Ok(log_level) = std::env::var("LOG_LEVEL") {
            self.config.logging_config.log_level = log_level;
        }
        if let Ok(debug) = std::env::var("DEBUG_MODE") {
            self.config.app_settings.debug_mode = debug.to_lowercase() == "true";
        }
    }

    /// 获取配置的只读引用
    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// 获取配置的可变引用
    pub fn get_config_mut(&mut self) -> &mut AppConfig {
        &mut self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_default_config_created_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("angle_config.json");

        let mut manager = ConfigManager::new(path.clone());
        manager.load_from_file().await.unwrap();

        assert!(path.exists(), "缺失时应写出默认配置文件");
        assert_eq!(manager.get_config().register_map.base_address, 700);
        assert_eq!(manager.get_config().angle_calculation.base_position, 9000);
    }

    #[tokio::test]
    async fn test_config_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("angle_config.json");

        let mut manager = ConfigManager::new(path.clone());
        manager.get_config_mut().modbus_tcp.host = "192.168.1.10".to_string();
        manager.get_config_mut().timing.vision_timeout_ms = 5000;
        manager.save_to_file().await.unwrap();

        let mut reloaded = ConfigManager::new(path);
        reloaded.load_from_file().await.unwrap();
        assert_eq!(reloaded.get_config().modbus_tcp.host, "192.168.1.10");
        assert_eq!(reloaded.get_config().timing.vision_timeout_ms, 5000);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("angle_config.json");
        tokio::fs::write(&path, "not json").await.unwrap();

        let mut manager = ConfigManager::new(path);
        let result = manager.load_from_file().await;
        assert!(matches!(result, Err(AppError::ConfigurationError { .. })));
    }
}
