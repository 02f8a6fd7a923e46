//! # 寄存器总线通信模块
//!
//! ## 业务作用
//! 本模块是系统与外部设备通信的基础设施层实现，负责：
//! - 提供统一的寄存器读写接口，上层不感知TCP/RTU差异
//! - 管理连接生命周期，重连时整体替换底层句柄
//! - 把原始传输错误在本层边界转换为统一错误类型，绝不向上泄漏
//! - 对不完整的设备响应（返回寄存器数量少于请求）报告连接错误，
//!   绝不把缺失数据当作零值
//!
//! ## 架构设计
//! - `IRegisterBus`: 统一的总线接口trait
//! - `ModbusTcpRegisterBus`: 共享寄存器空间（主服务器）的TCP实现
//! - `ModbusRtuRegisterBus`: 马达驱动器串口RTU实现
//!
//! ## Rust知识点
//! - **Arc<Mutex<Option<Context>>>**: 句柄在锁内整体替换，
//!   使用者永远不会观察到半重连状态
//! - **async_trait**: 在trait中定义异步方法，支持动态分发

use async_trait::async_trait;
use log::{debug, info, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::client::Context as ModbusClientContext;
use tokio_modbus::prelude::*;

use crate::utils::config::{ActuatorRtuConfig, ModbusTcpConfig};
use crate::utils::error::{AppError, AppResult};

/// 寄存器总线统一接口
///
/// 每个设备连接独占自己的传输句柄；同一总线上的请求经由内部锁串行化
#[async_trait]
pub trait IRegisterBus: Send + Sync {
    /// 总线名称（用于日志）
    fn bus_name(&self) -> &str;

    /// 建立连接；已连接时重建并整体替换句柄
    async fn connect(&self) -> AppResult<()>;

    /// 断开连接
    async fn disconnect(&self) -> AppResult<()>;

    /// 当前是否已连接
    async fn is_connected(&self) -> bool;

    /// 读取保持寄存器，保证返回恰好 `count` 个字
    async fn read_registers(&self, address: u16, count: u16) -> AppResult<Vec<u16>>;

    /// 写入单个保持寄存器
    async fn write_register(&self, address: u16, value: u16) -> AppResult<()>;

    /// 批量写入保持寄存器
    async fn write_registers(&self, address: u16, values: &[u16]) -> AppResult<()>;
}

/// 共享的总线句柄类型
pub type SharedRegisterBus = Arc<dyn IRegisterBus>;

/// 校验设备响应的寄存器数量
///
/// 响应字数少于请求属于连接错误（畸形/截断数据），
/// 静默当作零值处理是潜在缺陷模式，必须在此拦截
fn check_register_count(bus_name: &str, address: u16, expected: u16, actual: usize) -> AppResult<()> {
    if actual != expected as usize {
        return Err(AppError::connection_error(format!(
            "{} 地址{} 返回寄存器数量不足: 期望{}个, 实际{}个",
            bus_name, address, expected, actual
        )));
    }
    Ok(())
}

/// Modbus TCP寄存器总线实现
///
/// 连接共享寄存器空间（主服务器），本模块寄存器块与视觉模块
/// 寄存器块都通过它访问
pub struct ModbusTcpRegisterBus {
    config: ModbusTcpConfig,
    context: Arc<Mutex<Option<ModbusClientContext>>>,
}

impl ModbusTcpRegisterBus {
    /// 创建新的TCP总线实例（不建立连接）
    pub fn new(config: ModbusTcpConfig) -> Self {
        Self {
            config,
            context: Arc::new(Mutex::new(None)),
        }
    }

    fn socket_addr(&self) -> AppResult<SocketAddr> {
        format!("{}:{}", self.config.host, self.config.port)
            .parse::<SocketAddr>()
            .map_err(|e| {
                AppError::configuration_error(format!("无效的IP地址或端口: {}", e))
            })
    }
}

#[async_trait]
impl IRegisterBus for ModbusTcpRegisterBus {
    fn bus_name(&self) -> &str {
        "ModbusTCP主服务器"
    }

    async fn connect(&self) -> AppResult<()> {
        let socket_addr = self.socket_addr()?;
        let slave = Slave(self.config.unit_id);

        info!("正在连接Modbus TCP主服务器: {}", socket_addr);

        let connect_future = tcp::connect_slave(socket_addr, slave);
        let new_context = timeout(
            Duration::from_millis(self.config.connection_timeout_ms),
            connect_future,
        )
        .await
        .map_err(|_| {
            AppError::connection_error(format!(
                "连接Modbus服务器超时: {} ({}毫秒)",
                socket_addr, self.config.connection_timeout_ms
            ))
        })?
        .map_err(|e| AppError::connection_error(format!("连接Modbus服务器失败: {}", e)))?;

        // 在同一把锁内整体替换句柄，使用者不会观察到半重连状态
        let mut guard = self.context.lock().await;
        *guard = Some(new_context);

        info!("Modbus TCP主服务器连接成功: {}", socket_addr);
        Ok(())
    }

    async fn disconnect(&self) -> AppResult<()> {
        let mut guard = self.context.lock().await;
        if let Some(mut context) = guard.take() {
            if let Err(e) = context.disconnect().await {
                warn!("关闭Modbus TCP连接时发生错误: {}", e);
            }
            info!("Modbus TCP连接已断开");
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.context.lock().await.is_some()
    }

    async fn read_registers(&self, address: u16, count: u16) -> AppResult<Vec<u16>> {
        let mut guard = self.context.lock().await;
        let context = guard
            .as_mut()
            .ok_or_else(|| AppError::connection_error("Modbus TCP未连接"))?;

        let registers = match timeout(
            Duration::from_millis(self.config.read_timeout_ms),
            context.read_holding_registers(address, count),
        )
        .await
        {
            Ok(Ok(Ok(registers))) => registers,
            Ok(Ok(Err(exception))) => {
                return Err(AppError::connection_error(format!(
                    "读取寄存器{}返回Modbus异常: {:?}",
                    address, exception
                )))
            }
            Ok(Err(e)) => {
                return Err(AppError::connection_error(format!(
                    "读取寄存器{}失败: {}",
                    address, e
                )))
            }
            Err(_) => {
                return Err(AppError::connection_error(format!(
                    "读取寄存器{}超时 ({}毫秒)",
                    address, self.config.read_timeout_ms
                )))
            }
        };

        check_register_count(self.bus_name(), address, count, registers.len())?;
        Ok(registers)
    }

    async fn write_register(&self, address: u16, value: u16) -> AppResult<()> {
        let mut guard = self.context.lock().await;
        let context = guard
            .as_mut()
            .ok_or_else(|| AppError::connection_error("Modbus TCP未连接"))?;

        match timeout(
            Duration::from_millis(self.config.write_timeout_ms),
            context.write_single_register(address, value),
        )
        .await
        {
            Ok(Ok(Ok(()))) => {
                debug!("写入寄存器成功: 地址{}, 值{}", address, value);
                Ok(())
            }
            Ok(Ok(Err(exception))) => Err(AppError::connection_error(format!(
                "写入寄存器{}返回Modbus异常: {:?}",
                address, exception
            ))),
            Ok(Err(e)) => Err(AppError::connection_error(format!(
                "写入寄存器{}失败: {}",
                address, e
            ))),
            Err(_) => Err(AppError::connection_error(format!(
                "写入寄存器{}超时 ({}毫秒)",
                address, self.config.write_timeout_ms
            ))),
        }
    }

    async fn write_registers(&self, address: u16, values: &[u16]) -> AppResult<()> {
        let mut guard = self.context.lock().await;
        let context = guard
            .as_mut()
            .ok_or_else(|| AppError::connection_error("Modbus TCP未连接"))?;

        match timeout(
            Duration::from_millis(self.config.write_timeout_ms),
            context.write_multiple_registers(address, values),
        )
        .await
        {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(exception))) => Err(AppError::connection_error(format!(
                "批量写入寄存器{}返回Modbus异常: {:?}",
                address, exception
            ))),
            Ok(Err(e)) => Err(AppError::connection_error(format!(
                "批量写入寄存器{}失败: {}",
                address, e
            ))),
            Err(_) => Err(AppError::connection_error(format!(
                "批量写入寄存器{}超时 ({}毫秒)",
                address, self.config.write_timeout_ms
            ))),
        }
    }
}

/// Modbus RTU寄存器总线实现（马达驱动器串口链路）
pub struct ModbusRtuRegisterBus {
    config: ActuatorRtuConfig,
    context: Arc<Mutex<Option<ModbusClientContext>>>,
}

impl ModbusRtuRegisterBus {
    /// 创建新的RTU总线实例（不建立连接）
    pub fn new(config: ActuatorRtuConfig) -> Self {
        Self {
            config,
            context: Arc::new(Mutex::new(None)),
        }
    }

    fn parity(&self) -> AppResult<tokio_serial::Parity> {
        match self.config.parity.as_str() {
            "N" | "n" => Ok(tokio_serial::Parity::None),
            "E" | "e" => Ok(tokio_serial::Parity::Even),
            "O" | "o" => Ok(tokio_serial::Parity::Odd),
            other => Err(AppError::configuration_error(format!(
                "无效的串口校验位配置: {}",
                other
            ))),
        }
    }

    fn stop_bits(&self) -> AppResult<tokio_serial::StopBits> {
        match self.config.stopbits {
            1 => Ok(tokio_serial::StopBits::One),
            2 => Ok(tokio_serial::StopBits::Two),
            other => Err(AppError::configuration_error(format!(
                "无效的串口停止位配置: {}",
                other
            ))),
        }
    }

    fn data_bits(&self) -> AppResult<tokio_serial::DataBits> {
        match self.config.bytesize {
            5 => Ok(tokio_serial::DataBits::Five),
            6 => Ok(tokio_serial::DataBits::Six),
            7 => Ok(tokio_serial::DataBits::Seven),
            8 => Ok(tokio_serial::DataBits::Eight),
            other => Err(AppError::configuration_error(format!(
                "无效的串口数据位配置: {}",
                other
            ))),
        }
    }
}

#[async_trait]
impl IRegisterBus for ModbusRtuRegisterBus {
    fn bus_name(&self) -> &str {
        "马达驱动器RTU"
    }

    async fn connect(&self) -> AppResult<()> {
        info!(
            "正在连接马达驱动器RTU: {}, 波特率: {}",
            self.config.port, self.config.baudrate
        );

        let builder = tokio_serial::new(self.config.port.clone(), self.config.baudrate)
            .parity(self.parity()?)
            .stop_bits(self.stop_bits()?)
            .data_bits(self.data_bits()?)
            .timeout(Duration::from_millis(self.config.timeout_ms));

        let stream = tokio_serial::SerialStream::open(&builder).map_err(|e| {
            AppError::connection_error(format!(
                "打开串口{}失败: {}",
                self.config.port, e
            ))
        })?;

        let new_context = rtu::attach_slave(stream, Slave(self.config.slave_id));

        let mut guard = self.context.lock().await;
        *guard = Some(new_context);

        info!(
            "马达驱动器RTU连接成功: {}, 从站{}",
            self.config.port, self.config.slave_id
        );
        Ok(())
    }

    async fn disconnect(&self) -> AppResult<()> {
        let mut guard = self.context.lock().await;
        if guard.take().is_some() {
            info!("马达驱动器RTU连接已关闭");
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.context.lock().await.is_some()
    }

    async fn read_registers(&self, address: u16, count: u16) -> AppResult<Vec<u16>> {
        let mut guard = self.context.lock().await;
        let context = guard
            .as_mut()
            .ok_or_else(|| AppError::connection_error("马达驱动器RTU未连接"))?;

        let registers = match timeout(
            Duration::from_millis(self.config.timeout_ms),
            context.read_holding_registers(address, count),
        )
        .await
        {
            Ok(Ok(Ok(registers))) => registers,
            Ok(Ok(Err(exception))) => {
                return Err(AppError::connection_error(format!(
                    "读取马达寄存器{}返回Modbus异常: {:?}",
                    address, exception
                )))
            }
            Ok(Err(e)) => {
                return Err(AppError::connection_error(format!(
                    "读取马达寄存器{}失败: {}",
                    address, e
                )))
            }
            Err(_) => {
                return Err(AppError::connection_error(format!(
                    "读取马达寄存器{}超时 ({}毫秒)",
                    address, self.config.timeout_ms
                )))
            }
        };

        check_register_count(self.bus_name(), address, count, registers.len())?;
        Ok(registers)
    }

    async fn write_register(&self, address: u16, value: u16) -> AppResult<()> {
        let mut guard = self.context.lock().await;
        let context = guard
            .as_mut()
            .ok_or_else(|| AppError::connection_error("马达驱动器RTU未连接"))?;

        match timeout(
            Duration::from_millis(self.config.timeout_ms),
            context.write_single_register(address, value),
        )
        .await
        {
            Ok(Ok(Ok(()))) => {
                debug!("写入马达寄存器成功: 地址{}, 值{}", address, value);
                Ok(())
            }
            Ok(Ok(Err(exception))) => Err(AppError::connection_error(format!(
                "写入马达寄存器{}返回Modbus异常: {:?}",
                address, exception
            ))),
            Ok(Err(e)) => Err(AppError::connection_error(format!(
                "写入马达寄存器{}失败: {}",
                address, e
            ))),
            Err(_) => Err(AppError::connection_error(format!(
                "写入马达寄存器{}超时 ({}毫秒)",
                address, self.config.timeout_ms
            ))),
        }
    }

    async fn write_registers(&self, address: u16, values: &[u16]) -> AppResult<()> {
        let mut guard = self.context.lock().await;
        let context = guard
            .as_mut()
            .ok_or_else(|| AppError::connection_error("马达驱动器RTU未连接"))?;

        match timeout(
            Duration::from_millis(self.config.timeout_ms),
            context.write_multiple_registers(address, values),
        )
        .await
        {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(exception))) => Err(AppError::connection_error(format!(
                "批量写入马达寄存器{}返回Modbus异常: {:?}",
                address, exception
            ))),
            Ok(Err(e)) => Err(AppError::connection_error(format!(
                "批量写入马达寄存器{}失败: {}",
                address, e
            ))),
            Err(_) => Err(AppError::connection_error(format!(
                "批量写入马达寄存器{}超时 ({}毫秒)",
                address, self.config.timeout_ms
            ))),
        }
    }
}
