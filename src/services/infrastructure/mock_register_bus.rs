/// Mock寄存器总线实现
/// 用于开发和测试阶段，模拟真实的寄存器空间读写行为

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::services::infrastructure::register_bus::IRegisterBus;
use crate::utils::error::{AppError, AppResult};

/// 写入操作记录
/// 用于测试验证写入操作是否按预期执行
#[derive(Debug, Clone)]
pub struct RegisterWrite {
    /// 写入时间戳
    pub timestamp: DateTime<Utc>,
    /// 写入地址
    pub address: u16,
    /// 写入的值
    pub values: Vec<u16>,
}

/// Mock寄存器总线
///
/// 提供完整的寄存器空间模拟：预设读取值、记录写入日志、
/// 注入连接失败与不完整响应，供单元测试与集成测试共用
pub struct MockRegisterBus {
    bus_name: String,
    connected: Arc<Mutex<bool>>,
    /// 内部寄存器空间（地址 -> 值），未写过的地址读出0
    registers: Arc<Mutex<HashMap<u16, u16>>>,
    /// 写入操作记录
    write_log: Arc<Mutex<Vec<RegisterWrite>>>,
    /// 接下来注入失败的操作次数
    fail_next_operations: Arc<Mutex<u32>>,
    /// 从这些起始地址读取时返回数量不足的响应
    short_read_addresses: Arc<Mutex<HashSet<u16>>>,
    /// 是否模拟网络延迟
    simulate_network_delay: bool,
    /// 网络延迟时间（毫秒）
    network_delay_ms: u64,
    /// 是否模拟随机错误
    simulate_errors: bool,
    /// 错误率（0.0-1.0）
    error_rate: f64,
}

impl MockRegisterBus {
    /// 创建新的Mock总线实例
    pub fn new(bus_name: impl Into<String>) -> Self {
        Self {
            bus_name: bus_name.into(),
            connected: Arc::new(Mutex::new(false)),
            registers: Arc::new(Mutex::new(HashMap::new())),
            write_log: Arc::new(Mutex::new(Vec::new())),
            fail_next_operations: Arc::new(Mutex::new(0)),
            short_read_addresses: Arc::new(Mutex::new(HashSet::new())),
            simulate_network_delay: true,
            network_delay_ms: 5,
            simulate_errors: false,
            error_rate: 0.01,
        }
    }

    /// 创建用于测试的Mock总线实例
    /// 禁用网络延迟和随机错误，以便快速稳定地测试
    pub fn new_for_testing(bus_name: impl Into<String>) -> Self {
        let mut bus = Self::new(bus_name);
        bus.simulate_network_delay = false;
        bus.simulate_errors = false;
        bus
    }

    /// 预设单个寄存器值
    pub fn preset_register(&self, address: u16, value: u16) {
        self.registers.lock().unwrap().insert(address, value);
    }

    /// 预设多个寄存器值
    pub fn preset_registers(&self, values: &[(u16, u16)]) {
        let mut registers = self.registers.lock().unwrap();
        for (address, value) in values {
            registers.insert(*address, *value);
        }
    }

    /// 读取当前寄存器值（测试断言用，不计入日志）
    pub fn register_value(&self, address: u16) -> u16 {
        *self.registers.lock().unwrap().get(&address).unwrap_or(&0)
    }

    /// 注入接下来N次操作失败
    pub fn inject_failures(&self, count: u32) {
        *self.fail_next_operations.lock().unwrap() = count;
    }

    /// 注入不完整响应：从该起始地址读取时返回少一个寄存器
    pub fn inject_short_read(&self, address: u16) {
        self.short_read_addresses.lock().unwrap().insert(address);
    }

    /// 获取写入日志
    pub fn get_write_log(&self) -> Vec<RegisterWrite> {
        self.write_log.lock().unwrap().clone()
    }

    /// 获取写入过指定地址的所有值（按时间顺序）
    pub fn writes_to(&self, address: u16) -> Vec<u16> {
        self.write_log
            .lock()
            .unwrap()
            .iter()
            .filter(|w| {
                address >= w.address && (address as usize) < w.address as usize + w.values.len()
            })
            .map(|w| w.values[(address - w.address) as usize])
            .collect()
    }

    /// 清空写入日志
    pub fn clear_write_log(&self) {
        self.write_log.lock().unwrap().clear();
    }

    fn check_connected(&self) -> AppResult<()> {
        if !*self.connected.lock().unwrap() {
            return Err(AppError::connection_error(format!(
                "{} 未连接",
                self.bus_name
            )));
        }
        Ok(())
    }

    fn check_injected_failure(&self) -> AppResult<()> {
        let mut remaining = self.fail_next_operations.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(AppError::connection_error(format!(
                "{} 注入的连接故障",
                self.bus_name
            )));
        }
        if self.simulate_errors && rand::thread_rng().gen_bool(self.error_rate) {
            return Err(AppError::connection_error(format!(
                "{} 模拟的随机通信错误",
                self.bus_name
            )));
        }
        Ok(())
    }

    async fn simulate_delay(&self) {
        if self.simulate_network_delay {
            sleep(Duration::from_millis(self.network_delay_ms)).await;
        }
    }
}

#[async_trait]
impl IRegisterBus for MockRegisterBus {
    fn bus_name(&self) -> &str {
        &self.bus_name
    }

    async fn connect(&self) -> AppResult<()> {
        self.simulate_delay().await;
        self.check_injected_failure()?;
        *self.connected.lock().unwrap() = true;
        Ok(())
    }

    async fn disconnect(&self) -> AppResult<()> {
        *self.connected.lock().unwrap() = false;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        *self.connected.lock().unwrap()
    }

    async fn read_registers(&self, address: u16, count: u16) -> AppResult<Vec<u16>> {
        self.simulate_delay().await;
        self.check_connected()?;
        self.check_injected_failure()?;

        // 不完整响应注入：模拟设备返回的寄存器数量少于请求
        let effective_count = if self.short_read_addresses.lock().unwrap().contains(&address) {
            count.saturating_sub(1)
        } else {
            count
        };

        let registers = self.registers.lock().unwrap();
        Ok((0..effective_count)
            .map(|offset| *registers.get(&(address + offset)).unwrap_or(&0))
            .collect())
    }

    async fn write_register(&self, address: u16, value: u16) -> AppResult<()> {
        self.simulate_delay().await;
        self.check_connected()?;
        self.check_injected_failure()?;

        self.registers.lock().unwrap().insert(address, value);
        self.write_log.lock().unwrap().push(RegisterWrite {
            timestamp: Utc::now(),
            address,
            values: vec![value],
        });
        Ok(())
    }

    async fn write_registers(&self, address: u16, values: &[u16]) -> AppResult<()> {
        self.simulate_delay().await;
        self.check_connected()?;
        self.check_injected_failure()?;

        {
            let mut registers = self.registers.lock().unwrap();
            for (offset, value) in values.iter().enumerate() {
                registers.insert(address + offset as u16, *value);
            }
        }
        self.write_log.lock().unwrap().push(RegisterWrite {
            timestamp: Utc::now(),
            address,
            values: values.to_vec(),
        });
        Ok(())
    }
}
