/// 基础设施层服务模块
/// 包含寄存器总线通信的真实实现与Mock实现

/// 寄存器总线通信模块
pub mod register_bus;

/// Mock寄存器总线模块
pub mod mock_register_bus;


pub use mock_register_bus::{MockRegisterBus, RegisterWrite};
pub use register_bus::{
    IRegisterBus, ModbusRtuRegisterBus, ModbusTcpRegisterBus, SharedRegisterBus,
};
