//! # 本模块寄存器块布局
//!
//! 所有偏移相对于配置的基地址（默认700），16位字：
//!
//! | 偏移 | 名称 | 访问 | 含义 |
//! |---|---|---|---|
//! | +0 | CONTROL_COMMAND | 外部写 | 0=空闲，N=指令码 |
//! | +1 | STATUS | 外部读 | bit0 Ready, bit1 Running, bit2 Alarm, bit3 Initialized, bit4 视觉检测中, bit5 执行器运动中 |
//! | +3 | ERROR_CODE | 外部读 | 0=无错误，数值在版本间稳定 |
//! | +4 | COMMAND_ID | 外部写 | 调用方提供的指令关联ID，用于重复指令抑制 |
//! | +20..+39 | RESULT_BLOCK | 外部读 | 成功标志 + 各发布量的 (高字, 低字) 对 |
//! | +40..+46 | VERSION/STATS | 外部读 | 版本号、操作/错误计数、运行时间 |
//!
//! ## 双信号契约（重要，请勿"修复"）
//!
//! 指令寄存器在被接受后的宽限时间（默认500毫秒）内自动清零，与工作流
//! 实际完成时刻无关；工作流完成只通过STATUS寄存器的 Running → Ready/Alarm
//! 迁移发出信号。外部控制器必须用STATUS判断完成，而不是指令寄存器。
//! 改变这一行为会破坏既有的外部契约。
//!
//! ## 单写者约定
//!
//! CONTROL_COMMAND假定同一时刻只有一个外部写者（监控PLC）。看板等
//! 其他消费方只按各自节奏读取STATUS与RESULT_BLOCK。这是文档化的约定，
//! 不是代码强制的互斥。

/// 控制指令寄存器偏移
pub const REG_CONTROL_COMMAND: u16 = 0;
/// 状态寄存器偏移
pub const REG_STATUS: u16 = 1;
/// 错误代码寄存器偏移
pub const REG_ERROR_CODE: u16 = 3;
/// 指令关联ID寄存器偏移
pub const REG_COMMAND_ID: u16 = 4;
/// 结果块起始偏移
pub const REG_RESULT_BLOCK: u16 = 20;
/// 统计块起始偏移
pub const REG_STATS_BLOCK: u16 = 40;

/// 结果块长度（字数）
pub const RESULT_BLOCK_LEN: u16 = 20;

// 结果块内部偏移。发布量使用 (高字, 低字) 带符号定点数对。
/// 成功标志
pub const RESULT_SUCCESS: usize = 0;
/// 检测角度高字
pub const RESULT_ANGLE_HIGH: usize = 1;
/// 检测角度低字
pub const RESULT_ANGLE_LOW: usize = 2;
/// 角度差高字
pub const RESULT_DIFF_HIGH: usize = 3;
/// 角度差低字
pub const RESULT_DIFF_LOW: usize = 4;
/// 目标位置高字
pub const RESULT_POSITION_HIGH: usize = 5;
/// 目标位置低字
pub const RESULT_POSITION_LOW: usize = 6;

/// 统计块长度（字数）
pub const STATS_BLOCK_LEN: u16 = 7;

// 统计块内部偏移。计数器沿用 (低字, 高字) 字序——与结果块的
// (高字, 低字) 约定不同，这是既有外部契约的一部分，按字段区分。
/// 主版本号
pub const STATS_VERSION_MAJOR: usize = 0;
/// 次版本号
pub const STATS_VERSION_MINOR: usize = 1;
/// 成功操作计数低字
pub const STATS_OPERATION_LOW: usize = 2;
/// 成功操作计数高字
pub const STATS_OPERATION_HIGH: usize = 3;
/// 错误计数
pub const STATS_ERROR_COUNT: usize = 4;
/// 运行小时数
pub const STATS_UPTIME_HOURS: usize = 5;
/// 运行分钟数
pub const STATS_UPTIME_MINUTES: usize = 6;

/// 对外发布的主版本号
pub const MODULE_VERSION_MAJOR: u16 = 0;
/// 对外发布的次版本号
pub const MODULE_VERSION_MINOR: u16 = 1;

// 视觉检测模块寄存器块内部偏移（相对其基地址，默认800）
/// 视觉模块指令寄存器偏移
pub const VISION_REG_COMMAND: u16 = 0;
/// 视觉模块状态寄存器偏移
pub const VISION_REG_STATUS: u16 = 1;
/// 视觉模块结果块起始偏移
pub const VISION_REG_RESULT: u16 = 40;
/// 视觉结果块内：成功标志偏移
pub const VISION_RESULT_SUCCESS: u16 = 0;
/// 视觉结果块内：角度高字偏移
pub const VISION_RESULT_ANGLE_HIGH: u16 = 3;
/// 视觉结果块内：角度低字偏移
pub const VISION_RESULT_ANGLE_LOW: u16 = 4;

// 执行器状态寄存器位定义
/// 运动中标志位
pub const ACTUATOR_STATUS_MOVING_BIT: u16 = 13;
/// 就绪标志位
pub const ACTUATOR_STATUS_READY_BIT: u16 = 5;
