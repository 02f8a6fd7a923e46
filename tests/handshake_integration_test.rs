//! 握手服务集成测试
//!
//! 在Mock寄存器总线上驱动完整的握手流程：状态发布、指令接受与
//! 自动清零、工作流执行、结果发布、至多一个在途工作流。
//! 寄存器地址使用默认映射: 基地址700，视觉基地址800。

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use correction_lib::models::enums::StatusBit;
use correction_lib::services::infrastructure::mock_register_bus::MockRegisterBus;
use correction_lib::services::infrastructure::register_bus::{IRegisterBus, SharedRegisterBus};
use correction_lib::services::{BaseService, HandshakeService};
use correction_lib::utils::config::{AppConfig, TimingConfig};
use correction_lib::utils::value_codec;

/// 就绪且不在运动的马达状态字 (bit5)
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

struct TestHarness {
    main_bus: Arc<MockRegisterBus>,
    actuator_bus: Arc<MockRegisterBus>,
    service: HandshakeService,
}

/// 组装并启动一个完整的握手服务
async fn start_harness() -> TestHarness {
    let main_bus = Arc::new(MockRegisterBus::new_for_testing("主服务器"));
    let actuator_bus = Arc::new(MockRegisterBus::new_for_testing("马达"));

    let mut service = HandshakeService::new(
        fast_config(),
        main_bus.clone() as SharedRegisterBus,
        actuator_bus.clone() as SharedRegisterBus,
    );
    service.initialize().await.expect("初始化应成功");
    service.start();

    // 等待第一个轮询周期完成状态发布
    sleep(Duration::from_millis(40)).await;

    TestHarness {
        main_bus,
        actuator_bus,
        service,
    }
}

/// 预设一次必然成功的校正环境（按0.01度取整后写入寄存器）
fn preset_success_environment(harness: &TestHarness, angle: f64) {
    let (high, low) = value_codec::encode32_int((angle * 100.0).round() as i32);
    harness
        .main_bus
        .preset_registers(&[(840, 1), (843, high), (844, low)]);
    harness
        .actuator_bus
        .preset_register(127, ACTUATOR_IDLE_READY);
}

/// 等待状态寄存器满足条件
async fn wait_for_status(
    harness: &TestHarness,
    predicate: impl Fn(u16) -> bool,
    timeout_ms: u64,
) -> u16 {
    let mut waited = 0;
    loop {
        let word = harness.main_bus.register_value(701);
        if predicate(word) {
            return word;
        }
        assert!(waited < timeout_ms, "等待状态超时，最后状态字: {:#08b}", word);
        sleep(Duration::from_millis(10)).await;
        waited += 10;
    }
}

#[tokio::test]
async fn test_status_published_after_startup() {
    let mut harness = start_harness().await;

    let word = harness.main_bus.register_value(701);
    assert!(StatusBit::Ready.is_set(word), "启动后应发布Ready");
    assert!(StatusBit::Initialized.is_set(word), "启动后应发布Initialized");
    assert!(!StatusBit::Alarm.is_set(word));

    // 统计块: 版本号与零计数
    assert_eq!(harness.main_bus.register_value(741), 1, "次版本号");
    assert_eq!(harness.main_bus.register_value(742), 0, "成功计数低字");
    assert_eq!(harness.main_bus.register_value(744), 0, "错误计数");

    harness.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_full_correction_handshake() {
    let mut harness = start_harness().await;
    preset_success_environment(&harness, 83.03);

    // 外部控制器写入关联ID与指令
    harness.main_bus.write_register(704, 1).await.unwrap();
    harness.main_bus.write_register(700, 1).await.unwrap();

    // 成功计数出现在统计块即代表工作流完成
    let mut waited = 0;
    while harness.main_bus.register_value(742) == 0 {
        assert!(waited < 2000, "成功计数未发布");
        sleep(Duration::from_millis(10)).await;
        waited += 10;
    }
    // 完成后状态回到Ready
    wait_for_status(
        &harness,
        |word| StatusBit::Ready.is_set(word) && !StatusBit::Running.is_set(word),
        1000,
    )
    .await;

    // 指令寄存器已归零
    assert_eq!(harness.main_bus.register_value(700), 0);

    // 结果块: 成功标志与三个数值
    assert_eq!(harness.main_bus.register_value(720), 1);
    let angle = value_codec::decode32(
        harness.main_bus.register_value(721),
        harness.main_bus.register_value(722),
        100,
    );
    assert!((angle - 83.03).abs() < 0.01);
    let position = value_codec::decode32_int(
        harness.main_bus.register_value(725),
        harness.main_bus.register_value(726),
    );
    assert_eq!(position, 8170);

    // 统计块: 成功1次、错误0次
    assert_eq!(harness.main_bus.register_value(742), 1);
    assert_eq!(harness.main_bus.register_value(744), 0);
    // 错误代码寄存器保持0
    assert_eq!(harness.main_bus.register_value(703), 0);

    harness.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_dual_signal_auto_clear_before_completion() {
    let mut harness = start_harness().await;
    // 视觉结果延迟到150毫秒后才出现（慢工作流）
    harness
        .actuator_bus
        .preset_register(127, ACTUATOR_IDLE_READY);
    {
        let main_bus = harness.main_bus.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(150)).await;
            let (high, low) = value_codec::encode32_int(9000);
            main_bus.preset_registers(&[(840, 1), (843, high), (844, low)]);
        });
    }

    harness.main_bus.write_register(704, 2).await.unwrap();
    harness.main_bus.write_register(700, 1).await.unwrap();

    // 宽限时间(60毫秒)过后: 指令寄存器已清零，但工作流仍在Running
    sleep(Duration::from_millis(110)).await;
    assert_eq!(
        harness.main_bus.register_value(700),
        0,
        "指令寄存器应在宽限时间内清零（信号1: 指令已接受）"
    );
    let word = harness.main_bus.register_value(701);
    assert!(
        StatusBit::Running.is_set(word),
        "STATUS应仍显示Running（信号2: 完成与否只看状态寄存器）"
    );

    // 最终完成
    wait_for_status(
        &harness,
        |word| StatusBit::Ready.is_set(word) && !StatusBit::Running.is_set(word),
        2000,
    )
    .await;
    assert_eq!(harness.main_bus.register_value(720), 1);

    harness.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_vision_timeout_publishes_alarm_and_error_code() {
    let mut harness = start_harness().await;
    // 视觉成功标志永不置位 → 工作流超时
    harness
        .actuator_bus
        .preset_register(127, ACTUATOR_IDLE_READY);

    harness.main_bus.write_register(704, 3).await.unwrap();
    harness.main_bus.write_register(700, 1).await.unwrap();

    let word = wait_for_status(&harness, |word| StatusBit::Alarm.is_set(word), 2000).await;
    assert!(!StatusBit::Ready.is_set(word), "Alarm下Ready必须清除");
    assert!(!StatusBit::Running.is_set(word), "Alarm下Running必须清除");

    // 错误代码与计数发布后校验
    let mut waited = 0;
    while harness.main_bus.register_value(703) == 0 {
        assert!(waited < 1000, "错误代码未发布");
        sleep(Duration::from_millis(10)).await;
        waited += 10;
    }
    assert_eq!(harness.main_bus.register_value(703), 2, "超时错误代码为2");
    assert_eq!(harness.main_bus.register_value(744), 1, "错误计数恰好加一");
    assert_eq!(harness.main_bus.register_value(742), 0, "成功计数不变");

    // 指令寄存器依然归零（自动清零与成败无关）
    assert_eq!(harness.main_bus.register_value(700), 0);

    // Alarm粘滞: 新指令被拒绝且立即清零
    harness.main_bus.write_register(704, 4).await.unwrap();
    harness.main_bus.write_register(700, 1).await.unwrap();
    sleep(Duration::from_millis(50)).await;
    assert_eq!(harness.main_bus.register_value(700), 0);
    assert!(StatusBit::Alarm.is_set(harness.main_bus.register_value(701)));
    assert_eq!(harness.main_bus.register_value(742), 0, "被拒绝的指令不触碰计数器");

    // 错误复位指令恢复Ready
    harness.main_bus.write_register(704, 5).await.unwrap();
    harness.main_bus.write_register(700, 7).await.unwrap();
    wait_for_status(&harness, |word| StatusBit::Ready.is_set(word), 1000).await;

    harness.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_second_command_rejected_while_running() {
    let mut harness = start_harness().await;
    // 视觉永不完成: 工作流保持Running直到超时(250毫秒)
    harness.main_bus.write_register(704, 6).await.unwrap();
    harness.main_bus.write_register(700, 1).await.unwrap();

    wait_for_status(&harness, |word| StatusBit::Running.is_set(word), 1000).await;

    // 宽限清零后写入第二条指令
    sleep(Duration::from_millis(80)).await;
    harness.main_bus.write_register(704, 7).await.unwrap();
    harness.main_bus.write_register(700, 1).await.unwrap();
    sleep(Duration::from_millis(50)).await;

    // 第二条被立即清零，系统仍在执行第一条
    assert_eq!(harness.main_bus.register_value(700), 0);

    // 第一条最终超时: 错误计数恰好1，说明没有第二个工作流
    wait_for_status(&harness, |word| StatusBit::Alarm.is_set(word), 2000).await;
    sleep(Duration::from_millis(40)).await;
    assert_eq!(harness.main_bus.register_value(744), 1, "只有一个工作流被执行");
    assert_eq!(harness.main_bus.register_value(742), 0);

    harness.service.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_emergency_stop_latches_alarm() {
    let mut harness = start_harness().await;
    preset_success_environment(&harness, 85.0);
    // 马达始终运动中: 工作流停留在Moving阶段
    harness.actuator_bus.preset_register(127, 1 << 13);

    harness.main_bus.write_register(704, 8).await.unwrap();
    harness.main_bus.write_register(700, 1).await.unwrap();
    wait_for_status(&harness, |word| StatusBit::Running.is_set(word), 1000).await;

    // 紧急停止在Running中被接受
    sleep(Duration::from_millis(80)).await;
    harness.main_bus.write_register(704, 9).await.unwrap();
    harness.main_bus.write_register(700, 99).await.unwrap();

    let word = wait_for_status(&harness, |word| StatusBit::Alarm.is_set(word), 1000).await;
    assert!(!StatusBit::Running.is_set(word));

    // 在途工作任务观察到Alarm后中止，马达指令被清理
    sleep(Duration::from_millis(100)).await;
    assert_eq!(harness.actuator_bus.register_value(125), 0);
    assert!(StatusBit::Alarm.is_set(harness.main_bus.register_value(701)), "Alarm保持粘滞");

    harness.service.shutdown().await.unwrap();
}
