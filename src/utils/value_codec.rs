//! # 寄存器数值编解码模块
//!
//! 跨寄存器边界的所有浮点量（检测角度、角度差、目标位置）统一使用
//! 32位带符号定点数表示：数值乘以比例因子（典型为100，即0.01精度）后
//! 截断为32位二进制补码整数，再拆分为两个相邻的16位寄存器（高字在前）。
//!
//! 本模块只做纯函数运算，没有副作用，唯一的失败模式是数值超出
//! ±(2^31)/scale 的可表示范围。

use crate::utils::error::{AppError, AppResult};

/// 将带符号小数编码为 (高字, 低字) 寄存器对
///
/// 数值乘以 `scale` 后向零截断；结果必须落在 i32 范围内，
/// 否则返回 `OutOfRange`，绝不允许静默回绕
pub fn encode32(value: f64, scale: u32) -> AppResult<(u16, u16)> {
    if !value.is_finite() {
        return Err(AppError::out_of_range(format!("非法数值: {}", value)));
    }

    let scaled = (value * scale as f64).trunc();
    if scaled < i32::MIN as f64 || scaled > i32::MAX as f64 {
        return Err(AppError::out_of_range(format!(
            "数值 {} 超出比例 {} 下的32位可表示范围",
            value, scale
        )));
    }

    Ok(encode32_int(scaled as i32))
}

/// 将 (高字, 低字) 寄存器对解码为带符号小数
///
/// 合并为32位数值后按二进制补码解释，再除以比例因子恢复精度
pub fn decode32(high: u16, low: u16, scale: u32) -> f64 {
    decode32_int(high, low) as f64 / scale as f64
}

/// 将32位带符号整数拆分为 (高字, 低字) 寄存器对
pub fn encode32_int(value: i32) -> (u16, u16) {
    let raw = value as u32;
    (((raw >> 16) & 0xFFFF) as u16, (raw & 0xFFFF) as u16)
}

/// 将 (高字, 低字) 寄存器对合并为32位带符号整数
pub fn decode32_int(high: u16, low: u16) -> i32 {
    (((high as u32) << 16) | low as u32) as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_roundtrip_positive_angle() {
        let (high, low) = encode32(83.03, 100).unwrap();
        let decoded = decode32(high, low, 100);
        assert!((decoded - 83.03).abs() < 0.01, "解码值应在0.01精度内");
    }

    #[test]
    fn test_roundtrip_negative_value() {
        // 负值经二进制补码往返后必须恢复原值
        let (high, low) = encode32(-12345.67, 100).unwrap();
        let decoded = decode32(high, low, 100);
        assert!((decoded - (-12345.67)).abs() < 0.01);
        // 高字的最高位应为1（补码负数）
        assert!(high & 0x8000 != 0);
    }

    #[test]
    fn test_small_negative_angle() {
        let (high, low) = encode32(-0.5, 100).unwrap();
        assert_eq!(decode32_int(high, low), -50);
        assert!((decode32(high, low, 100) - (-0.5)).abs() < EPS);
    }

    #[test]
    fn test_zero() {
        let (high, low) = encode32(0.0, 100).unwrap();
        assert_eq!((high, low), (0, 0));
        assert_eq!(decode32(0, 0, 100), 0.0);
    }

    #[test]
    fn test_truncation_toward_zero() {
        // 编码按向零截断，不做四舍五入
        let (high, low) = encode32(1.239, 100).unwrap();
        assert_eq!(decode32_int(high, low), 123);
        let (high, low) = encode32(-1.239, 100).unwrap();
        assert_eq!(decode32_int(high, low), -123);
    }

    #[test]
    fn test_out_of_range_rejected() {
        // 超出 ±(2^31)/scale 的数值必须快速失败
        assert!(matches!(
            encode32(22_000_000.0 * 100.0, 100),
            Err(AppError::OutOfRange { .. })
        ));
        assert!(matches!(
            encode32(f64::NAN, 100),
            Err(AppError::OutOfRange { .. })
        ));
        assert!(matches!(
            encode32(f64::INFINITY, 1),
            Err(AppError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_boundary_values() {
        // i32边界值在scale=1下可表示
        let (high, low) = encode32(i32::MAX as f64, 1).unwrap();
        assert_eq!(decode32_int(high, low), i32::MAX);
        let (high, low) = encode32(i32::MIN as f64, 1).unwrap();
        assert_eq!(decode32_int(high, low), i32::MIN);
        // 刚好越界则拒绝
        assert!(encode32(i32::MAX as f64 + 1.0, 1).is_err());
    }

    #[test]
    fn test_int_roundtrip() {
        for value in [0, 1, -1, 8170, -8170, 9000, i32::MAX, i32::MIN] {
            let (high, low) = encode32_int(value);
            assert_eq!(decode32_int(high, low), value, "整数 {} 往返失败", value);
        }
    }

    #[test]
    fn test_wire_convention_matches_external_controller() {
        // 外部控制器按 (high << 16) | low 合并后减 2^32 解释负数，
        // 这里验证与该约定逐位一致
        let (high, low) = encode32(-90.0, 100).unwrap();
        let mut combined = ((high as i64) << 16) | low as i64;
        if combined >= 1 << 31 {
            combined -= 1 << 32;
        }
        assert_eq!(combined, -9000);
    }
}
