//! 有理数类型, 用于帧率、采样宽高比等场景.
//!
//! 码流中的 time_scale / num_units_in_tick 等字段为 32 位无符号数, 这里使用 u32
//! 分子分母以避免溢出.

use std::fmt;

use serde::Serialize;

/// 无符号有理数
///
/// 例如: 帧率 30000/1001 表示 29.97fps, 宽高比 16/11.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Rational {
    /// 分子
    pub num: u32,
    /// 分母
    pub den: u32,
}

impl Rational {
    /// 创建新的有理数
    pub const fn new(num: u32, den: u32) -> Self {
        Self { num, den }
    }

    /// 判断是否有效 (分母不为 0)
    pub const fn is_valid(&self) -> bool {
        self.den != 0
    }

    /// 转换为 f64 浮点数
    ///
    /// 如果分母为 0, 返回 `f64::NAN`.
    pub fn to_f64(self) -> f64 {
        if self.den == 0 {
            return f64::NAN;
        }
        f64::from(self.num) / f64::from(self.den)
    }

    /// 对有理数进行约分
    pub fn reduce(self) -> Self {
        let g = gcd(self.num, self.den);
        if g <= 1 {
            return self;
        }
        Self {
            num: self.num / g,
            den: self.den / g,
        }
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// 求最大公约数 (欧几里得算法)
fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rational_reduce() {
        // time_scale=60000, 2*num_units_in_tick=2002
        assert_eq!(Rational::new(60000, 2002).reduce(), Rational::new(30000, 1001));
        assert_eq!(Rational::new(0, 0).reduce(), Rational::new(0, 0));
    }

    #[test]
    fn test_rational_to_f64() {
        assert!((Rational::new(50, 2).to_f64() - 25.0).abs() < f64::EPSILON);
        assert!(Rational::new(1, 0).to_f64().is_nan());
        assert!(!Rational::new(1, 0).is_valid());
    }

    #[test]
    fn test_rational_display() {
        assert_eq!(Rational::new(30000, 1001).to_string(), "30000/1001");
    }
}
