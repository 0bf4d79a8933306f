//! 配置值类型
//!
//! 约束可以存入配置节的值类型，并提供语义类型标签与范围边界转换

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;

/// 配置值的语义类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// 布尔开关
    Bool,
    /// 整数
    Integer,
    /// 浮点数
    Float,
    /// 字符串
    String,
    /// 枚举
    Enum,
    /// 可空值
    Optional,
    /// 列表
    List,
    /// 其他可序列化结构
    Other,
}

impl ValueKind {
    /// 是否为数值类型（可附加范围约束）
    pub fn is_numeric(self) -> bool {
        matches!(self, ValueKind::Integer | ValueKind::Float)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Bool => "bool",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::Enum => "enum",
            ValueKind::Optional => "optional",
            ValueKind::List => "list",
            ValueKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// 可存入配置节的值
///
/// 未设置的键回落到 [`Default`]，持久化经由 serde。
/// 自定义枚举实现本 trait 时把 `KIND` 设为 [`ValueKind::Enum`] 即可。
pub trait ConfigValue:
    Clone + fmt::Debug + Default + PartialEq + PartialOrd + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// 语义类型标签
    const KIND: ValueKind;

    /// 把浮点范围边界转换为本类型，无法表示时返回 `None`
    fn from_range_bound(_bound: f64) -> Option<Self> {
        None
    }

    /// 是否落在 `[min, max]` 内
    fn within_range(&self, min: &Self, max: &Self) -> bool {
        self >= min && self <= max
    }
}

impl ConfigValue for bool {
    const KIND: ValueKind = ValueKind::Bool;
}

impl ConfigValue for String {
    const KIND: ValueKind = ValueKind::String;
}

impl ConfigValue for f32 {
    const KIND: ValueKind = ValueKind::Float;

    fn from_range_bound(bound: f64) -> Option<Self> {
        if bound.is_nan() || bound.abs() > f32::MAX as f64 && bound.is_finite() {
            return None;
        }
        Some(bound as f32)
    }
}

impl ConfigValue for f64 {
    const KIND: ValueKind = ValueKind::Float;

    fn from_range_bound(bound: f64) -> Option<Self> {
        (!bound.is_nan()).then_some(bound)
    }
}

macro_rules! impl_integer_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ConfigValue for $ty {
                const KIND: ValueKind = ValueKind::Integer;

                fn from_range_bound(bound: f64) -> Option<Self> {
                    if !bound.is_finite() {
                        return None;
                    }
                    let rounded = bound.round();
                    if rounded < <$ty>::MIN as f64 || rounded > <$ty>::MAX as f64 {
                        return None;
                    }
                    Some(rounded as $ty)
                }
            }
        )*
    };
}

impl_integer_value!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize);

impl<T: ConfigValue> ConfigValue for Option<T> {
    const KIND: ValueKind = ValueKind::Optional;

    fn from_range_bound(bound: f64) -> Option<Self> {
        T::from_range_bound(bound).map(Some)
    }

    /// 空值不受范围约束
    fn within_range(&self, min: &Self, max: &Self) -> bool {
        match (self, min, max) {
            (None, _, _) => true,
            (Some(value), Some(min), Some(max)) => value.within_range(min, max),
            _ => self >= min && self <= max,
        }
    }
}

impl<T: ConfigValue> ConfigValue for Vec<T> {
    const KIND: ValueKind = ValueKind::List;
}
