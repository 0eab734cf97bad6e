use super::*;

/// Host element types with a fixed scalar dtype.
pub trait HasDType: Copy + Send + Sync + 'static {
    const SCALAR: ScalarDType;
    const DTYPE: DType = DType::Scalar(Self::SCALAR);
}

macro_rules! impl_dtype_ext {
    ($($ty:ty => $scalar:ident),* $(,)?) => {
        $(impl HasDType for $ty { const SCALAR: ScalarDType = ScalarDType::$scalar; })*
    };
}

impl_dtype_ext! {
    bool => Bool,
    i8 => Int8, i16 => Int16, i32 => Int32, i64 => Int64,
    u8 => UInt8, u16 => UInt16, u32 => UInt32, u64 => UInt64,
    f32 => Float32, f64 => Float64,
}
