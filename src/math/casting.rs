use crate::error::{EngineError, EngineResult};
use std::convert::TryInto;
use std::panic::Location;

pub trait Cast: Sized {
    /// Casts between numeric types, erroring instead of truncating silently.
    #[track_caller]
    #[inline(always)]
    fn cast<T: std::convert::TryFrom<Self>>(self) -> EngineResult<T> {
        match self.try_into() {
            Ok(result) => Ok(result),
            Err(_) => {
                let caller = Location::caller();
                tracing::error!(file = caller.file(), line = caller.line(), "casting failure");
                Err(EngineError::CastingFailure)
            }
        }
    }
}

impl Cast for u8 {}
impl Cast for u16 {}
impl Cast for u32 {}
impl Cast for u64 {}
impl Cast for u128 {}
impl Cast for i8 {}
impl Cast for i16 {}
impl Cast for i32 {}
impl Cast for i64 {}
impl Cast for i128 {}
impl Cast for usize {}
impl Cast for crate::math::bignumber::U192 {}
impl Cast for crate::math::bignumber::U256 {}
