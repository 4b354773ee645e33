use crate::error::{EngineError, EngineResult};
use std::panic::Location;

pub trait SafeUnwrap {
    type Item;

    fn safe_unwrap(self) -> EngineResult<Self::Item>;
}

impl<T> SafeUnwrap for Option<T> {
    type Item = T;

    #[track_caller]
    #[inline(always)]
    fn safe_unwrap(self) -> EngineResult<T> {
        match self {
            Some(v) => Ok(v),
            None => {
                let caller = Location::caller();
                tracing::error!(file = caller.file(), line = caller.line(), "unwrap on None");
                Err(EngineError::constraint("unwrap on None"))
            }
        }
    }
}

impl<T, U> SafeUnwrap for Result<T, U> {
    type Item = T;

    #[track_caller]
    #[inline(always)]
    fn safe_unwrap(self) -> EngineResult<T> {
        match self {
            Ok(v) => Ok(v),
            Err(_) => {
                let caller = Location::caller();
                tracing::error!(file = caller.file(), line = caller.line(), "unwrap on Err");
                Err(EngineError::constraint("unwrap on Err"))
            }
        }
    }
}
