//! Small helper macros used throughout the engine.

/// Asserts a precondition; on failure, returns a `ConstraintViolation` or
/// caller-supplied error, logging the site at `error!` level first. Mirrors
/// the `require!`-style guard used at every validation and invariant
/// checkpoint in the books and the orchestrator.
#[macro_export]
macro_rules! validate {
    ($cond:expr, $err:expr) => {
        if !($cond) {
            tracing::error!(
                condition = stringify!($cond),
                file = file!(),
                line = line!(),
                "validation failed"
            );
            Err($err)
        } else {
            Ok(())
        }
    };
    ($cond:expr, $err:expr, $($arg:tt)*) => {
        if !($cond) {
            tracing::error!(
                condition = stringify!($cond),
                file = file!(),
                line = line!(),
                message = %format!($($arg)*),
                "validation failed"
            );
            Err($err)
        } else {
            Ok(())
        }
    };
}
