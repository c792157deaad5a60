use super::errors::TaskError;

pub type TaskResult<T> = Result<T, TaskError>;

/// Turns a caught panic payload into a readable message.
pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Runs `f`, converting a panic into [`TaskError::Panicked`].
pub(crate) fn run_catching<T, F>(f: F) -> TaskResult<T>
where
    F: FnOnce() -> TaskResult<T>,
{
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload))))
}
