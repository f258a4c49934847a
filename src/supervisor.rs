use crate::error::{Error, Result};

use lazy_static::lazy_static;
use std::any::Any;
use std::panic;
use std::sync::{Arc, Once, PoisonError, RwLock};
use std::thread;

type FailureHandler = Arc<dyn Fn(&Error) + Send + Sync>;

lazy_static! {
    static ref FAILURE_HANDLER: RwLock<Option<FailureHandler>> = RwLock::new(None);
}

static PANIC_HOOK: Once = Once::new();

/// Registers the callback invoked for every failed task. Returns false if
/// one is already registered.
pub fn set_failure_handler<F>(handler: F) -> bool
where
    F: Fn(&Error) + Send + Sync + 'static,
{
    let mut slot = FAILURE_HANDLER
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        return false;
    }
    *slot = Some(Arc::new(handler));
    true
}

fn notify_failure(err: &Error) {
    let handler = FAILURE_HANDLER
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone();
    if let Some(handler) = handler {
        handler(err);
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    match payload.downcast_ref::<&'static str>() {
        Some(s) => s.to_string(),
        None => match payload.downcast_ref::<String>() {
            Some(s) => s.clone(),
            None => "Box<Any>".to_string(),
        },
    }
}

/// Logs panics of every thread, I/O threads included, and reports them to
/// the failure handler.
pub fn install_panic_hook() {
    PANIC_HOOK.call_once(|| {
        panic::set_hook(Box::new(|info| {
            let thread = thread::current();
            let task = thread.name().unwrap_or("unnamed").to_owned();
            let message = panic_message(info.payload());
            let location = info
                .location()
                .map(|l| format!("{}:{}", l.file(), l.line()))
                .unwrap_or_default();

            tracing::error!("thread '{}' panicked at {}: {}", task, location, message);
            notify_failure(&Error::Panicked { task, message });
        }));
    });
}

/// Runs `task` on its own named thread and waits for it. A panic becomes
/// `Error::Panicked`; any error is logged and passed to the failure handler
/// before being returned.
pub fn supervise<T, F>(name: &str, task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let handle = thread::Builder::new().name(name.to_string()).spawn(task)?;
    let result = match handle.join() {
        Ok(result) => result,
        Err(payload) => Err(Error::Panicked {
            task: name.to_string(),
            message: panic_message(payload.as_ref()),
        }),
    };

    if let Err(e) = &result {
        tracing::error!("Task '{}' failed: {}", name, e);
        notify_failure(e);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supervise_returns_the_task_result() {
        assert_eq!(supervise("answer", || Ok(42)).unwrap(), 42);
        assert!(matches!(
            supervise::<(), _>("refused", || Err(Error::RegistrationWindowClosed)),
            Err(Error::RegistrationWindowClosed)
        ));
    }

    #[test]
    fn supervise_turns_panics_into_errors() {
        match supervise::<(), _>("boom", || panic!("compute exploded")) {
            Err(Error::Panicked { task, message }) => {
                assert_eq!(task, "boom");
                assert_eq!(message, "compute exploded");
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
    }
}
