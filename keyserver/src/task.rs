/// Spawns a new asynchronous task, returning a `JoinHandle` for it.
///
/// This is a wrapper for [`tokio::task::spawn`] that takes a task name, which is only
/// recorded when built with `--cfg tokio_unstable` (for `tokio-console`).
#[cfg(not(tokio_unstable))]
#[macro_export]
macro_rules! spawn {
    ( $name:expr, $f:expr ) => {
        tokio::task::spawn($f)
    };
}

/// Spawns a new named asynchronous task, returning a `JoinHandle` for it.
#[cfg(tokio_unstable)]
#[macro_export]
macro_rules! spawn {
    ( $name:expr, $f:expr ) => {
        tokio::task::Builder::new()
            .name($name)
            .spawn($f)
            .expect("panic to match tokio::task::spawn")
    };
}
