// Sets up function-level tracing.
//
//   tracer!(*crate::TRACE, "function_name");
//   t!("a {} event", "traced");
//
// Rust doesn't support $( ... ) in a nested macro's definition, so
// `t!` is expanded for a fixed number of arguments.
macro_rules! tracer {
    ($TRACE:expr, $func:expr) => {
        #[allow(unused_macros)]
        macro_rules! t {
            ( $fmt:expr ) =>
            { if $TRACE { ::log::trace!(target: $func, $fmt) } };
            ( $fmt:expr, $a:expr ) =>
            { if $TRACE { ::log::trace!(target: $func, $fmt, $a) } };
            ( $fmt:expr, $a:expr, ) =>
            { if $TRACE { ::log::trace!(target: $func, $fmt, $a) } };
            ( $fmt:expr, $a:expr, $b:expr ) =>
            { if $TRACE { ::log::trace!(target: $func, $fmt, $a, $b) } };
            ( $fmt:expr, $a:expr, $b:expr, ) =>
            { if $TRACE { ::log::trace!(target: $func, $fmt, $a, $b) } };
            ( $fmt:expr, $a:expr, $b:expr, $c:expr ) =>
            { if $TRACE { ::log::trace!(target: $func, $fmt, $a, $b, $c) } };
            ( $fmt:expr, $a:expr, $b:expr, $c:expr, ) =>
            { if $TRACE { ::log::trace!(target: $func, $fmt, $a, $b, $c) } };
            ( $fmt:expr, $a:expr, $b:expr, $c:expr, $d:expr ) =>
            { if $TRACE { ::log::trace!(target: $func, $fmt, $a, $b, $c, $d) } };
            ( $fmt:expr, $a:expr, $b:expr, $c:expr, $d:expr, ) =>
            { if $TRACE { ::log::trace!(target: $func, $fmt, $a, $b, $c, $d) } };
            ( $fmt:expr, $a:expr, $b:expr, $c:expr, $d:expr, $e:expr ) =>
            { if $TRACE { ::log::trace!(target: $func, $fmt, $a, $b, $c, $d, $e) } };
            ( $fmt:expr, $a:expr, $b:expr, $c:expr, $d:expr, $e:expr, ) =>
            { if $TRACE { ::log::trace!(target: $func, $fmt, $a, $b, $c, $d, $e) } };
        }
    }
}

#[allow(unused_macros)]
macro_rules! error {
    // error!(target: "my_target", key1 = 42, key2 = true; "a {} event", "log")
    // error!(target: "my_target", "a {} event", "log")
    (target: $target:expr, $($arg:tt)+) => (
        if cfg!(debug_assertions) {
            ::log::error!(target: $target, $($arg)+)
        }
    );

    // error!("a {} event", "log")
    ($($arg:tt)+) => (
        if cfg!(debug_assertions) {
            ::log::error!($($arg)+)
        }
    )
}

#[allow(unused_macros)]
macro_rules! warn {
    // warn!(target: "my_target", key1 = 42, key2 = true; "a {} event", "log")
    // warn!(target: "my_target", "a {} event", "log")
    (target: $target:expr, $($arg:tt)+) => (
        if cfg!(debug_assertions) {
            ::log::warn!(target: $target, $($arg)+)
        }
    );

    // warn!("a {} event", "log")
    ($($arg:tt)+) => (
        if cfg!(debug_assertions) {
            ::log::warn!($($arg)+)
        }
    )
}

#[allow(unused_macros)]
macro_rules! debug {
    // debug!(target: "my_target", key1 = 42, key2 = true; "a {} event", "log")
    // debug!(target: "my_target", "a {} event", "log")
    (target: $target:expr, $($arg:tt)+) => (
        if cfg!(debug_assertions) {
            ::log::debug!(target: $target, $($arg)+)
        }
    );

    // debug!("a {} event", "log")
    ($($arg:tt)+) => (
        if cfg!(debug_assertions) {
            ::log::debug!($($arg)+)
        }
    )
}

#[allow(unused_macros)]
macro_rules! info {
    // info!(target: "my_target", "a {} event", "log")
    (target: $target:expr, $($arg:tt)+) => (
        if cfg!(debug_assertions) {
            ::log::info!(target: $target, $($arg)+)
        }
    );

    // info!("a {} event", "log")
    ($($arg:tt)+) => (
        if cfg!(debug_assertions) {
            ::log::info!($($arg)+)
        }
    )
}

#[allow(unused_macros)]
macro_rules! trace {
    // trace!(target: "my_target", "a {} event", "log")
    (target: $target:expr, $($arg:tt)+) => (
        if cfg!(debug_assertions) {
            ::log::trace!(target: $target, $($arg)+)
        }
    );

    // trace!("a {} event", "log")
    ($($arg:tt)+) => (
        if cfg!(debug_assertions) {
            ::log::trace!($($arg)+)
        }
    )
}
