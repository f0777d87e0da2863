/// Domain-tagged logging macros.
///
/// Every macro adds a `domain` field so log consumers can filter by pipeline
/// area without knowing module paths. Domains in use:
///
/// * `sys` : pipeline start/stop, task joins
/// * `pipe`: dispatcher and multiplexer data flow
/// * `res` : backlog growth, metrics snapshots
///
/// ```ignore
/// rq_info!(sys, pool = 8, "pipeline started");
/// rq_warn!(pipe, error = %e, "evaluation failed");
/// rq_debug!(res, backlog = len, "backlog drained");
/// ```
///
/// The domain is a bare identifier, turned into a string by `stringify!`.

/// Internal helper. Use the per-level macros instead.
#[doc(hidden)]
macro_rules! rq_log {
    ($level:ident, $domain:ident, $($field:tt)*) => {
        tracing::$level!(domain = stringify!($domain), $($field)*)
    };
}

macro_rules! rq_error {
    ($domain:ident, $($rest:tt)*) => {
        rq_log!(error, $domain, $($rest)*)
    };
}

macro_rules! rq_warn {
    ($domain:ident, $($rest:tt)*) => {
        rq_log!(warn, $domain, $($rest)*)
    };
}

macro_rules! rq_info {
    ($domain:ident, $($rest:tt)*) => {
        rq_log!(info, $domain, $($rest)*)
    };
}

macro_rules! rq_debug {
    ($domain:ident, $($rest:tt)*) => {
        rq_log!(debug, $domain, $($rest)*)
    };
}

/// Per-item events (one per work item or result) go here so `debug` stays
/// readable under load.
macro_rules! rq_trace {
    ($domain:ident, $($rest:tt)*) => {
        rq_log!(trace, $domain, $($rest)*)
    };
}
