//! Helper macros shared by the connection layer.

/// Returns early with `Err($error)` unless the predicate holds.
///
/// ```ignore
/// ensure!(!request.has_method(), ProtocolError::DuplicatePseudoHeader { name: ":method" });
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;
