//! Macros for building and returning [`crate::error::IndexError`] values.

/// Creates an [`crate::error::IndexError`] from a kind, a static description and optional
/// detail and source.
#[macro_export]
macro_rules! index_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::IndexError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::IndexError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::IndexError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::IndexError::from(($kind, $desc, $detail.to_string())).with_source($source)
    };
}

/// Returns early with an [`crate::error::IndexError`] built like [`index_error!`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return ::core::result::Result::Err($crate::index_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::index_error!($kind, $desc, source: $source))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return ::core::result::Result::Err($crate::index_error!($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::index_error!(
            $kind,
            $desc,
            $detail,
            source: $source
        ))
    };
}
