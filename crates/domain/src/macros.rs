//! Macro for implementing Display and FromStr for status enums
//!
//! Status enums are persisted as lowercase strings in SQLite and parsed back
//! when rows are read. This macro generates both directions from a single
//! variant table so the representations cannot drift apart.

/// Implements `Display` and `FromStr` for a status enum.
///
/// Parsing is case-insensitive; output is always the lowercase form given in
/// the mapping. Unknown strings produce an error naming the enum.
#[macro_export]
macro_rules! impl_status_conversions {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => write!(f, $str),)+
                }
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    _ => Err(format!("Invalid {}: {}", stringify!($enum_name), s)),
                }
            }
        }
    };
}
