//! Declarative helpers for one-byte wire enumerations.

/// Defines a `#[repr(u8)]` enum for a wire-level identifier together with
/// lossless conversions to and from the raw byte.
///
/// Unknown bytes are reported by `from_u8` as `None`; callers decide whether
/// that is a malformed frame or simply an unsupported command.
macro_rules! define_wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident = $val:expr),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        $vis enum $name {
            $($variant = $val),*
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),*];

            pub fn from_u8(value: u8) -> Option<Self> {
                match value {
                    $(v if v == $val => Some($name::$variant),)*
                    _ => None,
                }
            }

            pub fn as_u8(self) -> u8 {
                self as u8
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> u8 {
                value as u8
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{:?}(0x{:02X})", self, *self as u8)
            }
        }
    };
}
