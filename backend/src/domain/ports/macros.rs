//! Declares the error enums of the gateway's ports.
//!
//! Every variant carries one text field naming what went wrong. The macro
//! adds a snake-case constructor per variant taking `impl Into<String>`, and
//! `detail()` returning that text without the variant's display prefix.

macro_rules! define_port_error {
    (
        $(#[$outer:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident { $field:ident } => $message:literal
            ),* $(,)?
        }
    ) => {
        $(#[$outer])*
        #[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
        pub enum $name {
            $(
                $(#[$variant_meta])*
                #[error($message)]
                $variant { $field: String },
            )*
        }

        impl $name {
            $(
                ::paste::paste! {
                    #[doc = concat!("A `", stringify!($variant), "` failure.")]
                    pub fn [<$variant:snake>]($field: impl Into<String>) -> Self {
                        Self::$variant { $field: $field.into() }
                    }
                }
            )*

            /// The adapter's own description of the failure.
            pub fn detail(&self) -> &str {
                match self {
                    $( Self::$variant { $field } => $field, )*
                }
            }
        }
    };
}

pub(crate) use define_port_error;

#[cfg(test)]
mod tests {
    define_port_error! {
        pub enum LookupError {
            Refused { host } => "refused by {host}",
            TimedOut { after } => "no answer after {after}",
        }
    }

    #[test]
    fn constructors_accept_borrowed_text() {
        let err = LookupError::refused("db.internal:5432");
        assert_eq!(err.to_string(), "refused by db.internal:5432");
        assert_eq!(err, LookupError::Refused { host: "db.internal:5432".to_owned() });
    }

    #[test]
    fn detail_drops_the_display_prefix() {
        assert_eq!(LookupError::timed_out("3s").detail(), "3s");
    }
}
