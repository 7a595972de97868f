macro_rules! impl_id {
    ($name:ident, $type:ty, $doc:expr) => {
        impl_id!($name, $type, $doc, "{}");
    };

    ($name:ident, $type:ty, $doc:expr, $fmt:literal) => {
        #[doc = concat!("A ", $doc, ".")]
        #[derive(
            Debug,
            Default,
            Clone,
            Copy,
            PartialEq,
            Eq,
            PartialOrd,
            Ord,
            Hash,
            ::serde::Serialize,
            ::serde::Deserialize,
        )]
        pub struct $name(pub $type);

        impl $name {
            #[doc = concat!("Creates a new instance of the `", stringify!($name), "` type.")]
            pub const fn new(value: $type) -> Self {
                Self(value)
            }

            #[doc = concat!("Checks if the `", stringify!($name), "` is zero.")]
            pub const fn is_zero(&self) -> bool {
                self.0 == 0
            }
        }

        impl From<$type> for $name {
            fn from(value: $type) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $type {
            fn from(value: $name) -> $type {
                value.0
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, $fmt, self.0)
            }
        }
    };
}

pub(crate) use impl_id;
