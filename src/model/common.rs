use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Row identity assigned by the store on insert
pub type Id = i64;

/// Outcome of a permissive parse: the value plus whether it was substituted
/// by the fallback because the input was not recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lenient<T> {
    pub value: T,
    pub defaulted: bool,
}

impl<T> Lenient<T> {
    pub fn parsed(value: T) -> Self {
        Self {
            value,
            defaulted: false,
        }
    }

    pub fn fallback(value: T) -> Self {
        Self {
            value,
            defaulted: true,
        }
    }
}

/// Error returned by the strict `FromStr` impls of the catalog enums
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} '{}'", self.kind, self.value)
    }
}

impl std::error::Error for UnknownVariant {}

/// Declares a string-backed enum with canonical spelling, strict `FromStr`
/// and a `parse_lenient` that falls back to the given default.
macro_rules! catalog_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($kind:literal, default = $default:ident) {
            $($variant:ident => $text:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $(
                #[serde(rename = $text)]
                $variant,
            )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }

            pub fn parse_lenient(raw: &str) -> Lenient<Self> {
                match raw.parse() {
                    Ok(value) => Lenient::parsed(value),
                    Err(_) => Lenient::fallback($name::$default),
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

catalog_enum! {
    /// HTTP method of an endpoint
    HttpMethod ("http method", default = Get) {
        Get => "GET",
        Post => "POST",
        Put => "PUT",
        Delete => "DELETE",
        Patch => "PATCH",
        Head => "HEAD",
        Options => "OPTIONS",
    }
}

catalog_enum! {
    /// Business priority of an endpoint, P0 being the most critical
    ApiLevel ("api level", default = P2) {
        P0 => "P0",
        P1 => "P1",
        P2 => "P2",
        P3 => "P3",
        P4 => "P4",
    }
}

catalog_enum! {
    /// Declared type of a parameter node
    ParamType ("param type", default = String) {
        String => "string",
        Int => "int",
        Double => "double",
        Boolean => "boolean",
        Array => "array",
        Object => "object",
        Binary => "binary",
    }
}

catalog_enum! {
    /// Where a request parameter travels
    ParamLocation ("param location", default = Body) {
        Query => "query",
        Path => "path",
        Header => "header",
        Cookie => "cookie",
        Body => "body",
    }
}

impl HttpMethod {
    /// Lower-case spelling used as the operation key of an OpenAPI path item
    pub fn openapi_key(&self) -> String {
        self.as_str().to_ascii_lowercase()
    }
}

impl ParamType {
    /// Whether nodes of this type may own child nodes, given their array element type
    pub fn accepts_children(&self, array_child_type: Option<ParamType>) -> bool {
        match self {
            ParamType::Object => true,
            ParamType::Array => array_child_type == Some(ParamType::Object),
            _ => false,
        }
    }
}

/// Generate a fresh service uuid for services created without one
pub fn generate_uuid() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_parse_reports_fallback() {
        let known = ParamType::parse_lenient("int");
        assert_eq!(known.value, ParamType::Int);
        assert!(!known.defaulted);

        let unknown = ParamType::parse_lenient("integer");
        assert_eq!(unknown.value, ParamType::String);
        assert!(unknown.defaulted);

        let location = ParamLocation::parse_lenient("QUERY");
        assert_eq!(location.value, ParamLocation::Body);
        assert!(location.defaulted);
    }

    #[test]
    fn test_enum_canonical_spelling() {
        assert_eq!(serde_json::to_string(&ParamLocation::Cookie).unwrap(), "\"cookie\"");
        assert_eq!(serde_json::to_string(&HttpMethod::Delete).unwrap(), "\"DELETE\"");
        assert_eq!("P4".parse::<ApiLevel>().unwrap(), ApiLevel::P4);
        assert_eq!(HttpMethod::Patch.openapi_key(), "patch");
        assert!("get".parse::<HttpMethod>().is_err());
    }

    #[test]
    fn test_accepts_children() {
        assert!(ParamType::Object.accepts_children(None));
        assert!(ParamType::Array.accepts_children(Some(ParamType::Object)));
        assert!(!ParamType::Array.accepts_children(Some(ParamType::Int)));
        assert!(!ParamType::String.accepts_children(Some(ParamType::Object)));
    }
}
