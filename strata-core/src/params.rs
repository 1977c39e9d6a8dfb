//! The parameter contract applied uniformly before any implementation sees
//! its params: validation, default-setting, and filesystem-path
//! normalization.

use std::path::Path;

use serde::de::{self, DeserializeOwned};
use serde::Serialize;
use serde_json::Value;
use strata_http::Verb;

use crate::dsref;
use crate::error::Error;

/// Contract every dispatchable input type implements.
///
/// All hooks are opt-in with no-op defaults; a params struct that needs none
/// of them is handled identically. The dispatcher invokes them in a fixed
/// order: `validate`, then `set_nonzero_defaults`, then path normalization
/// via [`path_fields`](Self::path_fields).
pub trait RequestParams:
    Serialize + DeserializeOwned + Default + Send + Sync + 'static
{
    /// Reject malformed inputs. A failure here short-circuits the call; the
    /// error is returned to the caller verbatim and neither defaults nor the
    /// implementation run.
    fn validate(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Assign sensible defaults to unset fields (format, limits, revisions).
    fn set_nonzero_defaults(&mut self) {}

    /// Declare which string fields hold filesystem paths. The dispatcher
    /// rewrites `fspath` slots to absolute paths and `dsref_or_fspath` slots
    /// only when the value does not parse as a dataset reference.
    fn path_fields(&mut self) -> PathFields<'_> {
        PathFields::default()
    }

    /// Override the generic HTTP decoder. Return `Some` to take full control
    /// of building params from the raw request (query, form fields, accept
    /// header); the default `None` selects the generic JSON/form path.
    fn decode_request(_req: &WireRequest) -> Option<Result<Self, Error>> {
        None
    }
}

/// Mutable slots into a params struct's path-carrying fields.
#[derive(Default)]
pub struct PathFields<'a> {
    fspath: Vec<&'a mut String>,
    fspath_lists: Vec<&'a mut Vec<String>>,
    dsref_or_fspath: Vec<&'a mut String>,
}

impl<'a> PathFields<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// A field that always holds a filesystem path.
    pub fn fspath(mut self, field: &'a mut String) -> Self {
        self.fspath.push(field);
        self
    }

    /// A list field whose every element is a filesystem path.
    pub fn fspath_list(mut self, field: &'a mut Vec<String>) -> Self {
        self.fspath_lists.push(field);
        self
    }

    /// A field holding either a dataset reference or a filesystem path;
    /// rewritten only when it is not a reference.
    pub fn dsref_or_fspath(mut self, field: &'a mut String) -> Self {
        self.dsref_or_fspath.push(field);
        self
    }
}

/// Rewrite the params' declared path fields to absolute form.
pub fn normalize_paths<P: RequestParams>(params: &mut P) -> Result<(), Error> {
    let fields = params.path_fields();
    for field in fields.fspath {
        absolutize(field)?;
    }
    for list in fields.fspath_lists {
        for field in list.iter_mut() {
            absolutize(field)?;
        }
    }
    for field in fields.dsref_or_fspath {
        if !dsref::is_ref_string(field) {
            absolutize(field)?;
        }
    }
    Ok(())
}

/// Content-addressed store prefixes that are not filesystem paths even
/// though they look absolute.
const STORE_PREFIXES: [&str; 3] = ["/ipfs/", "/ipld/", "/mem/"];

fn absolutize(field: &mut String) -> Result<(), Error> {
    if field.is_empty()
        || field.contains("://")
        || STORE_PREFIXES.iter().any(|p| field.starts_with(p))
        || Path::new(field.as_str()).is_absolute()
    {
        return Ok(());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| Error::internal(format!("resolving working directory: {e}")))?;
    *field = cwd.join(field.as_str()).to_string_lossy().into_owned();
    Ok(())
}

/// Transport-neutral view of an HTTP request, handed to the wire decoder.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub verb: Verb,
    /// Parsed JSON body, present on POST/PUT with `application/json`.
    /// `Some(Value::Null)` means an empty body was tolerated.
    pub json_body: Option<Value>,
    /// Query-string and form fields, in arrival order.
    pub form: Vec<(String, String)>,
    pub accept: Option<String>,
}

impl WireRequest {
    pub fn json(verb: Verb, body: Value) -> Self {
        Self {
            verb,
            json_body: Some(body),
            form: Vec::new(),
            accept: None,
        }
    }

    pub fn form(verb: Verb, form: Vec<(String, String)>) -> Self {
        Self {
            verb,
            json_body: None,
            form,
            accept: None,
        }
    }

    /// First value for a form/query field.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.form
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

impl Default for WireRequest {
    fn default() -> Self {
        Self {
            verb: Verb::Get,
            json_body: None,
            form: Vec::new(),
            accept: None,
        }
    }
}

/// Decode a params struct from a wire request. A per-type
/// [`decode_request`](RequestParams::decode_request) override takes full
/// control when implemented; otherwise body-carrying verbs decode their
/// JSON body, and everything else goes through the generic form-to-struct
/// decoder.
pub fn decode_wire<P: RequestParams>(req: &WireRequest) -> Result<P, Error> {
    if let Some(result) = P::decode_request(req) {
        return result;
    }
    if req.verb.has_body() {
        if let Some(body) = &req.json_body {
            if body.is_null() {
                // Empty bodies are tolerated; defaults apply.
                return Ok(P::default());
            }
            return serde_json::from_value(body.clone())
                .map_err(|e| Error::bad_request(format!("decoding request body: {e}")));
        }
    }
    decode_form(&req.form)
}

/// Generic form-to-struct decoder. Repeated keys accumulate into list
/// fields; scalar fields parse their value on demand, so a numeric-looking
/// value still lands intact in a string field.
pub fn decode_form<P: DeserializeOwned>(pairs: &[(String, String)]) -> Result<P, Error> {
    let mut grouped: Vec<(String, FormValues)> = Vec::new();
    for (key, value) in pairs {
        match grouped.iter_mut().find(|(k, _)| k == key) {
            Some((_, values)) => values.0.push(value.clone()),
            None => grouped.push((key.clone(), FormValues(vec![value.clone()]))),
        }
    }
    P::deserialize(de::value::MapDeserializer::new(grouped.into_iter()))
        .map_err(|e: de::value::Error| Error::bad_request(format!("decoding request params: {e}")))
}

/// All values observed for one form key.
struct FormValues(Vec<String>);

impl<'de> de::IntoDeserializer<'de, de::value::Error> for FormValues {
    type Deserializer = Self;

    fn into_deserializer(self) -> Self {
        self
    }
}

macro_rules! parse_scalar {
    ($($method:ident => $ty:ty => $visit:ident),* $(,)?) => {
        $(
            fn $method<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
                let raw = self.first()?;
                let parsed: $ty = raw
                    .parse()
                    .map_err(|_| de::Error::custom(format!(
                        "invalid value {raw:?} for {} field", stringify!($ty)
                    )))?;
                visitor.$visit(parsed)
            }
        )*
    };
}

impl FormValues {
    fn first(&self) -> Result<&str, de::value::Error> {
        self.0
            .first()
            .map(String::as_str)
            .ok_or_else(|| de::Error::custom("missing form value"))
    }
}

impl<'de> de::Deserializer<'de> for FormValues {
    type Error = de::value::Error;

    fn deserialize_any<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        if self.0.len() > 1 {
            self.deserialize_seq(visitor)
        } else {
            visitor.visit_string(self.first()?.to_string())
        }
    }

    fn deserialize_seq<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_seq(de::value::SeqDeserializer::new(self.0.into_iter()))
    }

    fn deserialize_option<V: de::Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        visitor.visit_some(self)
    }

    parse_scalar! {
        deserialize_bool => bool => visit_bool,
        deserialize_i8 => i8 => visit_i8,
        deserialize_i16 => i16 => visit_i16,
        deserialize_i32 => i32 => visit_i32,
        deserialize_i64 => i64 => visit_i64,
        deserialize_u8 => u8 => visit_u8,
        deserialize_u16 => u16 => visit_u16,
        deserialize_u32 => u32 => visit_u32,
        deserialize_u64 => u64 => visit_u64,
        deserialize_f32 => f32 => visit_f32,
        deserialize_f64 => f64 => visit_f64,
    }

    serde::forward_to_deserialize_any! {
        char str string bytes byte_buf unit unit_struct newtype_struct tuple
        tuple_struct map struct enum identifier ignored_any
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct DiffLike {
        path: String,
        left: String,
        right: String,
    }

    impl RequestParams for DiffLike {
        fn path_fields(&mut self) -> PathFields<'_> {
            PathFields::new()
                .fspath(&mut self.path)
                .dsref_or_fspath(&mut self.left)
                .dsref_or_fspath(&mut self.right)
        }
    }

    #[test]
    fn normalizes_by_tag() {
        let mut params = DiffLike {
            path: "testdata/foo.yml".to_string(),
            left: "testdata/bar.csv".to_string(),
            right: "me/ds".to_string(),
        };
        normalize_paths(&mut params).unwrap();

        assert!(Path::new(&params.path).is_absolute());
        assert!(params.path.ends_with("testdata/foo.yml"));
        assert!(Path::new(&params.left).is_absolute());
        assert_eq!(params.right, "me/ds");
    }

    #[test]
    fn preserves_urls_and_store_paths() {
        let mut params = DiffLike {
            path: "https://example.com/data.csv".to_string(),
            left: "/ipfs/QmHash".to_string(),
            right: String::new(),
        };
        normalize_paths(&mut params).unwrap();
        assert_eq!(params.path, "https://example.com/data.csv");
        assert_eq!(params.left, "/ipfs/QmHash");
        assert_eq!(params.right, "");
    }

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct ListLike {
        offset: usize,
        limit: usize,
        filter: Vec<String>,
        term: String,
    }

    impl RequestParams for ListLike {}

    #[test]
    fn form_decode_coerces_and_accumulates() {
        let pairs = vec![
            ("offset".to_string(), "10".to_string()),
            ("limit".to_string(), "25".to_string()),
            ("filter".to_string(), "username:peer".to_string()),
            ("filter".to_string(), "name:pop".to_string()),
            ("term".to_string(), "42".to_string()),
        ];
        let decoded: ListLike = decode_form(&pairs).unwrap();
        assert_eq!(decoded.offset, 10);
        assert_eq!(decoded.filter.len(), 2);
        assert_eq!(decoded.term, "42");
    }

    #[test]
    fn wire_decode_prefers_json_body() {
        let req = WireRequest::json(
            Verb::Post,
            serde_json::json!({"offset": 3, "limit": 4, "filter": [], "term": "x"}),
        );
        let decoded: ListLike = decode_wire(&req).unwrap();
        assert_eq!(decoded.offset, 3);
    }

    #[test]
    fn wire_decode_tolerates_empty_body() {
        let req = WireRequest::json(Verb::Post, Value::Null);
        let decoded: ListLike = decode_wire(&req).unwrap();
        assert_eq!(decoded, ListLike::default());
    }

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    #[serde(default)]
    struct LegacyGet {
        reference: String,
    }

    impl RequestParams for LegacyGet {
        // Older clients named the reference field `ds`.
        fn decode_request(req: &WireRequest) -> Option<Result<Self, Error>> {
            req.field("ds").map(|v| {
                Ok(LegacyGet {
                    reference: v.to_string(),
                })
            })
        }
    }

    #[test]
    fn decode_request_override_takes_precedence() {
        let req = WireRequest::form(
            Verb::Get,
            vec![("ds".to_string(), "me/x".to_string())],
        );
        let decoded: LegacyGet = decode_wire(&req).unwrap();
        assert_eq!(decoded.reference, "me/x");
    }

    #[test]
    fn decode_request_falls_back_when_not_claimed() {
        let req = WireRequest::form(
            Verb::Get,
            vec![("reference".to_string(), "me/y".to_string())],
        );
        let decoded: LegacyGet = decode_wire(&req).unwrap();
        assert_eq!(decoded.reference, "me/y");
    }
}
