//! Query-string serialization for extra request parameters.

use jsonp_types::{ParamValue, QueryParams};
use url::form_urlencoded;

pub trait QueryEncoder: Send + Sync {
    /// Serialize `params` without a leading `?` or `&`.
    ///
    /// With `arrays_joined`, list values become one `,`-joined value;
    /// otherwise each element is emitted under a repeated key.
    fn encode(&self, params: &QueryParams, arrays_joined: bool) -> String;
}

/// `application/x-www-form-urlencoded` encoding in key order.
#[derive(Debug, Default, Clone, Copy)]
pub struct FormQueryEncoder;

impl QueryEncoder for FormQueryEncoder {
    fn encode(&self, params: &QueryParams, arrays_joined: bool) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (name, value) in params.iter() {
            match value {
                ParamValue::Single(v) => {
                    serializer.append_pair(name, v);
                }
                ParamValue::List(values) if arrays_joined => {
                    serializer.append_pair(name, &values.join(","));
                }
                ParamValue::List(values) => {
                    for v in values {
                        serializer.append_pair(name, v);
                    }
                }
            }
        }
        serializer.finish()
    }
}
