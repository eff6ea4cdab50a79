//! Padded-JSON script bodies.
//!
//! The HTTP injector does not run a script engine. It understands the one
//! statement a correlated endpoint emits:
//!
//! ```text
//! /**/ ns.callee( <json> );
//! ```
//!
//! Leading whitespace and block comments are skipped, the callee is a
//! dotted name of token characters, the argument is a single JSON value (an
//! empty argument list passes `null`), and a trailing `;` is optional.

use jsonp_types::{Payload, TransportError, is_token_char};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ScriptCall {
    pub callee: String,
    pub payload: Payload,
}

fn script_error(message: impl Into<String>) -> TransportError {
    TransportError::Script(message.into())
}

/// Strip leading whitespace and `/* ... */` comments.
fn skip_preamble(mut body: &str) -> Result<&str, TransportError> {
    loop {
        body = body.trim_start();
        match body.strip_prefix("/*") {
            Some(rest) => {
                let end = rest
                    .find("*/")
                    .ok_or_else(|| script_error("unterminated comment"))?;
                body = &rest[end + 2..];
            }
            None => return Ok(body),
        }
    }
}

pub(crate) fn parse(body: &str) -> Result<ScriptCall, TransportError> {
    let body = skip_preamble(body.trim_start_matches('\u{feff}'))?;

    let callee_len = body
        .find(|c: char| !is_token_char(c))
        .unwrap_or(body.len());
    let (callee, rest) = body.split_at(callee_len);
    if callee.is_empty() {
        return Err(script_error("expected a callee name"));
    }

    let rest = rest
        .trim_start()
        .strip_prefix('(')
        .ok_or_else(|| script_error(format!("expected '(' after `{callee}`")))?;
    let rest = rest.trim_end();
    let rest = rest.strip_suffix(';').unwrap_or(rest).trim_end();
    let argument = rest
        .strip_suffix(')')
        .ok_or_else(|| script_error("expected ')' closing the call"))?
        .trim();

    let payload = if argument.is_empty() {
        Value::Null
    } else {
        serde_json::from_str(argument)
            .map_err(|e| script_error(format!("invalid JSON argument: {e}")))?
    };

    Ok(ScriptCall {
        callee: callee.to_string(),
        payload,
    })
}
