//! fail2ban control socket framing.
//!
//! Requests are pickled lists of strings followed by `END_COMMAND`. Replies
//! use the same terminator and unpickle to a `(code, payload)` pair.

use serde_pickle::{DeOptions, SerOptions, Value};

use crate::collector::traits::{ClientError, JailStats};

pub(crate) const END_COMMAND: &[u8] = b"<F2B_END_COMMAND>";
pub(crate) const CLOSE_COMMAND: &[u8] = b"<F2B_CLOSE_COMMAND>";

/// Encodes a command for the wire, terminator included.
pub(crate) fn encode_request(command: &[&str]) -> Result<Vec<u8>, ClientError> {
    let value = Value::List(
        command
            .iter()
            .map(|part| Value::String((*part).to_string()))
            .collect(),
    );
    let mut buf = serde_pickle::value_to_vec(&value, SerOptions::new())
        .map_err(|e| ClientError::Protocol(format!("failed to encode request: {}", e)))?;
    buf.extend_from_slice(END_COMMAND);
    Ok(buf)
}

/// Decodes a framed reply (terminator already stripped) into its payload.
///
/// A non-zero status code becomes `ClientError::Server`.
pub(crate) fn decode_reply(frame: &[u8]) -> Result<Value, ClientError> {
    // Unknown classes (e.g. address objects) decode as None instead of failing
    // the whole reply.
    let value = serde_pickle::value_from_slice(frame, DeOptions::new().replace_unresolved_globals())
        .map_err(|e| ClientError::Protocol(format!("failed to decode reply: {}", e)))?;

    let mut parts = match value {
        Value::Tuple(items) | Value::List(items) if items.len() == 2 => items.into_iter(),
        other => return Err(ClientError::Protocol(format!("malformed reply: {:?}", other))),
    };
    let code = parts.next().and_then(|v| as_u64(&v));
    let payload = parts.next().unwrap_or(Value::None);

    match code {
        Some(0) => Ok(payload),
        Some(code) => Err(ClientError::Server(format!(
            "status {}: {}",
            code,
            describe(&payload)
        ))),
        None => Err(ClientError::Protocol("missing status code".to_string())),
    }
}

pub(crate) fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::I64(n) if *n >= 0 => Some(*n as u64),
        Value::Bool(b) => Some(u64::from(*b)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Bytes(b) => String::from_utf8(b.clone()).ok(),
        _ => None,
    }
}

fn describe(value: &Value) -> String {
    as_string(value).unwrap_or_else(|| format!("{:?}", value))
}

/// Finds `key` in a status listing of `(name, value)` pairs.
fn lookup<'a>(entries: &'a Value, key: &str) -> Option<&'a Value> {
    let items = match entries {
        Value::List(items) | Value::Tuple(items) => items,
        _ => return None,
    };
    items.iter().find_map(|item| match item {
        Value::Tuple(pair) | Value::List(pair) if pair.len() == 2 => {
            (as_string(&pair[0]).as_deref() == Some(key)).then_some(&pair[1])
        }
        _ => None,
    })
}

fn required<'a>(entries: &'a Value, key: &str) -> Result<&'a Value, ClientError> {
    lookup(entries, key).ok_or_else(|| ClientError::Protocol(format!("missing '{}'", key)))
}

fn required_u64(entries: &Value, key: &str) -> Result<u64, ClientError> {
    let value = required(entries, key)?;
    as_u64(value).ok_or_else(|| ClientError::Protocol(format!("'{}' is not a number", key)))
}

/// Parses the global `status` reply into the ordered jail list.
pub(crate) fn parse_jail_list(payload: &Value) -> Result<Vec<String>, ClientError> {
    let list = required(payload, "Jail list")?;
    match list {
        Value::List(items) | Value::Tuple(items) => Ok(items.iter().filter_map(as_string).collect()),
        other => {
            let joined = as_string(other)
                .ok_or_else(|| ClientError::Protocol("'Jail list' is not a string".to_string()))?;
            Ok(joined
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect())
        }
    }
}

/// Parses the `status <jail>` reply into counters.
pub(crate) fn parse_jail_stats(payload: &Value) -> Result<JailStats, ClientError> {
    let filter = required(payload, "Filter")?;
    let actions = required(payload, "Actions")?;
    Ok(JailStats {
        failed_current: required_u64(filter, "Currently failed")?,
        failed_total: required_u64(filter, "Total failed")?,
        banned_current: required_u64(actions, "Currently banned")?,
        banned_total: required_u64(actions, "Total banned")?,
    })
}

/// Parses the banned address list out of a `status <jail>` reply.
pub(crate) fn parse_banned_addresses(payload: &Value) -> Result<Vec<String>, ClientError> {
    let actions = required(payload, "Actions")?;
    match required(actions, "Banned IP list")? {
        Value::List(items) | Value::Tuple(items) => Ok(items.iter().filter_map(as_string).collect()),
        Value::Set(items) | Value::FrozenSet(items) => Ok(items
            .iter()
            .filter_map(|item| as_string(&item.clone().into_value()))
            .collect()),
        other => Err(ClientError::Protocol(format!(
            "'Banned IP list' has unexpected type: {:?}",
            other
        ))),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn pair(key: &str, value: Value) -> Value {
        Value::Tuple(vec![Value::String(key.to_string()), value])
    }

    pub(crate) fn jail_status(failed: (i64, i64), banned: (i64, i64), ips: &[&str]) -> Value {
        Value::List(vec![
            pair(
                "Filter",
                Value::List(vec![
                    pair("Currently failed", Value::I64(failed.0)),
                    pair("Total failed", Value::I64(failed.1)),
                    pair("File list", Value::List(vec![])),
                ]),
            ),
            pair(
                "Actions",
                Value::List(vec![
                    pair("Currently banned", Value::I64(banned.0)),
                    pair("Total banned", Value::I64(banned.1)),
                    pair(
                        "Banned IP list",
                        Value::List(ips.iter().map(|ip| Value::String(ip.to_string())).collect()),
                    ),
                ]),
            ),
        ])
    }

    fn frame(value: &Value) -> Vec<u8> {
        serde_pickle::value_to_vec(value, SerOptions::new()).unwrap()
    }

    #[test]
    fn request_is_terminated() {
        let buf = encode_request(&["status", "sshd"]).unwrap();
        assert!(buf.ends_with(END_COMMAND));
        let decoded =
            serde_pickle::value_from_slice(&buf[..buf.len() - END_COMMAND.len()], DeOptions::new())
                .unwrap();
        assert_eq!(
            decoded,
            Value::List(vec![
                Value::String("status".into()),
                Value::String("sshd".into())
            ])
        );
    }

    #[test]
    fn reply_with_error_code_is_server_error() {
        let reply = Value::Tuple(vec![Value::I64(1), Value::String("no jail".into())]);
        match decode_reply(&frame(&reply)) {
            Err(ClientError::Server(msg)) => assert!(msg.contains("no jail")),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn reply_without_pair_is_protocol_error() {
        let reply = Value::String("pong".into());
        assert!(matches!(
            decode_reply(&frame(&reply)),
            Err(ClientError::Protocol(_))
        ));
    }

    #[test]
    fn jail_list_from_comma_separated_string() {
        let payload = Value::List(vec![
            pair("Number of jail", Value::I64(2)),
            pair("Jail list", Value::String("sshd, nginx".into())),
        ]);
        assert_eq!(parse_jail_list(&payload).unwrap(), vec!["sshd", "nginx"]);
    }

    #[test]
    fn empty_jail_list() {
        let payload = Value::List(vec![
            pair("Number of jail", Value::I64(0)),
            pair("Jail list", Value::String(String::new())),
        ]);
        assert!(parse_jail_list(&payload).unwrap().is_empty());
    }

    #[test]
    fn jail_status_parses_counters_and_addresses() {
        let payload = jail_status((1, 20), (2, 7), &["1.2.3.4", "1.2.3.4", "5.6.7.8"]);
        let stats = parse_jail_stats(&payload).unwrap();
        assert_eq!(
            stats,
            JailStats {
                failed_current: 1,
                failed_total: 20,
                banned_current: 2,
                banned_total: 7,
            }
        );
        // Duplicates are kept here; the collector collapses them.
        assert_eq!(
            parse_banned_addresses(&payload).unwrap(),
            vec!["1.2.3.4", "1.2.3.4", "5.6.7.8"]
        );
    }

    #[test]
    fn jail_status_missing_section() {
        let payload = Value::List(vec![pair("Filter", Value::List(vec![]))]);
        assert!(matches!(
            parse_jail_stats(&payload),
            Err(ClientError::Protocol(_))
        ));
    }
}
