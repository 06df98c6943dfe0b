//! Wire envelope for progress events pushed to observers.

use serde::Serialize;
use serde_json::value::RawValue;

pub const ENVELOPE_TYPE: &str = "TASK_PROGRESS";
pub const ENVELOPE_REQUEST_ID: &str = "server";
pub const ENVELOPE_SCHEMA: &str = "TASK";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    request_id: &'a str,
    schema: &'a str,
    data: &'a RawValue,
}

/// Wrap a raw progress payload. The payload is embedded verbatim and must be valid JSON.
pub fn wrap_progress(payload: &[u8]) -> Result<String, serde_json::Error> {
    let data: &RawValue = serde_json::from_slice(payload)?;
    serde_json::to_string(&Envelope {
        kind: ENVELOPE_TYPE,
        request_id: ENVELOPE_REQUEST_ID,
        schema: ENVELOPE_SCHEMA,
        data,
    })
}
