use serde::{Deserialize, Serialize};

use crate::bridge::ffargs::FfArgs;

/// Control messages on the browser WebSocket. All are JSON text of the shape
/// `{"type": <tag>, ...}`; binary messages carry only file payloads.
/// Unknown tags fail deserialization, which the session treats as a
/// protocol error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    #[serde(rename = "ready")]
    Ready,
    #[serde(rename = "wait")]
    Wait,
    #[serde(rename = "taskReady")]
    TaskReady,
    /// Server→browser carries the job; the browser's acknowledgement echoes
    /// the bare tag.
    #[serde(rename = "ffargs")]
    FfArgs {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ffargs: Option<FfArgs>,
    },
    #[serde(rename = "inputInfoOk")]
    InputInfoOk,
    #[serde(rename = "inputOk")]
    InputOk,
    #[serde(rename = "logLine")]
    LogLine {
        #[serde(rename = "logType")]
        log_type: LogKind,
        #[serde(rename = "logLine")]
        log_line: String,
    },
    #[serde(rename = "logEnd")]
    LogEnd,
    #[serde(rename = "outInfo")]
    OutInfo {
        #[serde(rename = "outInfo")]
        out_info: (i64, u64),
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Stdout,
    Stderr,
}

impl Envelope {
    pub fn to_json(&self) -> String {
        // The envelope set contains nothing that can fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}
