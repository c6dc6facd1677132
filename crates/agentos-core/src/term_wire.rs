use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Close code sent on intentional teardown.
pub const NORMAL_CLOSURE: u16 = 1000;

/// Frames the dashboard sends to the terminal endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Raw keystrokes or escape sequences, sent unbuffered.
    Input { data: String },
    /// A line to submit. Travels on the same channel as `Input`.
    Command { data: String },
    Resize { cols: u16, rows: u16 },
}

/// Frames the terminal endpoint sends back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Output { data: String },
    Exit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i32>,
    },
}

/// Result of reading one inbound text message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Frame(ServerFrame),
    /// The payload was not a frame at all; it is shown as literal output.
    Passthrough(String),
    /// Well-formed JSON with a `type` this client does not handle.
    Ignored(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_frame<T: Serialize>(frame: &T) -> Result<String, FrameError> {
    serde_json::to_string(frame).map_err(|err| FrameError::Encode(err.to_string()))
}

pub fn decode_client_frame(text: &str) -> Result<ClientFrame, FrameError> {
    serde_json::from_str(text).map_err(|err| FrameError::Decode(err.to_string()))
}

/// Malformed input is never an error here: anything that is not a
/// recognizable envelope degrades to literal output.
pub fn decode_server_text(text: &str) -> Inbound {
    let value: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => return Inbound::Passthrough(text.to_string()),
    };
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .map(|kind| kind.to_string());
    match serde_json::from_value::<ServerFrame>(value) {
        Ok(frame) => Inbound::Frame(frame),
        Err(_) => match kind {
            Some(kind) => Inbound::Ignored(kind),
            None => Inbound::Passthrough(text.to_string()),
        },
    }
}

pub fn exit_banner(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("\r\n\x1b[2m[process exited with code {code}]\x1b[0m\r\n"),
        None => "\r\n\x1b[2m[process exited]\x1b[0m\r\n".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_use_flat_type_tag() {
        let resize = encode_frame(&ClientFrame::Resize { cols: 120, rows: 40 }).expect("encode");
        let value: Value = serde_json::from_str(&resize).expect("json");
        assert_eq!(value, serde_json::json!({"type": "resize", "cols": 120, "rows": 40}));

        let input = encode_frame(&ClientFrame::Input {
            data: "\x1b[A".to_string(),
        })
        .expect("encode");
        let value: Value = serde_json::from_str(&input).expect("json");
        assert_eq!(value, serde_json::json!({"type": "input", "data": "\u{1b}[A"}));
    }

    #[test]
    fn server_output_and_exit_decode() {
        assert_eq!(
            decode_server_text(r#"{"type":"output","data":"hi"}"#),
            Inbound::Frame(ServerFrame::Output {
                data: "hi".to_string()
            })
        );
        assert_eq!(
            decode_server_text(r#"{"type":"exit"}"#),
            Inbound::Frame(ServerFrame::Exit { code: None })
        );
        assert_eq!(
            decode_server_text(r#"{"type":"exit","code":2}"#),
            Inbound::Frame(ServerFrame::Exit { code: Some(2) })
        );
    }

    #[test]
    fn malformed_json_passes_through_verbatim() {
        let raw = "plain text \x1b[31mred\x1b[0m {not json";
        assert_eq!(decode_server_text(raw), Inbound::Passthrough(raw.to_string()));
    }

    #[test]
    fn unknown_frame_type_is_ignored() {
        assert_eq!(
            decode_server_text(r#"{"type":"title","data":"vim"}"#),
            Inbound::Ignored("title".to_string())
        );
    }

    #[test]
    fn client_frame_decode_rejects_garbage() {
        assert!(matches!(
            decode_client_frame("{\"type\":\"resize\",\"cols\":\"wide\"}"),
            Err(FrameError::Decode(_))
        ));
        assert_eq!(
            decode_client_frame(r#"{"type":"command","data":"ls\r"}"#).expect("decode"),
            ClientFrame::Command {
                data: "ls\r".to_string()
            }
        );
    }

    #[test]
    fn exit_banner_mentions_code_when_known() {
        assert!(exit_banner(Some(130)).contains("code 130"));
        assert!(exit_banner(None).contains("[process exited]"));
    }
}
