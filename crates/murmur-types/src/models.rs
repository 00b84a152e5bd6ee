use serde::{Deserialize, Serialize};

/// A chat message as served by `GET /messages`.
///
/// Ids are assigned by the server and never change once issued, so two
/// messages with the same `id` are the same message. Ordering is by
/// `timestamp` (epoch milliseconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub username: String,
    pub text: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<ChatImageData>,
}

/// Image attached to a message. `data` is base64, `kind` the file extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatImageData {
    pub data: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_uses_camel_case_and_omits_missing_image() {
        let msg = Message {
            id: "m1".into(),
            username: "alice".into(),
            text: "hi".into(),
            timestamp: 1_700_000_000_000,
            image_data: None,
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["timestamp"], 1_700_000_000_000i64);
        assert!(json.get("imageData").is_none());
    }

    #[test]
    fn image_kind_is_serialized_as_type() {
        let raw = r#"{"id":"m2","username":"bob","text":"","timestamp":5,
                      "imageData":{"data":"aGk=","type":"png"}}"#;
        let msg: Message = serde_json::from_str(raw).unwrap();
        let image = msg.image_data.unwrap();
        assert_eq!(image.kind, "png");
        assert_eq!(image.data, "aGk=");
    }
}
