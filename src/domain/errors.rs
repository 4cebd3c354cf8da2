use thiserror::Error;

/// Errors surfaced by the LLM client adapter.
///
/// Callers must handle all three outcomes of a generation call: text,
/// blocked, and transport failure. Timeouts map to the transport class.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM transport failure: {reason}")]
    Transport { reason: String },

    #[error("LLM request timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("response blocked by safety filter: {categories:?}")]
    Blocked { categories: Vec<String> },
}

/// Errors raised by the robust JSON decoder.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("model returned an empty response")]
    EmptyResponse,

    #[error("malformed JSON in model response: {reason} (head: {head:?}, tail: {tail:?})")]
    MalformedJson {
        reason: String,
        head: String,
        tail: String,
    },
}

/// A response that parsed as JSON but is semantically invalid.
#[derive(Debug, Error)]
#[error("schema violation: {0}")]
pub struct SchemaViolation(pub String);

/// Errors related to the persisted state bundle.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("corrupt state: {reason}")]
    CorruptState { reason: String },

    #[error("failed to publish state bundle: {reason}")]
    PublishFailed { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_error_formatting() {
        let err = LlmError::Blocked {
            categories: vec!["dangerous_content".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("blocked"));
        assert!(msg.contains("dangerous_content"));

        let err = LlmError::Timeout { seconds: 60 };
        assert!(err.to_string().contains("60"));
    }

    #[test]
    fn test_decode_error_formatting() {
        let err = DecodeError::MalformedJson {
            reason: "unexpected end of input".to_string(),
            head: "{\"bias\"".to_string(),
            tail: "".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("unexpected end of input"));
        assert!(msg.contains("bias"));
    }
}
