//! Decoder behavior over a corpus of synthetic malformed model responses.
//! The contract: a JSON object or `EmptyResponse`/`MalformedJson`, never an
//! indexing or length panic, never a silent partial value.

use acetrade::application::robust_json::RobustJsonDecoder;
use acetrade::domain::errors::DecodeError;
use chrono::Utc;

fn decode(text: &str) -> Result<serde_json::Value, DecodeError> {
    RobustJsonDecoder::new().decode(text, Utc::now())
}

const WELL_FORMED: &[(&str, &str)] = &[
    // (input, expected value of "k")
    (r#"{"k": "plain"}"#, "plain"),
    ("```json\n{\"k\": \"fenced\"}\n```", "fenced"),
    ("```JSON\n{\"k\": \"upper\"}\n```", "upper"),
    ("```\n{\"k\": \"bare fence\"}\n```", "bare fence"),
    ("```json{\"k\": \"no newline\"}```", "no newline"),
    ("noise before {\"k\": \"prose\"} noise after", "prose"),
    ("{\"k\": \"trailing percent\"} %", "trailing percent"),
    ("{\"k\": \"fence inside }\"} ```", "fence inside }"),
    ("\n\n   {\"k\": \"padded\"}   \n", "padded"),
];

#[test]
fn well_formed_corpus_decodes() {
    for (input, expected) in WELL_FORMED {
        let value = decode(input).unwrap_or_else(|e| panic!("{:?} failed: {}", input, e));
        assert_eq!(value["k"], *expected, "input: {:?}", input);
    }
}

const MALFORMED: &[&str] = &[
    "{\"truncated\": \"stri",
    "{\"open\": [1, 2",
    "{\"a\": 1,, \"b\": 2}",
    "[\"an\", \"array\"]",
    "\"just a string\"",
    "42",
    "null",
    "```json\n```",
    "``````",
    "``` ``` ```",
    "no json here at all",
    "{{{{",
    "}}}}",
    "{```}",
    "```{```}```",
    "{\"nested\": {\"complete\": true}, \"outer\": ",
];

#[test]
fn malformed_corpus_classified_not_panicking() {
    for input in MALFORMED {
        match decode(input) {
            Err(DecodeError::MalformedJson { head, tail, .. }) => {
                assert!(head.chars().count() <= 500);
                assert!(tail.chars().count() <= 200);
            }
            Err(DecodeError::EmptyResponse) => {}
            Ok(value) => panic!("{:?} unexpectedly decoded to {}", input, value),
        }
    }
}

#[test]
fn empty_inputs_are_empty_response() {
    for input in ["", " ", "\n", "\t\r\n  "] {
        assert!(
            matches!(decode(input), Err(DecodeError::EmptyResponse)),
            "input: {:?}",
            input
        );
    }
}

#[test]
fn embedded_json_in_commentary_is_extracted() {
    let text = r#"Sure! Based on the playbook, here's my analysis.

```json
{
  "bias": "bullish",
  "entry_zone": [1.0840, 1.0850],
  "note": "watch the { and } in strings"
}
```

Let me know if you need anything else!"#;

    let value = decode(text).unwrap();
    assert_eq!(value["bias"], "bullish");
    assert_eq!(value["entry_zone"][1], 1.0850);
}

#[test]
fn adversarial_unicode_and_long_inputs() {
    // Multi-byte characters around every boundary the decoder slices at.
    let cases = [
        format!("préface {} postface", r#"{"k": "é"}"#),
        format!("```json\n{{\"k\": \"日本語\"}}\n```"),
        format!("{{\"k\": \"{}\"", "🦀".repeat(300)), // truncated, emoji body
        "🦀".repeat(1000),
    ];
    for input in &cases {
        let _ = decode(input); // classification may vary; panics may not
    }

    let value = decode("{\"k\": \"é\"} tail").unwrap();
    assert_eq!(value["k"], "é");
}

#[test]
fn decoder_is_deterministic() {
    for input in MALFORMED {
        let a = format!("{:?}", decode(input));
        let b = format!("{:?}", decode(input));
        assert_eq!(a, b);
    }
}
