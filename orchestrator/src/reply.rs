use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

use banter_common::debug;
use banter_common::json::{self, JsonValue, PathSeg};
use banter_common::protocol::{ChatCompletion, StructuredReply};

use crate::scorer;

/// Score used when the model gives none (or we had to synthesize the reply).
pub const NEUTRAL_SCORE: u8 = 50;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("no message content in chat response")]
    MissingContent,
    #[error("message content is blank")]
    EmptyContent,
    #[error("JSON block does not decode to a reply")]
    UndecodableBlock,
}

/// Which strategy produced a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    StrictBlock,
    LooseBlock,
    NoJson,
}

/// A decoded reply plus the exact JSON text it came from. For [`Stage::NoJson`]
/// the JSON is synthesized, so history still records a machine-parseable turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedReply {
    pub reply: StructuredReply,
    pub json: String,
    pub stage: Stage,
}

type ContentStrategy = fn(&str) -> Option<String>;
type BlockStrategy = fn(&str) -> Option<StructuredReply>;

const CONTENT_STRATEGIES: &[(&str, ContentStrategy)] = &[
    ("strict envelope", content_from_envelope),
    ("generic tree", content_from_tree),
];

const BLOCK_STRATEGIES: &[(Stage, BlockStrategy)] = &[
    (Stage::StrictBlock, decode_strict),
    (Stage::LooseBlock, decode_loose),
];

/// Parse a raw chat-completion body.
pub fn parse_response(raw: &str) -> Result<ParsedReply, ParseError> {
    let content = CONTENT_STRATEGIES
        .iter()
        .find_map(|(name, strategy)| {
            let found = strategy(raw);
            if found.is_none() {
                debug!("[reply] Content strategy '{name}' found nothing");
            }
            found
        })
        .ok_or(ParseError::MissingContent)?;
    parse_content(&content)
}

/// Parse the assistant message text itself.
pub fn parse_content(content: &str) -> Result<ParsedReply, ParseError> {
    if content.trim().is_empty() {
        return Err(ParseError::EmptyContent);
    }

    let Some(block) = find_balanced_block(content) else {
        return Ok(reply_without_json(content));
    };

    BLOCK_STRATEGIES
        .iter()
        .find_map(|(stage, strategy)| {
            strategy(block).map(|reply| ParsedReply {
                reply,
                json: block.to_string(),
                stage: *stage,
            })
        })
        .ok_or(ParseError::UndecodableBlock)
}

// --- Content extraction ---

fn content_from_envelope(raw: &str) -> Option<String> {
    let completion: ChatCompletion = serde_json::from_str(raw).ok()?;
    completion
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
}

fn content_from_tree(raw: &str) -> Option<String> {
    let tree = json::parse(raw)?;
    let content = json::navigate(
        &tree,
        &[
            PathSeg::Key("choices"),
            PathSeg::Index(0),
            PathSeg::Key("message"),
            PathSeg::Key("content"),
        ],
    )?;

    let text = match content {
        JsonValue::String(s) => s.clone(),
        // Some providers send a list of typed parts.
        JsonValue::Array(parts) => parts
            .iter()
            .filter_map(|part| json::navigate(part, &[PathSeg::Key("text")]))
            .filter_map(json::as_text)
            .collect::<Vec<_>>()
            .join(""),
        _ => return None,
    };
    Some(text).filter(|t| !t.trim().is_empty())
}

/// First top-level `{...}` span in `text`. Braces inside double-quoted strings
/// (anywhere in the text, not only inside the block) are ignored.
pub fn find_balanced_block(text: &str) -> Option<&str> {
    let mut depth: u32 = 0;
    let mut in_string = false;
    let mut escaped = false;
    let mut start: Option<usize> = None;

    for (idx, byte) in text.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            b'}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return start.map(|s| &text[s..=idx]);
                }
            }
            _ => {}
        }
    }
    None
}

// --- Block decoding ---

#[derive(Deserialize)]
struct StrictReply {
    spoken: String,
    score: i64,
    insults: bool,
}

fn decode_strict(block: &str) -> Option<StructuredReply> {
    let strict: StrictReply = serde_json::from_str(block).ok()?;
    let spoken = sanitize(&strict.spoken);
    if spoken.is_empty() {
        return None;
    }
    Some(StructuredReply {
        spoken,
        score: clamp_score(strict.score),
        insults: strict.insults,
    })
}

fn decode_loose(block: &str) -> Option<StructuredReply> {
    let JsonValue::Object(fields) = json::parse(block)? else {
        return None;
    };

    let spoken = sanitize(fields.get("spoken").and_then(json::as_text)?);
    if spoken.is_empty() {
        return None;
    }
    let score = fields
        .get("score")
        .and_then(json::as_int_lenient)
        .map_or(NEUTRAL_SCORE, clamp_score);
    let insults = fields
        .get("insults")
        .and_then(json::as_bool_lenient)
        .unwrap_or(false);

    Some(StructuredReply {
        spoken,
        score,
        insults,
    })
}

/// The model ignored the format entirely: speak its text as-is and judge it locally.
fn reply_without_json(content: &str) -> ParsedReply {
    let spoken = sanitize(content);
    let reply = StructuredReply {
        insults: scorer::detect_insults(&spoken),
        spoken,
        score: NEUTRAL_SCORE,
    };
    let json = serde_json::to_string(&reply).unwrap_or_default();
    ParsedReply {
        reply,
        json,
        stage: Stage::NoJson,
    }
}

fn clamp_score(score: i64) -> u8 {
    score.clamp(0, 100) as u8
}

// --- Sanitization ---

static STAGE_DIRECTIONS: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"\[[^\]]*\]").expect("valid regex"),
        Regex::new(r"\([^)]*\)").expect("valid regex"),
        Regex::new(r"\*[^*]*\*").expect("valid regex"),
    ]
});

static SPACE_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[ \t]{2,}").expect("valid regex"));

/// Strip `[stage directions]`, `(asides)` and `*actions*`, collapse doubled
/// spaces and trim. Applying it twice changes nothing.
pub fn sanitize(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in STAGE_DIRECTIONS.iter() {
        out = pattern.replace_all(&out, "").into_owned();
    }
    SPACE_RUNS.replace_all(&out, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(content: &str) -> String {
        serde_json::json!({
            "id": "chatcmpl-1",
            "choices": [{"index": 0, "message": {"role": "assistant", "content": content}}]
        })
        .to_string()
    }

    // --- end-to-end parse ---

    #[test]
    fn clean_json_reply() {
        let parsed =
            parse_response(&envelope(r#"{"spoken":"Hello","score":80,"insults":false}"#)).unwrap();
        assert_eq!(
            parsed.reply,
            StructuredReply {
                spoken: "Hello".into(),
                score: 80,
                insults: false
            }
        );
        assert_eq!(parsed.stage, Stage::StrictBlock);
        assert_eq!(parsed.json, r#"{"spoken":"Hello","score":80,"insults":false}"#);
    }

    #[test]
    fn prose_around_json_is_discarded() {
        let block = r#"{"spoken":"Beware","score":10,"insults":true}"#;
        let parsed = parse_response(&envelope(&format!("Sure! {block} end."))).unwrap();
        assert_eq!(parsed.reply.spoken, "Beware");
        assert_eq!(parsed.reply.score, 10);
        assert!(parsed.reply.insults);
        assert_eq!(parsed.json, block);
    }

    #[test]
    fn code_fenced_reply() {
        let content = "```json\n{\"spoken\": \"Oui\", \"score\": 70, \"insults\": false}\n```";
        let parsed = parse_response(&envelope(content)).unwrap();
        assert_eq!(parsed.reply.spoken, "Oui");
        assert_eq!(parsed.reply.score, 70);
    }

    #[test]
    fn no_json_falls_back_to_whole_text() {
        let parsed =
            parse_response(&envelope("*smiles* Well,  you are an idiot (laughs).")).unwrap();
        assert_eq!(parsed.stage, Stage::NoJson);
        assert_eq!(parsed.reply.spoken, "Well, you are an idiot .");
        assert_eq!(parsed.reply.score, NEUTRAL_SCORE);
        assert!(parsed.reply.insults);

        let recorded: StructuredReply = serde_json::from_str(&parsed.json).unwrap();
        assert_eq!(recorded, parsed.reply);
    }

    #[test]
    fn no_json_polite_text_is_not_an_insult() {
        let parsed = parse_response(&envelope("Bonjour mon ami.")).unwrap();
        assert!(!parsed.reply.insults);
        assert_eq!(parsed.reply.score, 50);
    }

    #[test]
    fn missing_content_is_an_error() {
        assert_eq!(
            parse_response(r#"{"error":{"message":"rate limited"}}"#),
            Err(ParseError::MissingContent)
        );
        assert_eq!(parse_response("<html>502</html>"), Err(ParseError::MissingContent));
        assert_eq!(
            parse_response(r#"{"choices":[]}"#),
            Err(ParseError::MissingContent)
        );
        assert_eq!(
            parse_response(r#"{"choices":[{"message":{"content":42}}]}"#),
            Err(ParseError::MissingContent)
        );
    }

    #[test]
    fn blank_content_is_an_error() {
        assert_eq!(parse_content("  \n "), Err(ParseError::EmptyContent));
        assert_eq!(parse_response(&envelope("   ")), Err(ParseError::MissingContent));
    }

    #[test]
    fn content_parts_array_is_joined() {
        let raw = serde_json::json!({
            "choices": [{"message": {"content": [
                {"type": "text", "text": "{\"spoken\":\"Salut\","},
                {"type": "text", "text": "\"score\":65,\"insults\":false}"}
            ]}}]
        })
        .to_string();
        let parsed = parse_response(&raw).unwrap();
        assert_eq!(parsed.reply.spoken, "Salut");
        assert_eq!(parsed.reply.score, 65);
    }

    // --- strict / loose decoding ---

    #[test]
    fn loose_decoding_coerces_types() {
        let parsed =
            parse_content(r#"{"spoken":"Bien","score":"72","insults":"TRUE"}"#).unwrap();
        assert_eq!(parsed.stage, Stage::LooseBlock);
        assert_eq!(parsed.reply.score, 72);
        assert!(parsed.reply.insults);

        let parsed = parse_content(r#"{"spoken":"Bien","score":80.9,"insults":false}"#).unwrap();
        assert_eq!(parsed.reply.score, 80);
    }

    #[test]
    fn loose_decoding_defaults_missing_fields() {
        let parsed = parse_content(r#"{"spoken":"Bien"}"#).unwrap();
        assert_eq!(parsed.reply.score, NEUTRAL_SCORE);
        assert!(!parsed.reply.insults);

        let parsed = parse_content(r#"{"spoken":"Bien","score":null,"insults":3}"#).unwrap();
        assert_eq!(parsed.reply.score, NEUTRAL_SCORE);
        assert!(!parsed.reply.insults);
    }

    #[test]
    fn scores_are_clamped() {
        assert_eq!(
            parse_content(r#"{"spoken":"a","score":250,"insults":false}"#)
                .unwrap()
                .reply
                .score,
            100
        );
        assert_eq!(
            parse_content(r#"{"spoken":"a","score":"-12","insults":false}"#)
                .unwrap()
                .reply
                .score,
            0
        );
    }

    #[test]
    fn blank_spoken_fails_both_decoders() {
        assert_eq!(
            parse_content(r#"{"spoken":"(sighs)","score":40,"insults":false}"#),
            Err(ParseError::UndecodableBlock)
        );
        assert_eq!(
            parse_content(r#"Here: {"score":40}"#),
            Err(ParseError::UndecodableBlock)
        );
    }

    #[test]
    fn spoken_is_sanitized() {
        let parsed =
            parse_content(r#"{"spoken":"[angry] Va-t'en  !","score":20,"insults":false}"#).unwrap();
        assert_eq!(parsed.reply.spoken, "Va-t'en !");
    }

    // --- balanced block ---

    #[test]
    fn block_ignores_braces_in_strings() {
        let text = r#"He said "use {curly} braces" then {"spoken":"a } b","score":1,"insults":false} ok"#;
        assert_eq!(
            find_balanced_block(text),
            Some(r#"{"spoken":"a } b","score":1,"insults":false}"#)
        );
    }

    #[test]
    fn block_handles_escaped_quotes_and_nesting() {
        let text = r#"x {"spoken":"say \"}\" now","meta":{"k":[1,{"z":2}]}} y {"second":true}"#;
        assert_eq!(
            find_balanced_block(text),
            Some(r#"{"spoken":"say \"}\" now","meta":{"k":[1,{"z":2}]}}"#)
        );
    }

    #[test]
    fn block_requires_closing_brace() {
        assert_eq!(find_balanced_block(r#"{"spoken":"cut off"#), None);
        assert_eq!(find_balanced_block("no braces at all"), None);
        assert_eq!(find_balanced_block("} stray {}"), Some("{}"));
    }

    #[test]
    fn block_with_unicode_prose() {
        let text = "Voilà, réponse : {\"spoken\":\"Très bien\",\"score\":90,\"insults\":false} 🎉";
        let parsed = parse_content(text).unwrap();
        assert_eq!(parsed.reply.spoken, "Très bien");
    }

    // --- sanitize ---

    #[test]
    fn sanitize_strips_directions() {
        assert_eq!(sanitize("*waves* Hello [pause] there (quietly)!"), "Hello there !");
        assert_eq!(sanitize("  plain   text  "), "plain text");
        assert_eq!(sanitize("(only an aside)"), "");
    }

    #[test]
    fn sanitize_is_idempotent() {
        let samples = [
            "*waves* Hello [pause] there (quietly)!",
            "[a (b] c) d",
            "nested ([x]) and **bold** and * lone star",
            "tabs\t\tand  spaces   mixed",
            "[unclosed ( bracket",
            "",
        ];
        for s in samples {
            let once = sanitize(s);
            assert_eq!(sanitize(&once), once, "input: {s:?}");
        }
    }
}
