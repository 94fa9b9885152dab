//! Text encoding of [`FailureDetail`] inside an evaluation comment.
//!
//! Older evaluation records carry their failure detail only as a delimited
//! block inside the free-text comment. The block body is a JSON object in
//! the current format, or `key: value` lines in the oldest records:
//!
//! ```text
//! Rework required.
//!
//! [FAILURE_DETAIL]
//! {"failedOrderIndex":2,"stageName":"Hulling","details":"moisture too high","recommendations":""}
//! [/FAILURE_DETAIL]
//! ```
//!
//! Decoding never fails loudly: anything unreadable is reported as `None`.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::FailureDetail;

const BLOCK_START: &str = "[FAILURE_DETAIL]";
const BLOCK_END: &str = "[/FAILURE_DETAIL]";

static RE_LEGACY_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([A-Za-z][A-Za-z_ ]*?)\s*[:=]\s*(.*?)\s*$").unwrap());

/// Why a comment did not yield a failure detail. Only ever logged.
#[derive(Debug, Clone, PartialEq, Eq)]
enum DecodeFailure {
    MissingBlock,
    UnterminatedBlock,
    Malformed(String),
    MissingField(&'static str),
    InvalidOrderIndex(String),
}

/// Encodes a failure detail as a standalone block.
pub fn encode(detail: &FailureDetail) -> String {
    // Brackets only occur inside string values, so escaping them keeps the
    // end marker out of the body.
    let json = serde_json::to_string(detail)
        .unwrap_or_default()
        .replace('[', "\\u005b")
        .replace(']', "\\u005d");
    format!("{}\n{}\n{}", BLOCK_START, json, BLOCK_END)
}

/// Appends the encoded block to a comment, replacing any block already there.
pub fn attach(comment: &str, detail: &FailureDetail) -> String {
    let text = strip(comment);
    if text.is_empty() {
        encode(detail)
    } else {
        format!("{}\n\n{}", text, encode(detail))
    }
}

/// Returns the comment without its failure-detail block.
pub fn strip(comment: &str) -> String {
    let Some(start) = comment.find(BLOCK_START) else {
        return comment.trim().to_string();
    };
    let after = &comment[start + BLOCK_START.len()..];
    let rest = match after.find(BLOCK_END) {
        Some(end) => &after[end + BLOCK_END.len()..],
        None => "",
    };
    let mut text = comment[..start].trim_end().to_string();
    let rest = rest.trim();
    if !rest.is_empty() {
        if !text.is_empty() {
            text.push_str("\n\n");
        }
        text.push_str(rest);
    }
    text.trim().to_string()
}

/// Decodes the failure detail embedded in a comment.
///
/// Returns `None` for comments without a block and for blocks that cannot
/// be read; callers treat both the same way.
pub fn decode(comment: &str) -> Option<FailureDetail> {
    match try_decode(comment) {
        Ok(detail) => Some(detail),
        Err(DecodeFailure::MissingBlock) => None,
        Err(reason) => {
            log::debug!("Ignoring unreadable failure detail block: {:?}", reason);
            None
        }
    }
}

fn try_decode(comment: &str) -> Result<FailureDetail, DecodeFailure> {
    let start = comment
        .find(BLOCK_START)
        .ok_or(DecodeFailure::MissingBlock)?;
    let after = &comment[start + BLOCK_START.len()..];
    let end = after
        .find(BLOCK_END)
        .ok_or(DecodeFailure::UnterminatedBlock)?;
    let body = after[..end].trim();

    let detail = if body.starts_with('{') {
        serde_json::from_str::<FailureDetail>(body)
            .map_err(|e| DecodeFailure::Malformed(e.to_string()))?
    } else {
        decode_legacy_lines(body)?
    };

    if detail.failed_order_index == 0 {
        return Err(DecodeFailure::InvalidOrderIndex("0".to_string()));
    }
    if detail.stage_name.trim().is_empty() {
        return Err(DecodeFailure::MissingField("stageName"));
    }
    Ok(detail)
}

fn decode_legacy_lines(body: &str) -> Result<FailureDetail, DecodeFailure> {
    let mut order_index = None;
    let mut stage_name = None;
    let mut stage_id = None;
    let mut details = String::new();
    let mut recommendations = String::new();

    for line in body.lines().filter(|l| !l.trim().is_empty()) {
        let Some(caps) = RE_LEGACY_LINE.captures(line) else {
            return Err(DecodeFailure::Malformed(format!("unrecognized line '{}'", line)));
        };
        let value = caps[2].to_string();
        match caps[1].to_ascii_lowercase().replace(['_', ' '], "").as_str() {
            "orderindex" | "failedorderindex" | "stageorder" => {
                let parsed = value
                    .parse::<u32>()
                    .map_err(|_| DecodeFailure::InvalidOrderIndex(value.clone()))?;
                order_index = Some(parsed);
            }
            "stagename" | "stage" => stage_name = Some(value),
            "stageid" => {
                if !value.is_empty() {
                    stage_id = Some(value);
                }
            }
            "details" | "reason" => details = value,
            "recommendations" | "recommendation" => recommendations = value,
            other => {
                log::debug!("Skipping unknown failure detail key '{}'", other);
            }
        }
    }

    Ok(FailureDetail {
        failed_order_index: order_index.ok_or(DecodeFailure::MissingField("orderIndex"))?,
        stage_name: stage_name.ok_or(DecodeFailure::MissingField("stageName"))?,
        stage_id,
        details,
        recommendations,
    })
}
