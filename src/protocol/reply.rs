//! Response Decoding
//!
//! Turns a framed response into a typed [`Reply`] using the command it
//! answers. The same line means different things depending on the request
//! (`Yes` is a boolean for `c`, a one-element list for `m`), so decoding is
//! always done against the command.

use crate::protocol::types::{token, CollectionListing, Command, Frame, Reply};
use std::collections::BTreeMap;
use thiserror::Error;

/// A response that is well framed but is not a success.
///
/// This is `Clone` so pipelines can store it in per-command result slots.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplyError {
    /// The server does not host the collection
    #[error("collection does not exist")]
    NotFound,

    /// `create` on a name the server already hosts
    #[error("collection already exists")]
    Exists,

    /// The server reported an error line
    #[error("server error: {0}")]
    Server(String),

    /// The response does not fit the command
    #[error("unexpected response to '{command}': {response}")]
    Unexpected {
        command: &'static str,
        response: String,
    },
}

/// Decodes `frame` as the response to `command`.
pub fn decode(command: &Command, frame: Frame) -> Result<Reply, ReplyError> {
    if let Frame::Line(line) = &frame {
        if line == token::NOT_FOUND {
            return Err(ReplyError::NotFound);
        }
        if line.starts_with(token::CLIENT_ERROR)
            || line.starts_with(token::INTERNAL_ERROR)
            || line == token::DELETE_IN_PROGRESS
        {
            return Err(ReplyError::Server(line.clone()));
        }
    }

    match (command, frame) {
        (Command::Create { .. }, Frame::Line(line)) if line == token::EXISTS => {
            Err(ReplyError::Exists)
        }
        (Command::Create { .. } | Command::Drop { .. } | Command::Flush { .. }, Frame::Line(line))
            if line == token::DONE =>
        {
            Ok(Reply::Done)
        }
        (Command::Set { .. } | Command::Check { .. }, Frame::Line(line)) => {
            match decode_bool(&line) {
                Some(b) => Ok(Reply::Bool(b)),
                None => Err(unexpected(command, &line)),
            }
        }
        (Command::Bulk { keys, .. } | Command::Multi { keys, .. }, Frame::Line(line)) => {
            decode_bools(&line, keys.len())
                .map(Reply::Bools)
                .ok_or_else(|| unexpected(command, &line))
        }
        (Command::List, Frame::Block(lines)) => Ok(Reply::Listing(
            lines
                .iter()
                .filter_map(|line| CollectionListing::parse(line))
                .collect(),
        )),
        (Command::Info { .. }, Frame::Block(lines)) => Ok(Reply::Info(decode_info(&lines))),
        (command, frame) => Err(unexpected(command, &frame.to_string())),
    }
}

fn decode_bool(token: &str) -> Option<bool> {
    match token {
        token::YES => Some(true),
        token::NO => Some(false),
        _ => None,
    }
}

/// Decodes `Yes No Yes`, requiring exactly one answer per key.
fn decode_bools(line: &str, expected: usize) -> Option<Vec<bool>> {
    let answers = line
        .split_whitespace()
        .map(decode_bool)
        .collect::<Option<Vec<bool>>>()?;
    (answers.len() == expected).then_some(answers)
}

fn decode_info(lines: &[String]) -> BTreeMap<String, String> {
    lines
        .iter()
        .filter_map(|line| {
            let (key, value) = line.trim().split_once(' ')?;
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

fn unexpected(command: &Command, response: &str) -> ReplyError {
    ReplyError::Unexpected {
        command: command.keyword(),
        response: response.to_string(),
    }
}
