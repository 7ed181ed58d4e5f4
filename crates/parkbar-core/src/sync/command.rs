use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;
use core::marker::PhantomData;

use log::warn;
use serde::de::{SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::actuator::BarrierPosition;

/// Upper bound on commands accepted from one poll. Later entries are left
/// for the backend to re-issue.
pub const MAX_COMMANDS_PER_POLL: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    SetBarrier(BarrierPosition),
    /// Clear a latched actuator fault
    Reset,
    /// A command name this firmware does not implement
    Unsupported(String),
}

/// Remote instruction, applied at most once per `id`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: u64,
    pub kind: CommandKind,
    /// Backend timestamp, kept verbatim for logging
    pub issued_at: Option<String>,
}

impl CommandKind {
    fn from_name(name: &str) -> Self {
        match name {
            "raise_barrier" | "up" | "UP" => Self::SetBarrier(BarrierPosition::Up),
            "lower_barrier" | "down" | "DOWN" => Self::SetBarrier(BarrierPosition::Down),
            "reset" => Self::Reset,
            other => Self::Unsupported(other.to_string()),
        }
    }
}

#[derive(Deserialize)]
struct WireCommand<'a> {
    id: u64,
    #[serde(borrow)]
    command: &'a str,
    #[serde(default, borrow)]
    created_at: Option<&'a str>,
}

/// Leading commands of one poll plus a count of the ones that did not fit
struct Batch<'a> {
    commands: heapless::Vec<WireCommand<'a>, MAX_COMMANDS_PER_POLL>,
    dropped: usize,
}

struct BatchVisitor<'a>(PhantomData<&'a ()>);

impl<'de: 'a, 'a> Visitor<'de> for BatchVisitor<'a> {
    type Value = Batch<'a>;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("an array of commands")
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut batch = Batch {
            commands: heapless::Vec::new(),
            dropped: 0,
        };
        while let Some(command) = seq.next_element::<WireCommand<'a>>()? {
            if batch.commands.push(command).is_err() {
                batch.dropped += 1;
            }
        }
        Ok(batch)
    }
}

impl<'de: 'a, 'a> Deserialize<'de> for Batch<'a> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_seq(BatchVisitor(PhantomData))
    }
}

#[derive(Deserialize)]
struct Envelope<'a> {
    #[serde(borrow)]
    commands: Batch<'a>,
}

impl From<WireCommand<'_>> for Command {
    fn from(wire: WireCommand<'_>) -> Self {
        Self {
            id: wire.id,
            kind: CommandKind::from_name(wire.command),
            issued_at: wire.created_at.map(ToString::to_string),
        }
    }
}

/// Decode a command poll body.
///
/// Accepts a bare JSON array or an object with a `commands` array. An empty
/// body means no commands. Only the first [`MAX_COMMANDS_PER_POLL`] entries
/// are returned.
pub fn decode_commands(body: &[u8]) -> Result<Vec<Command>, serde_json_core::de::Error> {
    let start = body
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(body.len());
    let body = &body[start..];

    let batch = match body.first() {
        None => return Ok(Vec::new()),
        Some(b'[') => serde_json_core::from_slice::<Batch<'_>>(body)?.0,
        Some(_) => serde_json_core::from_slice::<Envelope<'_>>(body)?.0.commands,
    };
    if batch.dropped > 0 {
        warn!(
            "Poll returned {} commands, deferring {} to a later poll",
            batch.commands.len() + batch.dropped,
            batch.dropped
        );
    }

    Ok(batch.commands.into_iter().map(Command::from).collect())
}

/// Outcome reported back for a handled command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Done,
    Failed,
    /// Already handled earlier, the acknowledgement was probably lost
    Duplicate,
}

#[derive(Serialize)]
pub(crate) struct AckBody {
    pub status: AckStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_wrapped_backend_payload() {
        let body = br#"{"commands": [
            {"id": 5, "command": "raise_barrier", "parameters": {}, "created_at": "2025-06-01 10:00:00"},
            {"id": 6, "command": "lower_barrier", "created_at": null}
        ]}"#;

        let commands = decode_commands(body).unwrap();

        assert_eq!(
            commands,
            vec![
                Command {
                    id: 5,
                    kind: CommandKind::SetBarrier(BarrierPosition::Up),
                    issued_at: Some("2025-06-01 10:00:00".into()),
                },
                Command {
                    id: 6,
                    kind: CommandKind::SetBarrier(BarrierPosition::Down),
                    issued_at: None,
                },
            ]
        );
    }

    #[test]
    fn decodes_bare_array() {
        let commands = decode_commands(br#" [{"id": 9, "command": "reset"}]"#).unwrap();
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].kind, CommandKind::Reset);
        assert_eq!(commands[0].issued_at, None);
    }

    #[test]
    fn empty_body_and_empty_list_mean_no_commands() {
        assert!(decode_commands(b"").unwrap().is_empty());
        assert!(decode_commands(b"  \n").unwrap().is_empty());
        assert!(decode_commands(b"[]").unwrap().is_empty());
        assert!(decode_commands(br#"{"commands": []}"#).unwrap().is_empty());
    }

    fn reset_batch(count: u64) -> String {
        let entries: Vec<String> = (1..=count)
            .map(|id| alloc::format!(r#"{{"id":{},"command":"reset"}}"#, id))
            .collect();
        alloc::format!("[{}]", entries.join(","))
    }

    #[test]
    fn oversized_batch_keeps_leading_commands() {
        let body = reset_batch(MAX_COMMANDS_PER_POLL as u64 + 1);

        let commands = decode_commands(body.as_bytes()).unwrap();

        assert_eq!(commands.len(), MAX_COMMANDS_PER_POLL);
        assert_eq!(commands[0].id, 1);
        assert_eq!(commands[MAX_COMMANDS_PER_POLL - 1].id, 16);
    }

    #[test]
    fn oversized_envelope_keeps_leading_commands() {
        let body = alloc::format!(r#"{{"commands":{}}}"#, reset_batch(20));

        let commands = decode_commands(body.as_bytes()).unwrap();

        assert_eq!(commands.len(), MAX_COMMANDS_PER_POLL);
        assert!(commands.iter().all(|c| c.kind == CommandKind::Reset));
    }

    #[test]
    fn unknown_names_are_kept_as_unsupported() {
        let commands = decode_commands(br#"[{"id": 3, "command": "update_settings"}]"#).unwrap();
        assert_eq!(
            commands[0].kind,
            CommandKind::Unsupported("update_settings".into())
        );
    }

    #[test]
    fn malformed_bodies_are_errors() {
        assert!(decode_commands(b"{\"commands\": [").is_err());
        assert!(decode_commands(br#"[{"command": "reset"}]"#).is_err());
        assert!(decode_commands(b"<html>").is_err());
    }

    #[test]
    fn ack_body_encodes_status() {
        let mut buf = [0u8; 32];
        let len = serde_json_core::to_slice(&AckBody { status: AckStatus::Done }, &mut buf).unwrap();
        assert_eq!(&buf[..len], br#"{"status":"done"}"#);
    }
}
