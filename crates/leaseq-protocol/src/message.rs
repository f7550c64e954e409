use crate::{ProtocolError, Result};
use leaseq_core::{Task, TaskId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Command verbs of the text protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Verb {
    Add,
    Get,
    Ack,
    In,
    Save,
}

impl Verb {
    pub const ALL: [Verb; 5] = [Verb::Add, Verb::Get, Verb::Ack, Verb::In, Verb::Save];

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Add => "ADD",
            Verb::Get => "GET",
            Verb::Ack => "ACK",
            Verb::In => "IN",
            Verb::Save => "SAVE",
        }
    }
}

/// Verbs are matched case-sensitively
impl FromStr for Verb {
    type Err = ProtocolError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "ADD" => Ok(Verb::Add),
            "GET" => Ok(Verb::Get),
            "ACK" => Ok(Verb::Ack),
            "IN" => Ok(Verb::In),
            "SAVE" => Ok(Verb::Save),
            _ => Err(ProtocolError::UnknownCommand(value.to_string())),
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed client request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Enqueue `data` into `queue`
    Add {
        queue: String,
        length: i64,
        data: String,
    },

    /// Lease the next idle task of `queue`
    Get { queue: String },

    /// Acknowledge a leased task
    Ack { queue: String, task_id: TaskId },

    /// Membership check
    In { queue: String, task_id: TaskId },

    /// Checkpoint the whole broker
    Save,
}

impl Command {
    /// Parse one request line.
    ///
    /// Tokens are whitespace-delimited. The `data` argument of ADD is the
    /// remainder of the line after the length token and may itself contain
    /// whitespace.
    pub fn parse(line: &str) -> Result<Self> {
        let (verb, rest) = split_token(line.trim());
        if verb.is_empty() {
            return Err(ProtocolError::EmptyRequest);
        }
        let verb: Verb = verb.parse()?;

        match verb {
            Verb::Add => {
                let (queue, tail) = split_token(rest);
                let (length, data) = split_token(tail);
                if queue.is_empty() || length.is_empty() || data.is_empty() {
                    return Err(ProtocolError::WrongArity {
                        verb,
                        expected: 3,
                        actual: rest.split_whitespace().count(),
                    });
                }
                let length = Task::parse_length(length)
                    .map_err(|_| ProtocolError::InvalidLength(length.to_string()))?;
                Ok(Command::Add {
                    queue: queue.to_string(),
                    length,
                    data: data.to_string(),
                })
            }
            Verb::Get => {
                let [queue] = args::<1>(verb, rest)?;
                Ok(Command::Get {
                    queue: queue.to_string(),
                })
            }
            Verb::Ack => {
                let [queue, task_id] = args::<2>(verb, rest)?;
                Ok(Command::Ack {
                    queue: queue.to_string(),
                    task_id: TaskId::from(task_id),
                })
            }
            Verb::In => {
                let [queue, task_id] = args::<2>(verb, rest)?;
                Ok(Command::In {
                    queue: queue.to_string(),
                    task_id: TaskId::from(task_id),
                })
            }
            Verb::Save => {
                args::<0>(verb, rest)?;
                Ok(Command::Save)
            }
        }
    }

    pub fn verb(&self) -> Verb {
        match self {
            Command::Add { .. } => Verb::Add,
            Command::Get { .. } => Verb::Get,
            Command::Ack { .. } => Verb::Ack,
            Command::In { .. } => Verb::In,
            Command::Save => Verb::Save,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Add {
                queue,
                length,
                data,
            } => write!(f, "ADD {queue} {length} {data}"),
            Command::Get { queue } => write!(f, "GET {queue}"),
            Command::Ack { queue, task_id } => write!(f, "ACK {queue} {task_id}"),
            Command::In { queue, task_id } => write!(f, "IN {queue} {task_id}"),
            Command::Save => f.write_str("SAVE"),
        }
    }
}

/// Broker replies. `Display` renders the exact wire text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// ADD: id of the new task
    Added(TaskId),

    /// GET: the leased task
    Task {
        id: TaskId,
        length: i64,
        data: String,
    },

    /// GET: nothing idle (`NONE`)
    NoTask,

    Yes,
    No,
    Ok,
    Error,
}

impl Response {
    pub fn from_task(task: &Task) -> Self {
        Response::Task {
            id: task.id.clone(),
            length: task.length,
            data: task.data.clone(),
        }
    }

    pub fn from_bool(value: bool) -> Self {
        if value {
            Response::Yes
        } else {
            Response::No
        }
    }

    /// Short label for logs and metrics
    pub fn outcome(&self) -> &'static str {
        match self {
            Response::Added(_) => "added",
            Response::Task { .. } => "task",
            Response::NoTask => "none",
            Response::Yes => "yes",
            Response::No => "no",
            Response::Ok => "ok",
            Response::Error => "error",
        }
    }

    /// Interpret a reply body; the wire format depends on which verb was sent.
    pub fn parse(verb: Verb, body: &str) -> Result<Self> {
        let body = body.trim();
        if body == "ERROR" {
            return Ok(Response::Error);
        }

        let unexpected = || ProtocolError::UnexpectedResponse {
            verb,
            body: body.to_string(),
        };

        match verb {
            Verb::Add => {
                if body.is_empty() || body.contains(char::is_whitespace) {
                    return Err(unexpected());
                }
                Ok(Response::Added(TaskId::from(body)))
            }
            Verb::Get => {
                if body == "NONE" {
                    return Ok(Response::NoTask);
                }
                let (id, tail) = split_token(body);
                let (length, data) = split_token(tail);
                let length = length.parse::<i64>().map_err(|_| unexpected())?;
                if id.is_empty() || data.is_empty() {
                    return Err(unexpected());
                }
                Ok(Response::Task {
                    id: TaskId::from(id),
                    length,
                    data: data.to_string(),
                })
            }
            Verb::Ack | Verb::In => match body {
                "YES" => Ok(Response::Yes),
                "NO" => Ok(Response::No),
                _ => Err(unexpected()),
            },
            Verb::Save => match body {
                "OK" => Ok(Response::Ok),
                _ => Err(unexpected()),
            },
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Added(id) => write!(f, "{id}"),
            Response::Task { id, length, data } => write!(f, "{id} {length} {data}"),
            Response::NoTask => f.write_str("NONE"),
            Response::Yes => f.write_str("YES"),
            Response::No => f.write_str("NO"),
            Response::Ok => f.write_str("OK"),
            Response::Error => f.write_str("ERROR"),
        }
    }
}

/// Split off the first whitespace-delimited token; the remainder has its
/// leading whitespace removed.
fn split_token(s: &str) -> (&str, &str) {
    let s = s.trim_start();
    match s.find(char::is_whitespace) {
        Some(i) => (&s[..i], s[i..].trim_start()),
        None => (s, ""),
    }
}

fn args<const N: usize>(verb: Verb, rest: &str) -> Result<[&str; N]> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let actual = tokens.len();
    tokens
        .try_into()
        .map_err(|_| ProtocolError::WrongArity {
            verb,
            expected: N,
            actual,
        })
}
