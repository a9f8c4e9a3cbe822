use core::fmt;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::{Error, Result};

/// The role a worker advertises in its `Info` message
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Role {
    /// Generates game records with the current model (`sp`)
    SelfPlay,
    /// Trains the next model snapshot from accumulated records (`op`)
    Optimization,
}

impl Role {
    /// Parses the wire form of a role
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sp" => Some(Role::SelfPlay),
            "op" => Some(Role::Optimization),
            _ => None,
        }
    }
    /// The wire form of the role
    pub fn as_str(self) -> &'static str {
        match self {
            Role::SelfPlay => "sp",
            Role::Optimization => "op",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One inbound worker message.
///
/// | Verb | Payload |
/// |---|---|
/// | `Info` | `<name> <role>` |
/// | `SelfPlay` | `<moveCount> <payload>` (kept raw) |
/// | `Optimization_Done` | `<newModelIteration>` |
#[derive(Debug, Eq, PartialEq)]
pub enum Message<'a> {
    /// Worker identification, the first message of every session
    Info {
        /// Worker name
        name: &'a str,
        /// Advertised role, not yet validated
        role: &'a str,
    },
    /// One self-play game record
    SelfPlay {
        /// The raw remainder of the line: `<moveCount> <payload>`
        record: &'a str,
    },
    /// An optimization pass finished, producing the given model iteration
    OptimizationDone {
        /// The new model iteration
        model_iteration: i64,
    },
}

impl<'a> Message<'a> {
    /// Parses one inbound line. Fields are whitespace-tokenized with runs
    /// collapsed; the self-play record keeps the raw remainder of the line.
    pub fn parse(line: &'a str) -> Result<Self> {
        let line = line.trim_start();
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        match verb {
            "Info" => {
                let mut tokens = rest.split_whitespace();
                let name = tokens
                    .next()
                    .ok_or_else(|| Error::invalid_data("Info without a name"))?;
                let role = tokens
                    .next()
                    .ok_or_else(|| Error::invalid_data("Info without a role"))?;
                Ok(Message::Info { name, role })
            }
            "SelfPlay" => {
                if rest.is_empty() {
                    return Err(Error::invalid_data("empty self-play record"));
                }
                Ok(Message::SelfPlay { record: rest })
            }
            "Optimization_Done" => {
                let model_iteration = rest
                    .split_whitespace()
                    .next()
                    .ok_or_else(|| Error::invalid_data("Optimization_Done without an iteration"))?
                    .parse()?;
                Ok(Message::OptimizationDone { model_iteration })
            }
            _ => Err(Error::invalid_data(format!("unknown verb: {}", verb))),
        }
    }
}

/// Replaces CR/LF with spaces so a hostile message stays on one log line
pub fn sanitize(message: &str) -> String {
    message.replace(['\r', '\n'], " ")
}

struct Identity {
    name: String,
    role: Option<Role>,
}

/// Per-connection worker session.
///
/// Created on accept with an unknown identity; name and role become known on
/// the first `Info` message. The write half is serialized by a session-local
/// mutex, so bursts of several lines reach the worker in order and whole.
pub struct WorkerSession {
    id: usize,
    addr: SocketAddr,
    stream: Mutex<TcpStream>,
    identity: Mutex<Identity>,
    idle: AtomicBool,
    closed: AtomicBool,
}

impl WorkerSession {
    /// Wraps the write half of an accepted connection
    pub fn new(id: usize, stream: TcpStream, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            stream: Mutex::new(stream),
            identity: Mutex::new(Identity {
                name: "?".to_owned(),
                role: None,
            }),
            idle: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }
    /// Session id, unique for the lifetime of the server
    pub fn id(&self) -> usize {
        self.id
    }
    /// Peer address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
    /// Records the worker identity announced by `Info`. Role transitions
    /// are one-shot: once a valid role is set it stays.
    pub fn identify(&self, name: &str, role: Option<Role>) {
        let mut identity = self.identity.lock();
        if identity.role.is_none() {
            identity.name = name.to_owned();
            identity.role = role;
        }
    }
    /// Worker name (`?` before identification)
    pub fn name(&self) -> String {
        self.identity.lock().name.clone()
    }
    /// Worker role, if identified
    pub fn role(&self) -> Option<Role> {
        self.identity.lock().role
    }
    /// Wire form of the role (`unknown` before identification)
    pub fn role_str(&self) -> &'static str {
        self.role().map_or("unknown", Role::as_str)
    }
    /// Whether the worker is waiting for a job
    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::SeqCst)
    }
    /// Flips the idle flag
    pub fn set_idle(&self, idle: bool) {
        self.idle.store(idle, Ordering::SeqCst);
    }
    /// Whether the session has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
    /// Writes one protocol line to the worker
    pub fn write_line(&self, line: &str) -> Result<()> {
        let mut stream = self.stream.lock();
        write_all_lines(&mut stream, &[line])
    }
    /// Writes several protocol lines as one in-order burst
    pub fn write_burst(&self, lines: &[&str]) -> Result<()> {
        let mut stream = self.stream.lock();
        write_all_lines(&mut stream, lines)
    }
    /// Closes the session; returns true on the first close only
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _r = self.stream.lock().shutdown(Shutdown::Both);
        true
    }
}

fn write_all_lines(stream: &mut TcpStream, lines: &[&str]) -> Result<()> {
    use std::io::Write;
    for line in lines {
        stream.write_all(line.as_bytes())?;
        stream.write_all(b"\n")?;
    }
    stream.flush()?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_info() {
        assert_eq!(
            Message::parse("Info gpu-a sp").unwrap(),
            Message::Info {
                name: "gpu-a",
                role: "sp"
            }
        );
        // runs of spaces collapse for tokenized fields
        assert_eq!(
            Message::parse("Info  gpu-a   op").unwrap(),
            Message::Info {
                name: "gpu-a",
                role: "op"
            }
        );
        assert!(Message::parse("Info gpu-a").is_err());
    }

    #[test]
    fn test_parse_self_play() {
        let message = Message::parse("SelfPlay 10 (;B[aa]weight_iter_7)").unwrap();
        assert_eq!(
            message,
            Message::SelfPlay {
                record: "10 (;B[aa]weight_iter_7)"
            }
        );
        assert!(Message::parse("SelfPlay").is_err());
    }

    #[test]
    fn test_parse_optimization_done() {
        assert_eq!(
            Message::parse("Optimization_Done 8").unwrap(),
            Message::OptimizationDone { model_iteration: 8 }
        );
        assert!(Message::parse("Optimization_Done eight").is_err());
        assert!(Message::parse("Optimization_Done").is_err());
    }

    #[test]
    fn test_parse_unknown_verb() {
        assert!(Message::parse("Garbage foo").is_err());
        assert!(Message::parse("").is_err());
    }

    #[test]
    fn test_sanitize() {
        insta::assert_snapshot!(sanitize("Garbage foo\r\nbar"), @"Garbage foo  bar");
    }

    #[test]
    fn test_role() {
        assert_eq!(Role::parse("sp"), Some(Role::SelfPlay));
        assert_eq!(Role::parse("op"), Some(Role::Optimization));
        assert_eq!(Role::parse("observer"), None);
        assert_eq!(Role::SelfPlay.to_string(), "sp");
    }
}
