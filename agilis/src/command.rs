use std::fmt;
use std::io::{self, ErrorKind, Read, Write};

const TERMINATOR: &[u8] = b"\r\n";
const MAX_REPLY_LEN: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    One = 1,
    Two = 2,
}

impl Axis {
    pub fn number(self) -> u8 {
        self as u8
    }
}

/// Controller mnemonics as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgilisCommand {
    RemoteMode,
    SelectChannel(u8),
    QueryChannel,
    StepAmplitudePositive(Axis, u8),
    StepAmplitudeNegative(Axis, u8),
    RelativeMove(Axis, i32),
    MoveToLimit(Axis, i8),
    Stop(Axis),
    AxisStatus(Axis),
    LimitStatus,
    LastError,
}

impl AgilisCommand {
    /// Reply prefix for queries, `None` for commands the controller does not answer.
    pub fn reply_prefix(&self) -> Option<String> {
        match self {
            AgilisCommand::QueryChannel => Some("CC".into()),
            AgilisCommand::AxisStatus(axis) => Some(format!("{}TS", axis.number())),
            AgilisCommand::LimitStatus => Some("PH".into()),
            AgilisCommand::LastError => Some("TE".into()),
            _ => None,
        }
    }
}

impl fmt::Display for AgilisCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgilisCommand::RemoteMode => write!(f, "MR"),
            AgilisCommand::SelectChannel(channel) => write!(f, "CC{channel}"),
            AgilisCommand::QueryChannel => write!(f, "CC?"),
            AgilisCommand::StepAmplitudePositive(axis, amplitude) => {
                write!(f, "{}SU+{amplitude}", axis.number())
            }
            AgilisCommand::StepAmplitudeNegative(axis, amplitude) => {
                write!(f, "{}SU-{amplitude}", axis.number())
            }
            AgilisCommand::RelativeMove(axis, steps) => write!(f, "{}PR{steps}", axis.number()),
            AgilisCommand::MoveToLimit(axis, speed) => write!(f, "{}MV{speed}", axis.number()),
            AgilisCommand::Stop(axis) => write!(f, "{}ST", axis.number()),
            AgilisCommand::AxisStatus(axis) => write!(f, "{}TS", axis.number()),
            AgilisCommand::LimitStatus => write!(f, "PH"),
            AgilisCommand::LastError => write!(f, "TE"),
        }
    }
}

pub(crate) fn send(sender: &mut (impl Write + Read), command: AgilisCommand) -> io::Result<()> {
    let mut frame = command.to_string().into_bytes();
    frame.extend_from_slice(TERMINATOR);
    sender.write_all(&frame)?;
    sender.flush()
}

pub(crate) fn read_line(sender: &mut (impl Write + Read)) -> io::Result<String> {
    let mut line = Vec::with_capacity(16);
    let mut byte = [0u8; 1];

    loop {
        if sender.read(&mut byte)? == 0 {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                "Controller closed the connection",
            ));
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > MAX_REPLY_LEN {
            return Err(io::Error::new(ErrorKind::InvalidData, "Reply too long"));
        }
    }

    let line = String::from_utf8(line).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
    Ok(line.trim_end_matches('\r').trim().to_string())
}

pub(crate) fn parse_reply(reply: &str, prefix: &str) -> io::Result<i32> {
    reply
        .strip_prefix(prefix)
        .and_then(|value| value.trim().parse().ok())
        .ok_or_else(|| {
            io::Error::new(
                ErrorKind::InvalidData,
                format!("Unexpected reply {reply:?}, expected {prefix}<n>"),
            )
        })
}

/// Sends a query and returns the integer carried by its reply.
pub(crate) fn query(sender: &mut (impl Write + Read), command: AgilisCommand) -> io::Result<i32> {
    let prefix = command.reply_prefix().ok_or_else(|| {
        io::Error::new(ErrorKind::InvalidInput, format!("{command} has no reply"))
    })?;

    send(sender, command)?;
    let reply = read_line(sender)?;
    parse_reply(&reply, &prefix)
}
