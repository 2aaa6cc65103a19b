//! Line-oriented TCP control surface, per §6. Runs on a tokio runtime
//! alongside the synchronous engine loop; every mutating command becomes a
//! `ControlPlaneRequest` posted across the channel boundary, so the wire
//! protocol never touches engine state directly.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::control_plane::{ControlPlaneHandle, ControlPlaneRequest};
use crate::error::{CommandError, TcpError};

enum Command {
    SendData,
    SetSetpoint { channel: usize, value: f64 },
    SetAmplitude { channel: usize, value: f64 },
    SetKi(f64),
    SetFeedback { channel: usize, on: bool },
    AutoTune { scale: f64 },
    ResetAveraging,
}

impl Command {
    /// The channel index this command addresses, if any, so the caller can
    /// bounds-check it against the configured channel count before dispatch.
    fn channel(&self) -> Option<usize> {
        match *self {
            Command::SetSetpoint { channel, .. }
            | Command::SetAmplitude { channel, .. }
            | Command::SetFeedback { channel, .. } => Some(channel),
            Command::SendData | Command::SetKi(_) | Command::AutoTune { .. } | Command::ResetAveraging => None,
        }
    }
}

fn parse_command(line: &str) -> Result<Command, CommandError> {
    let mut parts = line.split_whitespace();
    let cmd = parts.next().ok_or(CommandError::Empty)?;
    let rest: Vec<&str> = parts.collect();

    let parse_f64 = |arg: &str| -> Result<f64, CommandError> {
        arg.parse::<f64>().map_err(|source| CommandError::BadArgument { arg: arg.to_string(), source })
    };
    let parse_usize = |arg: &str| -> Result<usize, CommandError> {
        arg.parse::<f64>()
            .map_err(|source| CommandError::BadArgument { arg: arg.to_string(), source })
            .map(|v| v as usize)
    };
    let require_arity = |expected: usize| -> Result<(), CommandError> {
        if rest.len() != expected {
            Err(CommandError::WrongArity { command: cmd.to_string(), expected, got: rest.len() })
        } else {
            Ok(())
        }
    };

    match cmd {
        "sendData" | "send_data" => {
            require_arity(0)?;
            Ok(Command::SendData)
        }
        "setV" | "set_setpoint" => {
            require_arity(2)?;
            Ok(Command::SetSetpoint { channel: parse_usize(rest[0])?, value: parse_f64(rest[1])? })
        }
        "setI" | "set_amplitude" => {
            require_arity(2)?;
            Ok(Command::SetAmplitude { channel: parse_usize(rest[0])?, value: parse_f64(rest[1])? })
        }
        "setKi" | "set_ki" => {
            require_arity(1)?;
            Ok(Command::SetKi(parse_f64(rest[0])?))
        }
        "setFeed" | "set_feedback" => {
            require_arity(2)?;
            let on = parse_f64(rest[1])? != 0.0;
            Ok(Command::SetFeedback { channel: parse_usize(rest[0])?, on })
        }
        "autoTune" | "autotune" => {
            let scale = match rest.len() {
                0 => 1.0,
                1 => parse_f64(rest[0])?,
                got => return Err(CommandError::WrongArity { command: cmd.to_string(), expected: 1, got }),
            };
            Ok(Command::AutoTune { scale })
        }
        "reset_avg" => {
            require_arity(0)?;
            Ok(Command::ResetAveraging)
        }
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

/// `sendData`'s response: `amp_out`, `setpoint`, `X`, `phase`, `DC`, each N
/// little-endian f64s back to back. The source's "DC" field has no
/// counterpart in this engine's published quantities, so it is zero-filled.
fn encode_send_data(channels: usize, snapshot: &crate::engine::EngineSnapshot) -> Vec<u8> {
    let mut buf = Vec::with_capacity(channels * 5 * 8);
    for v in &snapshot.amp_out {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    for v in &snapshot.setpoint {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    for v in &snapshot.x {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    for v in &snapshot.phi {
        buf.extend_from_slice(&v.to_le_bytes());
    }
    for _ in 0..channels {
        buf.extend_from_slice(&0.0f64.to_le_bytes());
    }
    buf
}

async fn handle_connection(stream: TcpStream, control: ControlPlaneHandle, channels: usize) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::warn!("TCP connection read error: {e}");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let command = match parse_command(&line) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("malformed TCP command {line:?}: {e}");
                continue;
            }
        };

        if let Some(channel) = command.channel() {
            if channel >= channels {
                log::warn!(
                    "malformed TCP command {line:?}: {}",
                    CommandError::ChannelOutOfRange(channel)
                );
                continue;
            }
        }

        match command {
            Command::SendData => {
                let (tx, rx) = crossbeam_channel::bounded(1);
                control.send(ControlPlaneRequest::Snapshot(tx));
                let snapshot = match tokio::task::spawn_blocking(move || {
                    rx.recv_timeout(std::time::Duration::from_secs(1))
                })
                .await
                {
                    Ok(Ok(snap)) => snap,
                    _ => {
                        log::warn!("sendData: snapshot request timed out");
                        continue;
                    }
                };
                let payload = encode_send_data(channels, &snapshot);
                if let Err(e) = write_half.write_all(&payload).await {
                    log::warn!("TCP write failed: {e}");
                    break;
                }
            }
            Command::SetSetpoint { channel, value } => {
                control.send(ControlPlaneRequest::SetSetpoint { channel, value });
            }
            Command::SetAmplitude { channel, value } => {
                control.send(ControlPlaneRequest::SetAmp { channel, value });
            }
            Command::SetKi(v) => control.send(ControlPlaneRequest::SetKi(v)),
            Command::SetFeedback { channel, on } => {
                control.send(ControlPlaneRequest::SetFeedback { channel, on });
            }
            Command::AutoTune { scale } => control.send(ControlPlaneRequest::Autotune { scale }),
            Command::ResetAveraging => control.send(ControlPlaneRequest::ResetAveraging),
        }
    }
}

/// Serves the command protocol on `127.0.0.1:<port>` until the process
/// exits. Bind failure is logged and leaves TCP disabled; per-connection
/// errors close only that connection.
pub async fn serve(port: u16, control: ControlPlaneHandle, channels: usize) -> Result<(), TcpError> {
    let addr = format!("127.0.0.1:{port}");
    let listener = TcpListener::bind(&addr).await.map_err(|source| TcpError::ListenFailed {
        addr: addr.clone(),
        source,
    })?;
    log::info!("TCP control surface listening on {addr}");

    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                log::debug!("TCP connection from {peer}");
                let control = control.clone();
                tokio::spawn(handle_connection(stream, control, channels));
            }
            Err(e) => log::warn!("TCP accept failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_setpoint_command_and_its_alias() {
        match parse_command("setV 2 0.5").unwrap() {
            Command::SetSetpoint { channel, value } => {
                assert_eq!(channel, 2);
                assert!((value - 0.5).abs() < 1e-12);
            }
            _ => panic!("wrong variant"),
        }
        assert!(matches!(parse_command("set_setpoint 2 0.5").unwrap(), Command::SetSetpoint { .. }));
    }

    #[test]
    fn autotune_defaults_scale_to_one() {
        match parse_command("autoTune").unwrap() {
            Command::AutoTune { scale } => assert_eq!(scale, 1.0),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn unknown_command_is_an_error() {
        assert!(matches!(parse_command("frobnicate"), Err(CommandError::Unknown(_))));
    }

    #[test]
    fn wrong_arity_is_reported() {
        assert!(matches!(parse_command("setV 2"), Err(CommandError::WrongArity { .. })));
    }

    #[test]
    fn command_channel_extracts_the_addressed_index() {
        assert_eq!(parse_command("setV 2 0.5").unwrap().channel(), Some(2));
        assert_eq!(parse_command("setKi 0.1").unwrap().channel(), None);
        assert_eq!(parse_command("sendData").unwrap().channel(), None);
    }

    #[test]
    fn send_data_payload_has_five_arrays_of_n_doubles() {
        let engine = crate::engine::FeedbackEngine::new(3, 16);
        let snapshot = engine.snapshot();
        let payload = encode_send_data(3, &snapshot);
        assert_eq!(payload.len(), 3 * 5 * 8);
    }
}
