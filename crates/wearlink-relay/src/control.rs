//! One-shot commands for the device host, used by `wearlink-relay control`.

use crate::protocol::Command;

/// Parse a command given on the command line: `resume`, `pause`, or a raw
/// JSON command object.
pub fn parse_command(arg: &str) -> Option<Command> {
    match arg.trim() {
        "resume" => Some(Command::Resume),
        "pause" => Some(Command::Pause),
        raw => Command::from_local(raw.as_bytes()),
    }
}

/// Write one command onto the device host's control socket.
#[cfg(unix)]
pub async fn send_command(socket: &std::path::Path, command: &Command) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut stream = tokio::net::UnixStream::connect(socket).await?;
    let bytes = command.to_json().map_err(std::io::Error::other)?;
    stream.write_all(&bytes).await?;
    stream.shutdown().await?;
    tracing::info!(%command, socket = %socket.display(), "Command sent");
    Ok(())
}
