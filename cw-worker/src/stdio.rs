//! Worker transport over stdio
//!
//! Commands arrive as JSON lines on stdin. Responses and events leave on
//! stdout as [`WorkerFrame`] lines. Logging never touches stdout.

use cw_core::DeviceSession;
use cw_error::Result;
use cw_protocol::{
    decode_line, encode_line, read_line_bounded, Command, CommandEnvelope, EventEnvelope, Response,
    ResponseEnvelope, WorkerFrame, MAX_MESSAGE_SIZE, UNSOLICITED_SEQ,
};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::run_worker;

/// Serve one session until `quit` or end of input
pub async fn serve<R, W>(
    session: DeviceSession,
    events: mpsc::UnboundedReceiver<EventEnvelope>,
    input: R,
    output: W,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (response_tx, response_rx) = mpsc::unbounded_channel();

    let reader = tokio::spawn(read_commands(
        BufReader::new(input),
        command_tx,
        response_tx.clone(),
    ));
    let writer = tokio::spawn(write_frames(output, response_rx, events));

    run_worker(session, command_rx, response_tx).await;

    // The reader may still be parked on stdin; nothing it reads matters now.
    reader.abort();
    match writer.await {
        Ok(result) => result,
        Err(e) => {
            error!("Output task failed: {}", e);
            Ok(())
        }
    }
}

/// Write a single unsolicited failure and flush. Used when the worker cannot start.
pub async fn report_fatal<W: AsyncWrite + Unpin>(
    output: &mut W,
    message: impl Into<String>,
) -> Result<()> {
    let frame = WorkerFrame::Response(ResponseEnvelope::unsolicited(Response::error(message)));
    output.write_all(&encode_line(&frame)?).await?;
    output.flush().await?;
    Ok(())
}

async fn read_commands<R: AsyncBufRead + Unpin>(
    mut input: R,
    commands: mpsc::UnboundedSender<CommandEnvelope>,
    responses: mpsc::UnboundedSender<ResponseEnvelope>,
) {
    let mut line: Vec<u8> = Vec::with_capacity(MAX_MESSAGE_SIZE);
    let mut discarding = false;

    loop {
        match read_line_bounded(&mut input, &mut line, MAX_MESSAGE_SIZE).await {
            Ok(0) => {
                info!("Input closed, shutting down");
                let _ = commands.send(CommandEnvelope::new(UNSOLICITED_SEQ, Command::Quit));
                break;
            }
            Ok(n) => {
                if discarding {
                    // Tail of an oversized line.
                    discarding = !line.ends_with(b"\n");
                    continue;
                }
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                trace!("Read {} byte command", n);
                match decode_line::<CommandEnvelope>(&line) {
                    Ok(envelope) => {
                        if commands.send(envelope).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Undecodable command: {}", e);
                        let reply = ResponseEnvelope::unsolicited(Response::error(format!(
                            "Invalid command: {}",
                            e
                        )));
                        if responses.send(reply).is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                if !discarding {
                    warn!("Command exceeds {} bytes, discarding", MAX_MESSAGE_SIZE);
                    let reply = ResponseEnvelope::unsolicited(Response::error("Message too large"));
                    if responses.send(reply).is_err() {
                        break;
                    }
                }
                discarding = true;
            }
            Err(e) => {
                error!("Read error on input: {}", e);
                let _ = commands.send(CommandEnvelope::new(UNSOLICITED_SEQ, Command::Quit));
                break;
            }
        }
    }
}

async fn write_frames<W: AsyncWrite + Unpin>(
    mut output: W,
    mut responses: mpsc::UnboundedReceiver<ResponseEnvelope>,
    mut events: mpsc::UnboundedReceiver<EventEnvelope>,
) -> Result<()> {
    let mut responses_open = true;
    let mut events_open = true;

    while responses_open || events_open {
        let frame = tokio::select! {
            biased;
            response = responses.recv(), if responses_open => match response {
                Some(response) => WorkerFrame::Response(response),
                None => {
                    responses_open = false;
                    continue;
                }
            },
            event = events.recv(), if events_open => match event {
                Some(event) => WorkerFrame::Event(event),
                None => {
                    events_open = false;
                    continue;
                }
            },
        };

        let line = match encode_line(&frame) {
            Ok(line) => line,
            Err(e) => {
                warn!("Dropping frame that cannot be encoded: {}", e);
                continue;
            }
        };
        output.write_all(&line).await?;
        output.flush().await?;
    }

    debug!("Output streams closed");
    Ok(())
}
