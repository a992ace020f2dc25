//! # Repeater Host
//!
//! Runs a [`CaptureSession`] behind a newline-delimited JSON protocol: the
//! host networking layer and the UI write [`protocol::Envelope`] lines, the
//! session answers each one and pushes notifications as they happen.

pub mod config;
pub mod protocol;

use crate::config::Config;
use crate::protocol::{HostReply, OutputLine, dispatch, parse_line};
use repeater_capture::{
    CaptureEnvironment, CaptureSession, DeliveryError, FileSettings, Notification,
    NotificationBus, Observer, ReqwestTransport, TransportConfig, TransportError,
};
use repeater_core::environment::SystemClock;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// Build the production environment and start a session.
///
/// # Errors
///
/// Returns [`TransportError`] if the HTTP client cannot be built.
pub async fn start_session(config: &Config) -> Result<CaptureSession, TransportError> {
    let transport = ReqwestTransport::new(&TransportConfig {
        timeout: config.request_timeout(),
        user_agent: config.user_agent.clone(),
    })?;

    let environment = CaptureEnvironment::new(
        Arc::new(SystemClock),
        Arc::new(transport),
        Arc::new(FileSettings::new(config.settings_path.clone())),
        NotificationBus::new(),
    );

    Ok(CaptureSession::start(environment).await)
}

/// Forwards session notifications into the output queue.
///
/// Replies share the same queue, so every line is written in the order it
/// was produced: a notification published while an input line is handled
/// precedes that line's reply and follows every earlier reply.
struct LineObserver {
    lines: mpsc::UnboundedSender<OutputLine>,
}

impl Observer for LineObserver {
    fn deliver(&self, notification: &Notification) -> Result<(), DeliveryError> {
        self.lines
            .send(OutputLine::Notification(notification.clone()))
            .map_err(|_| DeliveryError::Disconnected)
    }
}

/// Serve the protocol until `input` reaches end of file, then shut the
/// session down.
///
/// Replies are written in input order. Notifications are interleaved at the
/// point the session published them. Malformed lines get an `error` reply
/// and do not stop the loop. At end of input, in-flight replays get up to
/// `drain` to finish so their outcome notifications are still written.
///
/// # Errors
///
/// Returns an I/O error if reading `input` or writing `output` fails.
pub async fn serve<R, W>(
    session: &CaptureSession,
    input: R,
    output: W,
    drain: Duration,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (lines_tx, lines_rx) = mpsc::unbounded_channel();
    let observer_id = session.subscribe(Arc::new(LineObserver {
        lines: lines_tx.clone(),
    }));
    let writer = tokio::spawn(write_lines(output, lines_rx));

    let mut lines = input.lines();
    let read_result = loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break Ok(()),
            Err(error) => break Err(error),
        };
        if line.trim().is_empty() {
            continue;
        }

        let reply = match parse_line(&line) {
            Ok(envelope) => OutputLine::Reply {
                seq: envelope.seq,
                reply: dispatch(session, envelope.message).await,
            },
            Err(error) => {
                tracing::warn!(error = %error, "Rejected input line");
                OutputLine::Reply {
                    seq: None,
                    reply: HostReply::Error {
                        message: error.to_string(),
                    },
                }
            },
        };

        if lines_tx.send(reply).is_err() {
            break Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "output writer stopped",
            ));
        }
    };

    if let Err(error) = session.shutdown(drain).await {
        tracing::warn!(error = %error, "Replays still running at shutdown");
    }
    session.unsubscribe(observer_id);
    drop(lines_tx);

    let write_result = writer
        .await
        .map_err(|error| std::io::Error::other(error.to_string()))?;
    read_result.and(write_result)
}

async fn write_lines<W>(
    mut output: W,
    mut lines: mpsc::UnboundedReceiver<OutputLine>,
) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = lines.recv().await {
        let text = line.to_line().map_err(|error| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, error.to_string())
        })?;
        output.write_all(text.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    output.flush().await
}
