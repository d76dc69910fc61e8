//! # Media Stream WebSocket
//!
//! Actix actor for `/outbound-media-stream`, the socket Twilio opens once the
//! `<Connect><Stream>` TwiML runs.
//!
//! ## Division of Labour:
//! The actor only owns the socket. Every inbound text frame is forwarded, in
//! order, to a [`SessionOrchestrator`] task over an unbounded channel. Audio
//! and control messages travel the other way over a second channel the
//! actor consumes as a stream, so the engine's driver thread never touches
//! the socket directly.
//!
//! ## Shutdown:
//! - `stop` event or fatal error: the orchestrator cleans up and sends
//!   `Hangup`, the actor closes the socket
//! - Twilio closes the socket: the actor forwards `Closed`, the orchestrator
//!   cleans up
//! - Either way the outbound channel closes when the orchestrator drops the
//!   bridge, which also stops the actor

use crate::session::{InboundFrame, SessionContext, SessionOrchestrator};
use crate::state::AppState;
use crate::telephony::{OutboundFrame, TelephonyBridge};
use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, error, info, warn};

/// How often to check for a silent connection.
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(15);

/// Twilio sends a media frame every 20 ms while a call is up, so a minute of
/// silence means the other side is gone.
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

pub struct MediaStreamSocket {
    app_state: web::Data<AppState>,

    /// Forwards inbound frames to the orchestrator
    inbound: mpsc::UnboundedSender<InboundFrame>,

    /// Handed off in `started`
    pending: Option<(SessionOrchestrator, mpsc::UnboundedReceiver<InboundFrame>, mpsc::UnboundedReceiver<OutboundFrame>)>,

    last_activity: Instant,
}

impl MediaStreamSocket {
    pub fn new(app_state: web::Data<AppState>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let bridge = Arc::new(TelephonyBridge::new(outbound_tx, &app_state.config.logging));
        let orchestrator = SessionOrchestrator::new(SessionContext::from_state(&app_state), bridge);

        Self {
            app_state,
            inbound: inbound_tx,
            pending: Some((orchestrator, inbound_rx, outbound_rx)),
            last_activity: Instant::now(),
        }
    }

    fn forward(&self, frame: InboundFrame) {
        if self.inbound.send(frame).is_err() {
            debug!("Session already finished, inbound frame discarded");
        }
    }
}

fn is_idle(last_activity: Instant, now: Instant) -> bool {
    now.duration_since(last_activity) > IDLE_TIMEOUT
}

impl Actor for MediaStreamSocket {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Media stream connection opened");
        self.app_state.increment_active_sessions();

        if let Some((orchestrator, inbound_rx, outbound_rx)) = self.pending.take() {
            ctx.add_stream(UnboundedReceiverStream::new(outbound_rx));
            actix_web::rt::spawn(async move {
                let summary = orchestrator.run(inbound_rx).await;
                debug!(call_sid = ?summary.call_sid, attempt = ?summary.attempt, "Session task finished");
            });
        }

        ctx.run_interval(IDLE_CHECK_INTERVAL, |act, ctx| {
            if is_idle(act.last_activity, Instant::now()) {
                warn!("Media stream idle, closing connection");
                act.forward(InboundFrame::Closed);
                ctx.stop();
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        self.forward(InboundFrame::Closed);
        self.app_state.decrement_active_sessions();
        info!("Media stream connection closed");
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for MediaStreamSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        self.last_activity = Instant::now();

        match msg {
            Ok(ws::Message::Text(text)) => {
                self.forward(InboundFrame::Text(text.to_string()));
            }
            Ok(ws::Message::Binary(data)) => {
                warn!(bytes = data.len(), "Unexpected binary frame on media stream");
            }
            Ok(ws::Message::Ping(data)) => {
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {}
            Ok(ws::Message::Close(reason)) => {
                info!(reason = ?reason, "Media stream closed by peer");
                self.forward(InboundFrame::Closed);
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("Received unexpected continuation frame");
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!(error = %err, "Media stream protocol error");
                self.forward(InboundFrame::Closed);
                ctx.stop();
            }
        }
    }
}

impl StreamHandler<OutboundFrame> for MediaStreamSocket {
    fn handle(&mut self, frame: OutboundFrame, ctx: &mut Self::Context) {
        match frame {
            OutboundFrame::Text(text) => ctx.text(text),
            OutboundFrame::Hangup => {
                debug!("Closing media stream on request");
                ctx.close(Some(ws::CloseReason::from(ws::CloseCode::Normal)));
                ctx.stop();
            }
        }
    }

    fn finished(&mut self, ctx: &mut Self::Context) {
        debug!("Session released the stream");
        ctx.stop();
    }
}

pub async fn media_stream(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    info!(peer = ?req.connection_info().peer_addr(), "Media stream connection request");
    ws::start(MediaStreamSocket::new(app_state), &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_detection() {
        let start = Instant::now();
        assert!(!is_idle(start, start + Duration::from_secs(59)));
        assert!(is_idle(start, start + Duration::from_secs(61)));
    }
}
