//! Session task: connect/reconnect, receive routing, send path and the
//! interrogation scheduler.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;
use chrono::Local;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::{Encoder, Framed};
use tracing::{debug, error, info, warn};

use super::{
    FlowControl, LinkState, SendQueue, SessionCommand, SessionConfig, Timer, TimerBank,
};
use crate::codec::{Frame, Iec104Codec};
use crate::dispatch::{classify, Dispatcher};
use crate::error::{DatacollError, Result};
use crate::store::{keys, Store, TermItem};
use crate::types::{Apci, Asdu, Cause, Cp56Time2a, Ioa, Typ, UFrame};

enum Event {
    Wire(Option<Result<Frame>>),
    Command(Option<SessionCommand>),
    Deadline,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{:02x}", byte);
    }
    out
}

pub(crate) struct Session {
    cfg: SessionConfig,
    store: Arc<dyn Store>,
    dispatcher: Dispatcher,
    cmd_rx: mpsc::Receiver<SessionCommand>,
    flow: FlowControl,
    timers: TimerBank,
    queue: SendQueue,
    link: LinkState,
    user_canceled: bool,
    connect_retry_count: u32,
    last_cycle_begin: Option<Instant>,
    last_cycle_end: Option<Instant>,
    poll_deadline: Option<Instant>,
    framed: Option<Framed<TcpStream, Iec104Codec>>,
}

impl Session {
    pub(crate) fn new(
        cfg: SessionConfig,
        store: Arc<dyn Store>,
        cmd_rx: mpsc::Receiver<SessionCommand>,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            store.clone(),
            cfg.device_id.clone(),
            cfg.protocol.clone(),
        );
        let timers = TimerBank::new(cfg.t0, cfg.t1, cfg.t2, cfg.t3);
        let flow = FlowControl::new(cfg.k, cfg.w);
        let queue = SendQueue::new(cfg.queue_cap);
        Self {
            cfg,
            store,
            dispatcher,
            cmd_rx,
            flow,
            timers,
            queue,
            link: LinkState::Disconnected,
            user_canceled: false,
            connect_retry_count: 0,
            last_cycle_begin: None,
            last_cycle_end: None,
            poll_deadline: None,
            framed: None,
        }
    }

    pub(crate) async fn run(mut self) {
        info!(device_id = %self.cfg.device_id, "session starting");
        loop {
            if self.user_canceled {
                break;
            }
            self.link = LinkState::Connecting;
            self.connect_retry_count += 1;
            match self.connect_and_run().await {
                Ok(()) => break,
                Err(err) => {
                    if self.user_canceled {
                        break;
                    }
                    warn!(
                        device_id = %self.cfg.device_id,
                        retry = self.connect_retry_count,
                        %err,
                        "session error, scheduling reconnect"
                    );
                    if !self.wait_before_reconnect().await {
                        break;
                    }
                }
            }
        }
        self.set_online(false).await;
        info!(device_id = %self.cfg.device_id, "session ended");
    }

    /// Sleep out the reconnect delay, still honoring Stop. Returns false
    /// when the session must end instead of retrying.
    async fn wait_before_reconnect(&mut self) -> bool {
        let deadline = Instant::now() + self.cfg.reconnect_delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => return true,
                cmd = self.cmd_rx.recv() => match cmd {
                    None | Some(SessionCommand::Stop) => {
                        self.user_canceled = true;
                        return false;
                    }
                    Some(_) => {
                        debug!(device_id = %self.cfg.device_id, "device offline, dropping user command");
                    }
                },
            }
        }
    }

    async fn connect_and_run(&mut self) -> Result<()> {
        self.flow.reset();
        self.queue.clear();
        self.timers.stop_all();
        self.poll_deadline = None;

        debug!(device_id = %self.cfg.device_id, address = %self.cfg.address, "connecting");
        let stream = tokio::time::timeout(self.cfg.t0, TcpStream::connect(&self.cfg.address))
            .await
            .map_err(|_| DatacollError::ConnectionTimeout)??;
        stream.set_nodelay(true).ok();
        self.framed = Some(Framed::new(stream, Iec104Codec::new()));
        self.set_online(true).await;
        info!(device_id = %self.cfg.device_id, address = %self.cfg.address, "connected");

        let result = async {
            self.send_frame(Frame::u(UFrame::StartDtAct), true).await?;
            self.event_loop().await
        }
        .await;

        self.timers.stop_all();
        self.poll_deadline = None;
        self.framed = None;
        self.queue.clear();
        self.flow.reset();
        self.link = LinkState::Disconnected;
        self.set_online(false).await;
        result
    }

    async fn event_loop(&mut self) -> Result<()> {
        loop {
            if self.user_canceled {
                return Ok(());
            }

            let deadline = match (self.timers.next_deadline(), self.poll_deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };

            let event = {
                let Session { framed, cmd_rx, .. } = &mut *self;
                let framed = framed.as_mut().ok_or(DatacollError::NotConnected)?;
                tokio::select! {
                    maybe = framed.next() => Event::Wire(maybe),
                    cmd = cmd_rx.recv() => Event::Command(cmd),
                    _ = sleep_until_opt(deadline) => Event::Deadline,
                }
            };

            match event {
                Event::Wire(Some(Ok(frame))) => self.handle_frame(frame).await?,
                Event::Wire(Some(Err(err))) => {
                    if err.is_session_fatal() {
                        return Err(err);
                    }
                    // framing was consistent, only the body is bad
                    warn!(device_id = %self.cfg.device_id, %err, "dropping malformed frame");
                }
                Event::Wire(None) => {
                    return Err(DatacollError::Connection("closed by peer".into()));
                }
                Event::Command(None) => {
                    self.user_canceled = true;
                    return Ok(());
                }
                Event::Command(Some(SessionCommand::Stop)) => {
                    self.user_canceled = true;
                    self.link = LinkState::Stopping;
                    let _ = self.send_frame(Frame::u(UFrame::StopDtAct), false).await;
                    return Ok(());
                }
                Event::Command(Some(SessionCommand::Call { binding })) => {
                    if let Err(err) = self.handle_call(binding).await {
                        if err.is_session_fatal() {
                            return Err(err);
                        }
                        warn!(device_id = %self.cfg.device_id, %err, "call request failed");
                    }
                }
                Event::Command(Some(SessionCommand::Ctrl { binding, value })) => {
                    if let Err(err) = self.handle_ctrl(binding, value).await {
                        if err.is_session_fatal() {
                            return Err(err);
                        }
                        warn!(device_id = %self.cfg.device_id, %err, "ctrl request failed");
                    }
                }
                Event::Deadline => self.handle_deadline().await?,
            }
        }
    }

    // ---- receive path ----

    async fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        self.timers.start(Timer::T3);
        debug!(device_id = %self.cfg.device_id, "recv {}", frame);
        self.log_frame(&frame, "rx").await;

        match frame.apci {
            Apci::U(action) => self.handle_u(action).await,
            Apci::S { rsn } => {
                self.flow.acknowledge(rsn)?;
                self.timers.stop(Timer::T1);
                self.pump_queue().await
            }
            Apci::I {
                ssn: peer_ssn,
                rsn: peer_rsn,
            } => {
                self.flow.acknowledge(peer_rsn)?;
                self.flow.accept_peer_ssn(peer_ssn)?;
                self.timers.start(Timer::T2);
                if self.flow.w_reached() {
                    self.send_frame(Frame::s(), true).await?;
                }
                let asdu = frame
                    .asdu
                    .clone()
                    .ok_or(DatacollError::invalid_frame_static("I-frame without ASDU"))?;
                self.handle_i(frame, asdu).await
            }
        }
    }

    async fn handle_u(&mut self, action: UFrame) -> Result<()> {
        debug!(device_id = %self.cfg.device_id, "got U-frame {:?}", action);
        match action {
            UFrame::StartDtAct => {
                if self.queue.head_is_u(UFrame::StartDtAct) {
                    info!(device_id = %self.cfg.device_id, "peer sent STARTDT act too, dropping ours");
                    self.queue.pop();
                    self.timers.stop(Timer::T1);
                }
                self.send_frame(Frame::u(UFrame::StartDtCon), false).await?;
                self.enter_started().await?;
                self.pump_queue().await
            }
            UFrame::StartDtCon => {
                self.confirm_u(UFrame::StartDtCon);
                self.enter_started().await?;
                self.pump_queue().await
            }
            UFrame::TestFrAct => {
                if self.queue.head_is_u(UFrame::TestFrAct) {
                    info!(device_id = %self.cfg.device_id, "peer sent TESTFR act too, dropping ours");
                    self.queue.pop();
                    self.timers.stop(Timer::T1);
                }
                self.send_frame(Frame::u(UFrame::TestFrCon), false).await
            }
            UFrame::TestFrCon => {
                self.confirm_u(UFrame::TestFrCon);
                self.pump_queue().await
            }
            UFrame::StopDtAct => {
                self.link = LinkState::Stopping;
                self.send_frame(Frame::u(UFrame::StopDtCon), false).await?;
                info!(device_id = %self.cfg.device_id, "received STOPDT act, closing");
                self.user_canceled = true;
                Ok(())
            }
            UFrame::StopDtCon => {
                self.timers.stop(Timer::T1);
                info!(device_id = %self.cfg.device_id, "received STOPDT con, closing");
                self.user_canceled = true;
                Ok(())
            }
        }
    }

    fn confirm_u(&mut self, con: UFrame) {
        if self.queue.confirms_head(&Frame::u(con)) {
            self.queue.pop();
            self.timers.stop(Timer::T1);
        }
    }

    async fn handle_i(&mut self, frame: Frame, asdu: Asdu) -> Result<()> {
        debug!(
            device_id = %self.cfg.device_id,
            "got I-frame typ={} cause={} count={}",
            asdu.header.typ,
            asdu.header.cause,
            asdu.header.vsq.count
        );

        let cause = asdu.header.cause;
        if matches!(cause, Cause::ActCon | Cause::Req) {
            self.timers.stop(Timer::T1);
            if self.queue.confirms_head(&frame) {
                if let Some(confirmed) = self.queue.pop() {
                    debug!(
                        device_id = %self.cfg.device_id,
                        "confirmed outstanding {}", confirmed.frame
                    );
                }
                self.pump_queue().await?;
            }
        }

        if let Some(kind) = classify(&asdu) {
            let now = Local::now().naive_local();
            if let Err(err) = self.dispatcher.dispatch(&asdu, kind, now).await {
                if err.is_session_fatal() {
                    return Err(err);
                }
                warn!(device_id = %self.cfg.device_id, %err, "dispatch failed");
            }
            return Ok(());
        }

        match cause {
            Cause::ActCon => {
                // select phase acknowledged, launch the execute phase
                if asdu.header.typ.is_process_command() && asdu.select_flag() == Some(true) {
                    if let Some(execute) = asdu.to_execute() {
                        info!(
                            device_id = %self.cfg.device_id,
                            "select confirmed for {}, sending execute", asdu.header.typ
                        );
                        self.send_frame(Frame::i(execute), true).await?;
                    }
                }
            }
            Cause::ActTerm => {
                if asdu.header.typ == Typ::C_CI_NA_1 {
                    let now = Instant::now();
                    if let Some(begin) = self.last_cycle_begin {
                        debug!(
                            device_id = %self.cfg.device_id,
                            elapsed = ?now.duration_since(begin),
                            "interrogation cycle complete"
                        );
                    }
                    self.last_cycle_end = Some(now);
                }
            }
            Cause::Act => {
                error!(device_id = %self.cfg.device_id, "peer sent act frame, ignoring");
            }
            _ => {
                debug!(
                    device_id = %self.cfg.device_id,
                    "unrouted I-frame typ={} cause={}", asdu.header.typ, cause
                );
            }
        }
        Ok(())
    }

    async fn enter_started(&mut self) -> Result<()> {
        if self.link != LinkState::Started {
            info!(device_id = %self.cfg.device_id, "data transfer started");
            self.link = LinkState::Started;
            self.connect_retry_count = 0;
        }
        self.run_poll_cycle().await
    }

    // ---- timers and scheduler ----

    async fn handle_deadline(&mut self) -> Result<()> {
        let now = Instant::now();
        if let Some(timer) = self.timers.pop_expired(now) {
            match timer {
                Timer::T1 => {
                    warn!(device_id = %self.cfg.device_id, "T1 expired without confirmation");
                    return Err(DatacollError::AckTimeout);
                }
                Timer::T2 => {
                    debug!(device_id = %self.cfg.device_id, "T2 expired, sending S-frame");
                    self.send_frame(Frame::s(), true).await?;
                }
                Timer::T3 => {
                    debug!(device_id = %self.cfg.device_id, "T3 expired, sending test frame");
                    self.send_frame(Frame::u(UFrame::TestFrAct), true).await?;
                }
                Timer::T0 => {}
            }
            return Ok(());
        }

        if let Some(poll) = self.poll_deadline {
            if poll <= now {
                self.run_poll_cycle().await?;
            }
        }
        Ok(())
    }

    /// Interrogation scheduler: clock sync + general interrogation +
    /// counter interrogation once per `coll_interval`, measured from the
    /// end of the previous cycle (`actterm` for `C_CI_NA_1`).
    async fn run_poll_cycle(&mut self) -> Result<()> {
        let now = Instant::now();
        let end = *self.last_cycle_end.get_or_insert(now);
        if end + self.cfg.coll_interval <= now {
            info!(device_id = %self.cfg.device_id, "starting interrogation cycle");
            self.last_cycle_begin = Some(now);
            let ca = self.cfg.common_address;
            let clock = Asdu::clock_sync(ca, Cp56Time2a::from_naive(Local::now().naive_local()));
            self.send_frame(Frame::i(clock), true).await?;
            self.send_frame(Frame::i(Asdu::interrogation_command(ca)), true)
                .await?;
            self.send_frame(Frame::i(Asdu::counter_interrogation(ca)), true)
                .await?;
            self.poll_deadline = Some(now + self.cfg.coll_interval);
        } else {
            self.poll_deadline = Some(end + self.cfg.coll_interval);
        }
        Ok(())
    }

    // ---- user requests ----

    async fn handle_call(&mut self, binding: TermItem) -> Result<()> {
        let asdu = Asdu::read_command(self.cfg.common_address, Ioa::new(binding.protocol_code));
        self.send_frame(Frame::i(asdu), true).await
    }

    async fn handle_ctrl(&mut self, binding: TermItem, value: f64) -> Result<()> {
        let code_type = binding
            .code_type
            .ok_or(DatacollError::Config("binding has no code_type".into()))?;
        let asdu = Asdu::control_command(
            Typ(code_type),
            self.cfg.common_address,
            Ioa::new(binding.protocol_code),
            value,
            true,
        )?;
        self.send_frame(Frame::i(asdu), true).await
    }

    // ---- send path ----

    /// Queue-gated send. With `check` set, act frames join the
    /// outstanding-command queue and only the queue head may transmit;
    /// `check = false` bypasses the gate (confirmations, head delivery).
    async fn send_frame(&mut self, frame: Frame, check: bool) -> Result<()> {
        match frame.apci {
            Apci::S { .. } => self.send_s().await,
            Apci::U(action) => {
                let mut sent = false;
                if !check || self.queue.is_empty() {
                    self.transmit_u(action).await?;
                    sent = true;
                }
                if check && action.is_act() {
                    self.queue.push(frame, sent)?;
                }
                Ok(())
            }
            Apci::I { .. } => {
                let asdu = frame
                    .asdu
                    .clone()
                    .ok_or(DatacollError::invalid_frame_static("I-frame without ASDU"))?;
                let is_act = asdu.header.cause == Cause::Act;
                let mut sent = false;
                if !check || !is_act || self.queue.is_empty() {
                    if self.flow.at_k_limit() && !self.cfg.continue_at_k_limit && check && is_act {
                        warn!(
                            device_id = %self.cfg.device_id,
                            k = self.flow.k(),
                            "send window exhausted, deferring command"
                        );
                    } else {
                        if self.flow.at_k_limit() {
                            warn!(
                                device_id = %self.cfg.device_id,
                                k = self.flow.k(),
                                "send window exhausted, sending anyway"
                            );
                        }
                        self.transmit_i(&asdu).await?;
                        sent = true;
                    }
                }
                if check && is_act {
                    self.queue.push(frame, sent)?;
                }
                Ok(())
            }
        }
    }

    /// Deliver the queue head if it has not hit the wire yet.
    async fn pump_queue(&mut self) -> Result<()> {
        let Some(head) = self.queue.head() else {
            return Ok(());
        };
        if head.sent {
            return Ok(());
        }
        let frame = head.frame.clone();
        match frame.apci {
            Apci::I { .. } => {
                if self.flow.at_k_limit() && !self.cfg.continue_at_k_limit {
                    warn!(
                        device_id = %self.cfg.device_id,
                        k = self.flow.k(),
                        "send window exhausted, head stays queued"
                    );
                    return Ok(());
                }
                let asdu = frame
                    .asdu
                    .ok_or(DatacollError::invalid_frame_static("I-frame without ASDU"))?;
                self.transmit_i(&asdu).await?;
            }
            Apci::U(action) => self.transmit_u(action).await?,
            Apci::S { .. } => {}
        }
        self.queue.mark_head_sent();
        Ok(())
    }

    async fn transmit_i(&mut self, asdu: &Asdu) -> Result<()> {
        self.timers.stop(Timer::T2);
        let frame = Frame {
            apci: Apci::I {
                ssn: self.flow.ssn(),
                rsn: self.flow.rsn(),
            },
            asdu: Some(asdu.clone()),
        };
        self.write_wire(frame).await?;
        self.flow.on_i_sent();
        if asdu.header.cause == Cause::Act {
            self.timers.start(Timer::T1);
        }
        Ok(())
    }

    async fn transmit_u(&mut self, action: UFrame) -> Result<()> {
        self.write_wire(Frame::u(action)).await?;
        if action.is_act() {
            self.timers.start(Timer::T1);
        }
        Ok(())
    }

    async fn send_s(&mut self) -> Result<()> {
        self.timers.stop(Timer::T2);
        let frame = Frame {
            apci: Apci::S {
                rsn: self.flow.rsn(),
            },
            asdu: None,
        };
        self.write_wire(frame).await?;
        self.flow.on_s_sent();
        Ok(())
    }

    async fn write_wire(&mut self, frame: Frame) -> Result<()> {
        let framed = self.framed.as_mut().ok_or(DatacollError::NotConnected)?;
        framed.send(frame.clone()).await?;
        debug!(device_id = %self.cfg.device_id, "send {}", frame);
        self.log_frame(&frame, "tx").await;
        Ok(())
    }

    // ---- store mirrors ----

    async fn log_frame(&self, frame: &Frame, dir: &str) {
        let mut buf = BytesMut::new();
        if Iec104Codec::new().encode(frame.clone(), &mut buf).is_err() {
            return;
        }
        let entry = serde_json::json!({
            "dir": dir,
            "time": Local::now().naive_local().format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
            "frame": to_hex(&buf),
        });
        if let Err(err) = self
            .store
            .rpush_bounded(
                &keys::frame_list(&self.cfg.device_id),
                &entry.to_string(),
                self.cfg.frame_log_cap,
            )
            .await
        {
            warn!(device_id = %self.cfg.device_id, %err, "frame log append failed");
        }
    }

    async fn set_online(&self, online: bool) {
        let status = if online { "online" } else { "offline" };
        let fields = HashMap::from([("status".to_string(), status.to_string())]);
        if let Err(err) = self
            .store
            .hset_all(&keys::device(&self.cfg.device_id), &fields)
            .await
        {
            warn!(device_id = %self.cfg.device_id, %err, "status update failed");
        }
    }
}
