//! The frame-synchronised logical clock.
//!
//! Observers share a rotating schedule of logical time windows (frames),
//! one per roster slot. On startup the timer asks its peers for their
//! current frame, reduces the responses by majority vote, then free-runs:
//! every elapsed interval advances the frame index by one modulo
//! `OBSERVERS_MAX_COUNT` and emits an immutable frame-end event.

use crate::reporter::Reporter;
use std::mem;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Duration, Instant};
use vigil_model::settings::SYNC_EXCHANGE_MARGIN;
use vigil_model::settings::SYNCHRONISATION_TIMEOUT;
use vigil_model::{Error, ObserverIndex, ObserversConfiguration, Result, Settings, OBSERVERS_MAX_COUNT};
use vigil_proto::{Inbound, RequestTimeFrames, ResponseTimeFrame};

/// Control events on the timer's internal bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerEvent {
    /// Synchronisation finished; the ticker may start.
    TickerStarted,
    /// The reporter published a new roster; re-sync against it.
    ConfigurationChanged,
}

/// The logical frame position, before and after the first sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameIndex {
    Unknown,
    Known(u16),
}

impl FrameIndex {
    /// The index the next frame end carries. `Unknown` starts the cycle.
    pub fn next(self) -> u16 {
        match self {
            FrameIndex::Unknown => 0,
            FrameIndex::Known(index) => {
                let next = index.wrapping_add(1);
                if next >= OBSERVERS_MAX_COUNT {
                    0
                } else {
                    next
                }
            }
        }
    }

    /// The index reported to peers; pre-sync maps to 0.
    pub fn reported(self) -> u16 {
        match self {
            FrameIndex::Unknown => 0,
            FrameIndex::Known(index) => index,
        }
    }
}

/// One elapsed frame. Immutable once emitted: advancing the clock creates
/// a new event, so subscribers holding a reference observe a stable
/// snapshot.
#[derive(Debug, Clone)]
pub struct FrameEvent {
    pub index: u16,
    pub configuration: Arc<ObserversConfiguration>,
}

/// The channel ends handed to the rest of the node.
pub struct TimerChannels {
    /// Frame-end events. Capacity one and sent non-blocking: a dropped
    /// tick is better than back-to-back duplicates, which downstream
    /// would read as misbehaviour.
    pub frame_events: mpsc::Receiver<Arc<FrameEvent>>,
    /// Sync requests this timer wants broadcast.
    pub outgoing_requests: mpsc::Receiver<RequestTimeFrames>,
    /// Replies to peers' sync requests, addressed to the requester.
    pub outgoing_responses: mpsc::Receiver<(ObserverIndex, ResponseTimeFrame)>,
    /// Peers' sync requests, fed by dispatch.
    pub incoming_requests: mpsc::Sender<Inbound<RequestTimeFrames>>,
    /// Peers' sync responses, fed by dispatch.
    pub incoming_responses: mpsc::Sender<ResponseTimeFrame>,
    /// The internal bus; the node injects `ConfigurationChanged` here.
    pub bus: mpsc::Sender<TimerEvent>,
}

enum Step {
    Tick,
    Request(Inbound<RequestTimeFrames>),
    Response(ResponseTimeFrame),
    SyncDeadline,
    Event(TimerEvent),
    /// A stale sync response drained outside a sync window; nothing to do.
    Noop,
    InputsClosed,
}

pub struct Timer {
    interval: Duration,
    reporter: Arc<dyn Reporter>,

    frame_index: FrameIndex,
    configuration: Arc<ObserversConfiguration>,
    next_frame_at: Instant,
    sync_deadline: Option<Instant>,
    sync_in_progress: bool,
    is_ticker_running: bool,
    collected: Vec<ResponseTimeFrame>,

    frame_events_tx: mpsc::Sender<Arc<FrameEvent>>,
    outgoing_requests_tx: mpsc::Sender<RequestTimeFrames>,
    outgoing_responses_tx: mpsc::Sender<(ObserverIndex, ResponseTimeFrame)>,
    incoming_requests_rx: mpsc::Receiver<Inbound<RequestTimeFrames>>,
    incoming_responses_rx: mpsc::Receiver<ResponseTimeFrame>,
    bus_tx: mpsc::Sender<TimerEvent>,
    bus_rx: mpsc::Receiver<TimerEvent>,
}

impl Timer {
    pub fn new(settings: &Settings, reporter: Arc<dyn Reporter>) -> (Self, TimerChannels) {
        let (frame_events_tx, frame_events) = mpsc::channel(1);
        let (outgoing_requests_tx, outgoing_requests) = mpsc::channel(1);
        let (outgoing_responses_tx, outgoing_responses) = mpsc::channel(1);
        let (incoming_requests_tx, incoming_requests_rx) = mpsc::channel(1);
        // Synchronisation may collect up to a full roster of responses.
        let (incoming_responses_tx, incoming_responses_rx) =
            mpsc::channel(OBSERVERS_MAX_COUNT as usize);
        let (bus_tx, bus_rx) = mpsc::channel(1);

        let configuration = reporter.current_configuration();
        let timer = Self {
            interval: settings.average_block_generation_interval,
            reporter,
            frame_index: FrameIndex::Unknown,
            configuration,
            next_frame_at: Instant::now(),
            sync_deadline: None,
            sync_in_progress: false,
            is_ticker_running: false,
            collected: Vec::new(),
            frame_events_tx,
            outgoing_requests_tx,
            outgoing_responses_tx,
            incoming_requests_rx,
            incoming_responses_rx,
            bus_tx: bus_tx.clone(),
            bus_rx,
        };

        let channels = TimerChannels {
            frame_events,
            outgoing_requests,
            outgoing_responses,
            incoming_requests: incoming_requests_tx,
            incoming_responses: incoming_responses_tx,
            bus: bus_tx,
        };

        (timer, channels)
    }

    /// Runs until every input channel is gone.
    pub async fn run(mut self) -> Result<()> {
        // The whole sync exchange must fit inside one block interval with
        // margin to spare; anything else cannot converge.
        let available = self.interval.saturating_sub(SYNC_EXCHANGE_MARGIN);
        if SYNCHRONISATION_TIMEOUT >= available {
            return Err(Error::InvalidSynchronisationTimeout);
        }

        self.start_sync();

        loop {
            let step = if self.is_ticker_running {
                self.full_loop().await
            } else {
                self.short_loop().await
            };

            match step {
                Step::Tick => self.process_tick(),
                Step::Request(request) => self.process_time_frame_request(request),
                Step::Response(response) => {
                    self.collected.push(response);
                    if self.collected.len() >= OBSERVERS_MAX_COUNT as usize {
                        self.finish_sync();
                    }
                }
                Step::SyncDeadline => self.finish_sync(),
                Step::Event(event) => self.process_internal_event(event),
                Step::Noop => {}
                Step::InputsClosed => return Ok(()),
            }
        }
    }

    /// Select loop before the ticker runs: serve requests, collect sync
    /// responses, watch the deadline.
    async fn short_loop(&mut self) -> Step {
        if self.sync_in_progress {
            let deadline = self.sync_deadline.expect("deadline set while syncing");
            tokio::select! {
                _ = sleep_until(deadline) => Step::SyncDeadline,
                response = self.incoming_responses_rx.recv() => match response {
                    Some(response) => Step::Response(response),
                    None => Step::InputsClosed,
                },
                request = self.incoming_requests_rx.recv() => match request {
                    Some(request) => Step::Request(request),
                    None => Step::InputsClosed,
                },
                event = self.bus_rx.recv() => match event {
                    Some(event) => Step::Event(event),
                    None => Step::InputsClosed,
                },
            }
        } else {
            tokio::select! {
                request = self.incoming_requests_rx.recv() => match request {
                    Some(request) => Step::Request(request),
                    None => Step::InputsClosed,
                },
                event = self.bus_rx.recv() => match event {
                    Some(event) => Step::Event(event),
                    None => Step::InputsClosed,
                },
            }
        }
    }

    /// Select loop while the ticker runs. Stray sync responses are drained
    /// so a later re-sync starts from a clean channel.
    async fn full_loop(&mut self) -> Step {
        let deadline = self.next_frame_deadline();
        tokio::select! {
            _ = sleep_until(deadline) => Step::Tick,
            request = self.incoming_requests_rx.recv() => match request {
                Some(request) => Step::Request(request),
                None => Step::InputsClosed,
            },
            response = self.incoming_responses_rx.recv() => match response {
                Some(_) => Step::Noop,
                None => Step::InputsClosed,
            },
            event = self.bus_rx.recv() => match event {
                Some(event) => Step::Event(event),
                None => Step::InputsClosed,
            },
        }
    }

    fn start_sync(&mut self) {
        self.sync_deadline = Some(Instant::now() + SYNCHRONISATION_TIMEOUT);
        self.sync_in_progress = true;
        self.collected.clear();

        if self.outgoing_requests_tx.try_send(RequestTimeFrames).is_err() {
            tracing::warn!("sync request dropped: outgoing channel unavailable");
        }
        tracing::info!("time frame synchronisation started");
    }

    fn finish_sync(&mut self) {
        self.sync_in_progress = false;
        let collected = mem::take(&mut self.collected);
        let now = Instant::now();

        match majority_of_frame_responses(&collected, self.interval, now) {
            Ok(reduced) => {
                tracing::debug!(
                    responses = reduced.responses_taken,
                    frame = reduced.frame_index,
                    "time frame synchronisation done"
                );
                self.frame_index = FrameIndex::Known(reduced.frame_index);
                self.next_frame_at = now + Duration::from_nanos(reduced.offset_nanoseconds);
            }
            Err(Error::EmptySequence) => {
                tracing::debug!("time frame synchronisation done, no responses received");
                self.frame_index = FrameIndex::Known(0);
                self.next_frame_at = now + self.interval;
            }
            Err(error) => {
                tracing::warn!(%error, "time frame synchronisation failed, free-running");
                self.frame_index = FrameIndex::Known(0);
                self.next_frame_at = now + self.interval;
            }
        }

        if self.bus_tx.try_send(TimerEvent::TickerStarted).is_err() {
            // Bus full means an event is already pending; the loop will
            // pick it up before anything else can happen.
            tracing::warn!("ticker-start event dropped: bus occupied");
        }
    }

    fn process_internal_event(&mut self, event: TimerEvent) {
        match event {
            TimerEvent::TickerStarted => {
                self.is_ticker_running = true;
            }
            TimerEvent::ConfigurationChanged => {
                self.configuration = self.reporter.current_configuration();
                self.is_ticker_running = false;
                self.frame_index = FrameIndex::Unknown;
                tracing::info!("observer roster changed, re-synchronising");
                self.start_sync();
            }
        }
    }

    /// Answers a peer's sync request with the current frame index and the
    /// nanoseconds left, deadline-compensated. Not running and never
    /// synced means there is nothing to report, which is not an error.
    fn process_time_frame_request(&mut self, request: Inbound<RequestTimeFrames>) {
        let Some(deadline) = self.sync_deadline else {
            return;
        };
        if !self.is_ticker_running && !self.sync_in_progress {
            return;
        }

        let now = Instant::now();
        let deadline_delta = if deadline >= now {
            (deadline - now).as_nanos() as i128
        } else {
            -((now - deadline).as_nanos() as i128)
        };
        let nanoseconds_left =
            (self.interval.as_nanos() as i128 + deadline_delta).max(0) as u64;

        let response =
            ResponseTimeFrame::new(self.frame_index.reported(), nanoseconds_left);

        match self.outgoing_responses_tx.try_send((request.from, response)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    error = %Error::ChannelTransferringFailed,
                    observer = request.from,
                    "time frame response dropped"
                );
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("time frame response channel closed");
            }
        }
    }

    fn process_tick(&mut self) {
        let next = self.frame_index.next();
        self.frame_index = FrameIndex::Known(next);

        // A fresh event every tick; the previous one stays frozen for
        // whoever still holds it.
        let event = Arc::new(FrameEvent {
            index: next,
            configuration: self.configuration.clone(),
        });

        if self.frame_events_tx.try_send(event).is_err() {
            tracing::trace!(frame = next, "frame end dropped, no receiver ready");
        }
    }

    /// Time of the next frame boundary. Past boundaries are healed by
    /// phase-aligned catch-up: the target advances whole intervals, so an
    /// overrun shortens the current frame instead of skewing all later
    /// ones.
    fn next_frame_deadline(&mut self) -> Instant {
        let now = Instant::now();
        while self.next_frame_at <= now {
            self.next_frame_at += self.interval;
        }
        self.next_frame_at
    }
}

/// Reduction of a sync response set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MajorityReduction {
    /// Average corrected nanoseconds until the next frame boundary.
    pub offset_nanoseconds: u64,
    /// Frame index the next boundary belongs to.
    pub frame_index: u16,
    /// How many responses went into the winning group's average.
    pub responses_taken: usize,
}

/// Groups responses by reported frame index, picks the largest group
/// (ties go to the first seen), and averages its latency-corrected
/// offsets: `interval + nanoseconds_left − (now − received_at)`. An
/// average beyond one interval pushes the index one frame forward.
pub fn majority_of_frame_responses(
    responses: &[ResponseTimeFrame],
    interval: Duration,
    now: Instant,
) -> Result<MajorityReduction> {
    if responses.is_empty() {
        return Err(Error::EmptySequence);
    }

    // First-seen ordering matters for tie breaking, so no hash map here.
    let mut groups: Vec<(u16, Vec<u64>)> = Vec::new();
    for vote in responses {
        let in_flight = now.saturating_duration_since(vote.received_at).as_nanos() as i128;
        let corrected =
            (interval.as_nanos() as i128 + vote.nanoseconds_left as i128 - in_flight).max(0);

        match groups.iter_mut().find(|(index, _)| *index == vote.frame_index) {
            Some((_, offsets)) => offsets.push(corrected as u64),
            None => groups.push((vote.frame_index, vec![corrected as u64])),
        }
    }

    let mut top_index = 0u16;
    let mut top_offsets: &[u64] = &[];
    for (index, offsets) in &groups {
        if offsets.len() > top_offsets.len() {
            top_index = *index;
            top_offsets = offsets;
        }
    }

    let total: u128 = top_offsets.iter().map(|o| u128::from(*o)).sum();
    let offset_nanoseconds = (total / top_offsets.len() as u128) as u64;

    let mut frame_index = top_index;
    if u128::from(offset_nanoseconds) > interval.as_nanos() {
        frame_index = frame_index.wrapping_add(1);
    }
    if frame_index >= OBSERVERS_MAX_COUNT {
        frame_index = 0;
    }

    Ok(MajorityReduction {
        offset_nanoseconds,
        frame_index,
        responses_taken: top_offsets.len(),
    })
}
