//! The audio context: graph ownership, locks, and the update loop
//!
//! A [`Context`] owns everything one audio graph needs at runtime:
//!
//! - the node registry and render-side state, behind the **render lock**;
//! - the edge tables, pending connection queues, and dirty-junction set,
//!   behind the **graph lock**;
//! - the update thread that applies deferred connects and disconnects;
//! - the destination node the device adapter pulls from;
//! - the event channel carrying finished-source callbacks off the render
//!   thread.
//!
//! The two locks are never acquired nested in blocking form. Client
//! threads and the update thread take the graph lock; the render thread
//! takes the render lock for exactly one quantum and only ever *tries* the
//! graph lock inside its pre/post-render housekeeping, so a held graph
//! lock merely defers housekeeping to the next quantum instead of stalling
//! audio.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::bus::{AudioBus, ChannelInterpretation};
use crate::dispatcher::{event_channel, EngineEvent, EventReceiver, EventSender, FinishedCallback};
use crate::error::{Error, Result};
use crate::junction::{JunctionKey, OutputKey};
use crate::node::{
    process_if_necessary, NodeConfig, NodeId, NodeState, Processor, Registry, RenderContext,
};
use crate::param::Param;
use crate::scheduled::PlaybackState;
use crate::{DEFAULT_SAMPLE_RATE, MAX_CHANNELS, RENDER_QUANTUM_FRAMES};

/// Seconds a disconnect crossfades before its edge is unlinked.
const DISCONNECT_FADE_SECONDS: f64 = 0.1;
/// Connects to a scheduled source are deferred until its start time falls
/// inside this lookahead window.
const SCHEDULING_HORIZON_SECONDS: f64 = 0.1;
/// How many quanta of audio time the update thread sleeps between passes
/// when nothing signals it.
const UPDATE_INTERVAL_QUANTA: f64 = 16.0;

/// Device-facing shape of a context.
#[derive(Debug, Clone, Copy)]
pub struct ContextConfig {
    pub input_channels: usize,
    pub output_channels: usize,
    pub sample_rate: f64,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            input_channels: 1,
            output_channels: 2,
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Timing descriptor of the most recently rendered block.
#[derive(Debug, Clone, Copy)]
pub struct RenderQuantum {
    pub frame: u64,
    pub time: f64,
    pub sample_rate: f64,
}

/// Lifecycle of a deferred edge change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionPhase {
    Connect,
    Disconnect,
    FinishDisconnect,
}

impl ConnectionPhase {
    /// Queue drain priority: disconnect work runs before fresh connects so
    /// a reconnect never observes a half-removed edge.
    fn priority(self) -> u8 {
        match self {
            ConnectionPhase::Disconnect => 0,
            ConnectionPhase::FinishDisconnect => 1,
            ConnectionPhase::Connect => 2,
        }
    }
}

#[derive(Debug)]
struct PendingConnection {
    source: NodeId,
    src_index: usize,
    dest: NodeId,
    dest_index: usize,
    phase: ConnectionPhase,
    /// Seconds left in the disconnect crossfade.
    remaining: f64,
    seq: u64,
}

/// A queued parameter modulation edge.
#[derive(Debug)]
struct PendingParamConnection {
    node: NodeId,
    param: usize,
    driver: OutputKey,
}

/// Graph-thread view of one node, kept so validation and scheduling checks
/// never need the render lock.
struct NodeMeta {
    inputs: usize,
    outputs: usize,
    params: Vec<&'static str>,
    scheduled: bool,
    /// Committed/pending start time of a scheduled source, as f64 bits.
    start_time: Arc<AtomicU64>,
    /// Connect/disconnect crossfade target, as f32 bits.
    fade_target: Arc<AtomicU32>,
}

/// Everything guarded by the graph lock.
struct GraphTables {
    connected: HashMap<JunctionKey, Vec<OutputKey>>,
    dirty: HashSet<JunctionKey>,
    pending: Vec<PendingConnection>,
    pending_params: Vec<PendingParamConnection>,
    node_meta: HashMap<NodeId, NodeMeta>,
    /// Inspector nodes that may need pulling when nothing consumes them.
    auto_pull_candidates: Vec<NodeId>,
    pull_set_stale: bool,
    /// Scheduled sources to auto-disconnect once they finish.
    automatic_sources: Vec<NodeId>,
    /// Keeps the update thread alive through in-flight disconnect fades
    /// after shutdown is requested.
    graph_keep_alive: f64,
    next_seq: u64,
}

/// Everything guarded by the render lock.
struct RenderState {
    registry: Registry,
    automatic_pull: Vec<NodeId>,
    input_bus: AudioBus,
    initialized: bool,
}

pub struct Context {
    config: ContextConfig,
    sample_rate: f64,
    tables: Mutex<GraphTables>,
    render: Mutex<RenderState>,
    update_signal: Mutex<bool>,
    update_cv: Condvar,
    update_should_run: AtomicBool,
    current_frame: AtomicU64,
    events_tx: EventSender,
    events_rx: EventReceiver,
    destination: NodeId,
    update_thread: Mutex<Option<JoinHandle<()>>>,
    offline: bool,
}

/// Options a node supplies at registration beyond its [`NodeConfig`].
#[derive(Default)]
pub(crate) struct RegisterOptions {
    pub scheduled: bool,
    pub auto_pull: bool,
}

impl Context {
    /// Create a context that renders under a live device clock. The update
    /// thread starts immediately; rendering starts when a device adapter
    /// (or offline renderer) initializes the context.
    pub fn new(config: ContextConfig) -> Arc<Self> {
        Self::build(config, false)
    }

    /// Create a context driven manually, with no update thread; deferred
    /// connections are applied by the offline renderer between quanta.
    pub fn new_offline(config: ContextConfig) -> Arc<Self> {
        Self::build(config, true)
    }

    /// The process-wide default context: mono input, stereo output,
    /// 44.1 kHz.
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<Context>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Context::new(ContextConfig::default())))
    }

    fn build(config: ContextConfig, offline: bool) -> Arc<Self> {
        let sample_rate = config.sample_rate;
        let (events_tx, events_rx) = event_channel();

        let mut registry = Registry::new(sample_rate);
        let destination_state = NodeState::new(
            Box::new(crate::nodes::destination::DestinationProcessor),
            NodeConfig {
                inputs: vec![config.output_channels.clamp(1, MAX_CHANNELS)],
                outputs: Vec::new(),
                params: Vec::new(),
                channel_count: config.output_channels.clamp(1, MAX_CHANNELS),
                channel_count_mode: crate::node::ChannelCountMode::Explicit,
                interpretation: ChannelInterpretation::Speakers,
                channel_policy: crate::node::OutputChannelPolicy::Fixed,
                sample_rate,
            },
        );
        let destination_fade = Arc::clone(&destination_state.fade_target);
        let destination = registry.insert(destination_state);

        let mut tables = GraphTables {
            connected: HashMap::new(),
            dirty: HashSet::new(),
            pending: Vec::new(),
            pending_params: Vec::new(),
            node_meta: HashMap::new(),
            auto_pull_candidates: Vec::new(),
            pull_set_stale: false,
            automatic_sources: Vec::new(),
            graph_keep_alive: 0.0,
            next_seq: 0,
        };
        tables.connected.insert(
            JunctionKey::Input {
                node: destination,
                input: 0,
            },
            Vec::new(),
        );
        tables.node_meta.insert(
            destination,
            NodeMeta {
                inputs: 1,
                outputs: 0,
                params: Vec::new(),
                scheduled: false,
                start_time: Arc::new(AtomicU64::new(f64::INFINITY.to_bits())),
                fade_target: destination_fade,
            },
        );

        let context = Arc::new(Self {
            config,
            sample_rate,
            tables: Mutex::new(tables),
            render: Mutex::new(RenderState {
                registry,
                automatic_pull: Vec::new(),
                input_bus: AudioBus::new(
                    config.input_channels.max(1),
                    RENDER_QUANTUM_FRAMES,
                    sample_rate,
                ),
                initialized: false,
            }),
            update_signal: Mutex::new(false),
            update_cv: Condvar::new(),
            update_should_run: AtomicBool::new(true),
            current_frame: AtomicU64::new(0),
            events_tx,
            events_rx,
            destination,
            update_thread: Mutex::new(None),
            offline,
        });

        if !offline {
            let weak = Arc::downgrade(&context);
            let handle = std::thread::Builder::new()
                .name("polaron-graph-update".into())
                .spawn(move || update_thread_main(weak))
                .expect("failed to spawn graph update thread");
            *context.update_thread.lock().unwrap() = Some(handle);
        }

        info!(
            sample_rate,
            input_channels = config.input_channels,
            output_channels = config.output_channels,
            offline,
            "audio context created"
        );
        context
    }

    // ------------------------------------------------------------------
    // Lock-free clock
    // ------------------------------------------------------------------

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn current_sample_frame(&self) -> u64 {
        self.current_frame.load(Ordering::Acquire)
    }

    pub fn current_time(&self) -> f64 {
        self.current_sample_frame() as f64 / self.sample_rate
    }

    /// Timing of the last rendered block.
    pub fn last_quantum(&self) -> RenderQuantum {
        let frame = self.current_sample_frame();
        RenderQuantum {
            frame,
            time: frame as f64 / self.sample_rate,
            sample_rate: self.sample_rate,
        }
    }

    pub fn config(&self) -> ContextConfig {
        self.config
    }

    /// The node the device adapter pulls from.
    pub fn destination_id(&self) -> NodeId {
        self.destination
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Allow rendering. Called by the device adapter and offline renderer
    /// before the first quantum; rendering an uninitialized context yields
    /// silence.
    pub fn initialize(&self) {
        self.render.lock().unwrap().initialized = true;
    }

    pub fn uninitialize(&self) {
        self.render.lock().unwrap().initialized = false;
    }

    /// Graceful shutdown: stops the update thread after in-flight
    /// disconnect fades have drained.
    pub fn close(&self) {
        self.update_should_run.store(false, Ordering::Release);
        self.signal_update();
        if let Some(handle) = self.update_thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        debug!("audio context closed");
    }

    /// Run queued completion callbacks on the calling thread. Callbacks
    /// are never run on the render thread.
    pub fn drain_events(&self) -> usize {
        let mut drained = 0;
        for event in self.events_rx.try_iter() {
            match event {
                EngineEvent::SourceFinished { callback, .. } => {
                    if let Some(callback) = callback {
                        callback();
                    }
                }
            }
            drained += 1;
        }
        drained
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    pub(crate) fn register(
        &self,
        processor: Box<dyn Processor>,
        config: NodeConfig,
        options: RegisterOptions,
    ) -> Result<NodeId> {
        for &channels in config.inputs.iter().chain(config.outputs.iter()) {
            if channels == 0 || channels > MAX_CHANNELS {
                return Err(Error::TooManyChannels(channels));
            }
        }

        let input_count = config.inputs.len();
        let output_count = config.outputs.len();
        let param_names: Vec<&'static str> = config.params.iter().map(|p| p.name()).collect();

        let state = NodeState::new(processor, config);
        let fade_target = Arc::clone(&state.fade_target);

        let id = {
            let mut rs = self.render.lock().unwrap();
            rs.registry.insert(state)
        };

        {
            let mut tables = self.tables.lock().unwrap();
            for input in 0..input_count {
                tables
                    .connected
                    .insert(JunctionKey::Input { node: id, input }, Vec::new());
            }
            for param in 0..param_names.len() {
                tables
                    .connected
                    .insert(JunctionKey::Param { node: id, param }, Vec::new());
            }
            tables.node_meta.insert(
                id,
                NodeMeta {
                    inputs: input_count,
                    outputs: output_count,
                    params: param_names,
                    scheduled: options.scheduled,
                    start_time: Arc::new(AtomicU64::new(f64::INFINITY.to_bits())),
                    fade_target,
                },
            );
            if options.auto_pull {
                tables.auto_pull_candidates.push(id);
                tables.pull_set_stale = true;
            }
        }

        Ok(id)
    }

    pub(crate) fn param_index(&self, node: NodeId, name: &str) -> Result<usize> {
        let tables = self.tables.lock().unwrap();
        let meta = tables.node_meta.get(&node).ok_or(Error::UnknownNode)?;
        meta.params
            .iter()
            .position(|p| *p == name)
            .ok_or_else(|| Error::UnknownParam(name.to_string()))
    }

    pub(crate) fn node_io_counts(&self, node: NodeId) -> Result<(usize, usize)> {
        let tables = self.tables.lock().unwrap();
        let meta = tables.node_meta.get(&node).ok_or(Error::UnknownNode)?;
        Ok((meta.inputs, meta.outputs))
    }

    // ------------------------------------------------------------------
    // Graph edits (deferred)
    // ------------------------------------------------------------------

    /// Queue an edge from `source`'s output to `dest`'s input. O(1) apart
    /// from validation; the render thread sees the edge only after the
    /// update loop applies it at a quantum boundary.
    pub(crate) fn connect_nodes(
        &self,
        source: NodeId,
        src_index: usize,
        dest: NodeId,
        dest_index: usize,
    ) -> Result<()> {
        {
            let mut tables = self.tables.lock().unwrap();
            let src_meta = tables.node_meta.get(&source).ok_or(Error::UnknownNode)?;
            if src_index >= src_meta.outputs {
                return Err(Error::SourceIndexOutOfRange {
                    index: src_index,
                    count: src_meta.outputs,
                });
            }
            let dest_meta = tables.node_meta.get(&dest).ok_or(Error::UnknownNode)?;
            if dest_index >= dest_meta.inputs {
                return Err(Error::DestinationIndexOutOfRange {
                    index: dest_index,
                    count: dest_meta.inputs,
                });
            }
            if source == dest || reaches(&tables, dest, source) {
                return Err(Error::CycleDetected);
            }

            let seq = tables.next_seq;
            tables.next_seq += 1;
            tables.pending.push(PendingConnection {
                source,
                src_index,
                dest,
                dest_index,
                phase: ConnectionPhase::Connect,
                remaining: 0.0,
                seq,
            });
        }
        self.signal_update();
        Ok(())
    }

    /// Queue a two-phase disconnect of one edge: fade the source for
    /// [`DISCONNECT_FADE_SECONDS`], then unlink.
    pub(crate) fn disconnect_nodes(
        &self,
        source: NodeId,
        src_index: usize,
        dest: NodeId,
        dest_index: usize,
    ) -> Result<()> {
        {
            let mut tables = self.tables.lock().unwrap();
            let src_meta = tables.node_meta.get(&source).ok_or(Error::UnknownNode)?;
            if src_index >= src_meta.outputs {
                return Err(Error::SourceIndexOutOfRange {
                    index: src_index,
                    count: src_meta.outputs,
                });
            }
            let dest_meta = tables.node_meta.get(&dest).ok_or(Error::UnknownNode)?;
            if dest_index >= dest_meta.inputs {
                return Err(Error::DestinationIndexOutOfRange {
                    index: dest_index,
                    count: dest_meta.inputs,
                });
            }

            let seq = tables.next_seq;
            tables.next_seq += 1;
            tables.pending.push(PendingConnection {
                source,
                src_index,
                dest,
                dest_index,
                phase: ConnectionPhase::Disconnect,
                remaining: 0.0,
                seq,
            });
        }
        self.signal_update();
        Ok(())
    }

    /// Queue disconnects for every edge leaving `source`.
    pub(crate) fn disconnect_all_from(&self, source: NodeId) -> Result<()> {
        let edges: Vec<(NodeId, usize, usize)> = {
            let tables = self.tables.lock().unwrap();
            if !tables.node_meta.contains_key(&source) {
                return Err(Error::UnknownNode);
            }
            outgoing_edges(&tables, source)
        };
        for (dest, dest_index, src_index) in edges {
            self.disconnect_nodes(source, src_index, dest, dest_index)?;
        }
        Ok(())
    }

    /// Queue an audio-rate modulation edge from `driver`'s output onto a
    /// parameter. Applied directly (no phases) by the next update pass.
    pub(crate) fn connect_param(
        &self,
        node: NodeId,
        param: usize,
        driver: NodeId,
        driver_output: usize,
    ) -> Result<()> {
        {
            let mut tables = self.tables.lock().unwrap();
            let driver_meta = tables.node_meta.get(&driver).ok_or(Error::UnknownNode)?;
            if driver_output >= driver_meta.outputs {
                return Err(Error::SourceIndexOutOfRange {
                    index: driver_output,
                    count: driver_meta.outputs,
                });
            }
            let meta = tables.node_meta.get(&node).ok_or(Error::UnknownNode)?;
            if param >= meta.params.len() {
                return Err(Error::UnknownParam(format!("#{param}")));
            }
            if node == driver || reaches(&tables, node, driver) {
                return Err(Error::CycleDetected);
            }
            tables.pending_params.push(PendingParamConnection {
                node,
                param,
                driver: OutputKey {
                    node: driver,
                    output: driver_output,
                },
            });
        }
        self.signal_update();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Scheduled source control
    // ------------------------------------------------------------------

    pub(crate) fn schedule_play(
        &self,
        node: NodeId,
        at: f64,
        on_ended: Option<FinishedCallback>,
    ) -> Result<()> {
        let committed_start = {
            let mut rs = self.render.lock().unwrap();
            let state = rs.registry.get_mut(node).ok_or(Error::UnknownNode)?;
            let behavior = state
                .processor
                .scheduled_mut()
                .ok_or(Error::UnknownNode)?;
            if let Some(callback) = on_ended {
                behavior.set_on_ended(callback);
            }
            behavior.play(at);
            behavior.start_time()
        };

        {
            let mut tables = self.tables.lock().unwrap();
            if let Some(meta) = tables.node_meta.get(&node) {
                meta.start_time
                    .store(committed_start.to_bits(), Ordering::Release);
            }
            if !tables.automatic_sources.contains(&node) {
                tables.automatic_sources.push(node);
            }
        }
        self.signal_update();
        Ok(())
    }

    pub(crate) fn schedule_stop(&self, node: NodeId, at: f64) -> Result<()> {
        let mut rs = self.render.lock().unwrap();
        let state = rs.registry.get_mut(node).ok_or(Error::UnknownNode)?;
        let behavior = state
            .processor
            .scheduled_mut()
            .ok_or(Error::UnknownNode)?;
        behavior.stop(at);
        Ok(())
    }

    pub(crate) fn schedule_reset(&self, node: NodeId) -> Result<()> {
        {
            let mut rs = self.render.lock().unwrap();
            let state = rs.registry.get_mut(node).ok_or(Error::UnknownNode)?;
            if let Some(behavior) = state.processor.scheduled_mut() {
                behavior.reset();
            }
            state.processor.reset();
        }
        let tables = self.tables.lock().unwrap();
        if let Some(meta) = tables.node_meta.get(&node) {
            meta.start_time
                .store(f64::INFINITY.to_bits(), Ordering::Release);
        }
        Ok(())
    }

    pub(crate) fn playback_state_of(&self, node: NodeId) -> Option<PlaybackState> {
        self.render.lock().unwrap().registry.playback_state(node)
    }

    // ------------------------------------------------------------------
    // Parameter access
    // ------------------------------------------------------------------

    pub(crate) fn with_param<R>(
        &self,
        node: NodeId,
        index: usize,
        f: impl FnOnce(&mut Param) -> R,
    ) -> Result<R> {
        let mut rs = self.render.lock().unwrap();
        let state = rs.registry.get_mut(node).ok_or(Error::UnknownNode)?;
        let param = state
            .params
            .get_mut(index)
            .ok_or_else(|| Error::UnknownParam(format!("#{index}")))?;
        Ok(f(param))
    }

    // ------------------------------------------------------------------
    // Update loop
    // ------------------------------------------------------------------

    fn signal_update(&self) {
        if self.offline {
            return;
        }
        {
            let mut pending = self.update_signal.lock().unwrap();
            *pending = true;
        }
        self.update_cv.notify_one();
    }

    /// Drain the pending connection queues under the graph lock. `dt` is
    /// the time credited against disconnect fades and the keep-alive:
    /// wall-clock elapsed for the update thread, quantum time for offline
    /// rendering. Returns the remaining keep-alive.
    pub(crate) fn update_pass(&self, dt: f64) -> f64 {
        let mut tables = self.tables.lock().unwrap();
        let t = &mut *tables;
        t.graph_keep_alive = (t.graph_keep_alive - dt).max(0.0);
        let now = self.current_time();

        // Parameter edges apply directly.
        while let Some(pp) = t.pending_params.pop() {
            let key = JunctionKey::Param {
                node: pp.node,
                param: pp.param,
            };
            let list = t.connected.entry(key).or_default();
            if !list.contains(&pp.driver) {
                list.push(pp.driver);
                t.dirty.insert(key);
            }
        }

        if t.pending.is_empty() {
            return t.graph_keep_alive;
        }

        let mut queue = std::mem::take(&mut t.pending);
        queue.sort_by_key(|pc| (pc.phase.priority(), pc.seq));

        for mut pc in queue {
            match pc.phase {
                ConnectionPhase::Connect => {
                    if defer_connect(t, &pc, now) {
                        t.pending.push(pc);
                    } else {
                        wire(t, &pc);
                    }
                }
                ConnectionPhase::Disconnect => {
                    if let Some(meta) = t.node_meta.get(&pc.source) {
                        meta.fade_target
                            .store(0.0f32.to_bits(), Ordering::Release);
                    }
                    pc.phase = ConnectionPhase::FinishDisconnect;
                    pc.remaining = DISCONNECT_FADE_SECONDS;
                    t.graph_keep_alive = t
                        .graph_keep_alive
                        .max(DISCONNECT_FADE_SECONDS + SCHEDULING_HORIZON_SECONDS);
                    t.pending.push(pc);
                }
                ConnectionPhase::FinishDisconnect => {
                    pc.remaining -= dt;
                    if pc.remaining > 0.0 {
                        t.pending.push(pc);
                    } else {
                        unlink(t, &pc);
                    }
                }
            }
        }

        t.graph_keep_alive
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    /// Render one 128-frame quantum into `out`, feeding `capture` (mono
    /// device input samples) into the graph's input bus.
    ///
    /// Called by the device adapter's data callback and by the offline
    /// renderer. An uninitialized context yields a zeroed bus.
    pub fn render_quantum(&self, out: &mut AudioBus, capture: Option<&[f32]>) {
        let mut guard = self.render.lock().unwrap();
        let rs = &mut *guard;

        if !rs.initialized {
            out.zero();
            return;
        }

        self.handle_pre_render(rs);

        // Stage capture input for stream nodes.
        rs.input_bus.zero();
        if let Some(samples) = capture {
            let n = samples.len().min(RENDER_QUANTUM_FRAMES);
            if n > 0 {
                rs.input_bus.channel_mut(0).data_mut()[..n].copy_from_slice(&samples[..n]);
            }
        }

        let frame = self.current_frame.load(Ordering::Acquire);
        {
            let RenderState {
                registry,
                automatic_pull,
                input_bus,
                ..
            } = rs;
            let ctx = RenderContext {
                current_time: frame as f64 / self.sample_rate,
                current_frame: frame,
                sample_rate: self.sample_rate,
                frames: RENDER_QUANTUM_FRAMES,
                events: &self.events_tx,
                capture: Some(&*input_bus),
            };

            process_if_necessary(registry, self.destination, &ctx);

            match registry.get(self.destination) {
                Some(state) if !state.inputs.is_empty() => {
                    let bus = state.inputs[0].resolved(registry);
                    out.copy_from(bus, ChannelInterpretation::Speakers);
                }
                _ => out.zero(),
            }

            for &id in automatic_pull.iter() {
                process_if_necessary(registry, id, &ctx);
            }
        }

        self.handle_post_render(rs);
        self.current_frame
            .store(frame + RENDER_QUANTUM_FRAMES as u64, Ordering::Release);
    }

    /// Pre-render housekeeping: refresh dirty junction snapshots, apply
    /// channel negotiation, rebuild the automatic pull set. Skipped for a
    /// quantum when the graph lock is contended.
    fn handle_pre_render(&self, rs: &mut RenderState) {
        let Ok(mut tables) = self.tables.try_lock() else {
            return;
        };
        let t = &mut *tables;

        if !t.dirty.is_empty() {
            let mut work: Vec<JunctionKey> = t.dirty.drain().collect();
            while let Some(key) = work.pop() {
                let connected = t.connected.get(&key).cloned().unwrap_or_default();
                match key {
                    JunctionKey::Input { node, input } => {
                        let widest = connected
                            .iter()
                            .filter_map(|k| rs.registry.output_channels(*k))
                            .max()
                            .unwrap_or(0);
                        let Some(state) = rs.registry.get_mut(node) else {
                            continue;
                        };
                        let Some(node_input) = state.inputs.get_mut(input) else {
                            continue;
                        };
                        node_input.junction.refresh(&connected);

                        let desired = state.negotiated_input_channels(widest);
                        if desired != state.inputs[input].number_of_channels()
                            && desired <= MAX_CHANNELS
                        {
                            state.inputs[input].summing_bus =
                                AudioBus::new(desired, RENDER_QUANTUM_FRAMES, self.sample_rate);
                            if state.channel_policy
                                == crate::node::OutputChannelPolicy::FollowInput
                            {
                                let mut resized = false;
                                for output in state.outputs.iter_mut() {
                                    if output.number_of_channels() != desired {
                                        output.bus = AudioBus::new(
                                            desired,
                                            RENDER_QUANTUM_FRAMES,
                                            self.sample_rate,
                                        );
                                        resized = true;
                                    }
                                }
                                if resized {
                                    // Downstream junctions see a new width.
                                    for (k, list) in t.connected.iter() {
                                        if list.iter().any(|o| o.node == node)
                                            && !work.contains(k)
                                        {
                                            work.push(*k);
                                        }
                                    }
                                }
                            }
                        }
                    }
                    JunctionKey::Param { node, param } => {
                        if let Some(state) = rs.registry.get_mut(node) {
                            if let Some(p) = state.params.get_mut(param) {
                                p.junction_mut().refresh(&connected);
                            }
                        }
                    }
                }
            }
            recompute_fan_out(&mut rs.registry);
            t.pull_set_stale = true;
        }

        if t.pull_set_stale {
            t.pull_set_stale = false;
            rs.automatic_pull.clear();
            for &id in &t.auto_pull_candidates {
                let pulled = rs
                    .registry
                    .get(id)
                    .map(|s| {
                        s.outputs.is_empty()
                            || s.outputs.iter().all(|o| !o.is_connected())
                    })
                    .unwrap_or(false);
                if pulled {
                    rs.automatic_pull.push(id);
                }
            }
        }
    }

    /// Post-render housekeeping: queue auto-disconnects for sources that
    /// finished this quantum. Skipped when the graph lock is contended.
    fn handle_post_render(&self, rs: &mut RenderState) {
        let mut queued = false;
        {
            let Ok(mut tables) = self.tables.try_lock() else {
                return;
            };
            let t = &mut *tables;

            let mut i = 0;
            while i < t.automatic_sources.len() {
                let id = t.automatic_sources[i];
                if rs.registry.playback_state(id) == Some(PlaybackState::Finished) {
                    t.automatic_sources.swap_remove(i);
                    for (dest, dest_index, src_index) in outgoing_edges(t, id) {
                        let seq = t.next_seq;
                        t.next_seq += 1;
                        t.pending.push(PendingConnection {
                            source: id,
                            src_index,
                            dest,
                            dest_index,
                            phase: ConnectionPhase::Disconnect,
                            remaining: 0.0,
                            seq,
                        });
                        queued = true;
                    }
                } else {
                    i += 1;
                }
            }
        }
        if queued {
            self.signal_update();
        }
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        // No join here: the update thread holds only a weak reference and
        // exits on its own once the upgrade fails or shutdown is flagged.
        self.update_should_run.store(false, Ordering::Release);
        self.update_cv.notify_one();
    }
}

/// Body of the graph update thread.
fn update_thread_main(context: Weak<Context>) {
    let mut last_pass = Instant::now();
    loop {
        let Some(context) = context.upgrade() else {
            break;
        };

        let interval = Duration::from_secs_f64(
            UPDATE_INTERVAL_QUANTA * RENDER_QUANTUM_FRAMES as f64 / context.sample_rate,
        );
        {
            let guard = context.update_signal.lock().unwrap();
            let (mut guard, _timeout) = context
                .update_cv
                .wait_timeout_while(guard, interval, |pending| !*pending)
                .unwrap();
            *guard = false;
        }

        let dt = last_pass.elapsed().as_secs_f64();
        last_pass = Instant::now();

        let keep_alive = context.update_pass(dt);
        let should_run = context.update_should_run.load(Ordering::Acquire);
        if !should_run && keep_alive <= 0.0 {
            debug!("graph update thread exiting");
            break;
        }
    }
}

/// True when `to` is reachable downstream of `from` through applied or
/// still-pending connect edges. Used to reject cycles at enqueue time.
fn reaches(t: &GraphTables, from: NodeId, to: NodeId) -> bool {
    let mut stack = vec![from];
    let mut visited: HashSet<NodeId> = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == to {
            return true;
        }
        if !visited.insert(node) {
            continue;
        }
        for (key, list) in t.connected.iter() {
            if list.iter().any(|o| o.node == node) {
                stack.push(key.owner());
            }
        }
        for pc in t.pending.iter() {
            if pc.phase == ConnectionPhase::Connect && pc.source == node {
                stack.push(pc.dest);
            }
        }
        for pp in t.pending_params.iter() {
            if pp.driver.node == node {
                stack.push(pp.node);
            }
        }
    }
    false
}

/// All applied edges leaving `source`, as `(dest, dest_index, src_index)`.
fn outgoing_edges(t: &GraphTables, source: NodeId) -> Vec<(NodeId, usize, usize)> {
    let mut edges = Vec::new();
    for (key, list) in t.connected.iter() {
        if let JunctionKey::Input { node, input } = key {
            for output in list {
                if output.node == source {
                    edges.push((*node, *input, output.output));
                }
            }
        }
    }
    edges
}

/// Whether a queued connect should wait: scheduled sources are wired only
/// once their start time falls inside the lookahead horizon, so the render
/// thread never sees a source long before it can sound.
fn defer_connect(t: &GraphTables, pc: &PendingConnection, now: f64) -> bool {
    let Some(meta) = t.node_meta.get(&pc.source) else {
        return false;
    };
    if !meta.scheduled {
        return false;
    }
    let start = f64::from_bits(meta.start_time.load(Ordering::Acquire));
    start > now + SCHEDULING_HORIZON_SECONDS
}

fn wire(t: &mut GraphTables, pc: &PendingConnection) {
    let key = JunctionKey::Input {
        node: pc.dest,
        input: pc.dest_index,
    };
    let output = OutputKey {
        node: pc.source,
        output: pc.src_index,
    };
    let list = t.connected.entry(key).or_default();
    if !list.contains(&output) {
        list.push(output);
        t.dirty.insert(key);
    }
    if let Some(meta) = t.node_meta.get(&pc.source) {
        // Audible immediately; any earlier fade-out ramps back up.
        meta.fade_target.store(1.0f32.to_bits(), Ordering::Release);
    }
}

fn unlink(t: &mut GraphTables, pc: &PendingConnection) {
    let key = JunctionKey::Input {
        node: pc.dest,
        input: pc.dest_index,
    };
    let output = OutputKey {
        node: pc.source,
        output: pc.src_index,
    };
    if let Some(list) = t.connected.get_mut(&key) {
        let before = list.len();
        list.retain(|o| *o != output);
        if list.len() != before {
            t.dirty.insert(key);
        }
    }
    if let Some(meta) = t.node_meta.get(&pc.source) {
        meta.fade_target.store(1.0f32.to_bits(), Ordering::Release);
    }
    t.pull_set_stale = true;
}

/// Rebuild every output's consumer counts from the rendering snapshots.
fn recompute_fan_out(registry: &mut Registry) {
    let mut input_counts: HashMap<OutputKey, usize> = HashMap::new();
    let mut param_counts: HashMap<OutputKey, usize> = HashMap::new();

    for id in 0..registry.len() {
        let Some(state) = registry.get(id) else {
            continue;
        };
        for input in state.inputs.iter() {
            for key in input.junction.outputs() {
                *input_counts.entry(*key).or_insert(0) += 1;
            }
        }
        for param in state.params.iter() {
            for key in param.junction().outputs() {
                *param_counts.entry(*key).or_insert(0) += 1;
            }
        }
    }

    for id in 0..registry.len() {
        let Some(state) = registry.get_mut(id) else {
            continue;
        };
        for (index, output) in state.outputs.iter_mut().enumerate() {
            let key = OutputKey { node: id, output: index };
            output.fan_out = input_counts.get(&key).copied().unwrap_or(0);
            output.param_fan_out = param_counts.get(&key).copied().unwrap_or(0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ContextConfig::default();
        assert_eq!(config.input_channels, 1);
        assert_eq!(config.output_channels, 2);
        assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
    }

    #[test]
    fn test_uninitialized_context_renders_silence() {
        let context = Context::new_offline(ContextConfig::default());
        let mut out = AudioBus::new(2, RENDER_QUANTUM_FRAMES, DEFAULT_SAMPLE_RATE);
        out.channel_mut(0).data_mut().fill(1.0);

        context.render_quantum(&mut out, None);

        assert!(out.is_silent());
        assert_eq!(context.current_sample_frame(), 0);
    }

    #[test]
    fn test_clock_advances_per_quantum() {
        let context = Context::new_offline(ContextConfig::default());
        context.initialize();
        let mut out = AudioBus::new(2, RENDER_QUANTUM_FRAMES, DEFAULT_SAMPLE_RATE);

        context.render_quantum(&mut out, None);
        context.render_quantum(&mut out, None);

        assert_eq!(context.current_sample_frame(), 256);
        let quantum = context.last_quantum();
        assert_eq!(quantum.frame, 256);
        assert!((quantum.time - 256.0 / DEFAULT_SAMPLE_RATE).abs() < 1e-12);
    }

    #[test]
    fn test_phase_priority_orders_disconnects_first() {
        assert!(ConnectionPhase::Disconnect.priority() < ConnectionPhase::Connect.priority());
        assert!(
            ConnectionPhase::FinishDisconnect.priority() < ConnectionPhase::Connect.priority()
        );
    }
}
