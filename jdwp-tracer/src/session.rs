// Debug session controller and breakpoint/step state machine
//
// Owns the event loop: pops event sets from the target, dispatches each
// event, and always resumes the target once a set is handled. The state
// machine arms a breakpoint on every entry location of the requested
// method once the class prepares, consumes each breakpoint exactly once,
// and switches to line stepping after the last entry location fires.

use crate::relay::StdioRelay;
use crate::resolve::{pretty_type_name, Resolver};
use crate::snapshot::{self, FrameHistory};
use crate::trace::TraceWriter;
use anyhow::{bail, Context, Result};
use jdwp_client::commands::event_kinds;
use jdwp_client::events::{Event, EventKind};
use jdwp_client::types::{ReferenceTypeId, ThreadId};
use jdwp_client::{JdwpConnection, JdwpError, LaunchedVm, SuspendPolicy};
use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::process::Child;
use tracing::{debug, info, warn};

/// Bounded wait per event-queue pop; a timeout just loops and waits again.
const EVENT_WAIT: Duration = Duration::from_secs(1);

pub type TraceSink = Box<dyn AsyncWrite + Send + Unpin>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepState {
    /// Waiting for the target class to prepare
    Unresolved,
    /// Entry breakpoints set, waiting for a hit
    Armed,
    /// Breakpoints consumed, stepping line by line
    Stepping,
    /// Target exited or detached
    Done,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unresolved => write!(f, "unresolved"),
            Self::Armed => write!(f, "armed"),
            Self::Stepping => write!(f, "stepping"),
            Self::Done => write!(f, "done"),
        }
    }
}

/// Armed entry breakpoints, keyed by request ID. Firing consumes the entry,
/// so a request can only ever be observed once. The highest armed line is
/// the gate for switching into step mode.
#[derive(Debug, Default)]
pub struct BreakpointRegistry {
    armed: HashMap<i32, i32>,
    final_line: Option<i32>,
}

impl BreakpointRegistry {
    pub fn arm(&mut self, request_id: i32, line: i32) {
        self.armed.insert(request_id, line);
        self.final_line = Some(self.final_line.map_or(line, |f| f.max(line)));
    }

    /// Consume a hit. `None` when the request was never armed or already
    /// fired.
    pub fn fire(&mut self, request_id: i32) -> Option<i32> {
        self.armed.remove(&request_id)
    }

    /// Whether this line is the highest among all lines ever armed.
    pub fn is_final(&self, line: i32) -> bool {
        self.final_line == Some(line)
    }

    pub fn armed_count(&self) -> usize {
        self.armed.len()
    }
}

pub struct Session {
    conn: JdwpConnection,
    child: Child,
    relay: Option<StdioRelay>,
    trace: TraceWriter<TraceSink>,
    resolver: Resolver,
    history: FrameHistory,
    breakpoints: BreakpointRegistry,
    method_name: String,
    target_class: Option<String>,
    state: StepState,
    disposed: bool,
}

impl Session {
    /// Attach to a freshly launched VM: start the stdio relay, open the
    /// trace document, and ask to be told when the target class prepares.
    pub async fn open(
        vm: LaunchedVm,
        trace_sink: TraceSink,
        log_sink: Option<tokio::fs::File>,
        class_pattern: &str,
        method_name: &str,
    ) -> Result<Self> {
        let LaunchedVm {
            mut child,
            mut connection,
        } = vm;

        let target_in = child.stdin.take().context("target stdin was not piped")?;
        let target_out = child.stdout.take().context("target stdout was not piped")?;

        // Everything fallible happens before the relay spawns and the trace
        // root element is written, so a failed open leaves nothing behind.
        connection
            .set_class_prepare(class_pattern, SuspendPolicy::All)
            .await
            .context("failed to request class prepare notification")?;

        let trace = TraceWriter::open(trace_sink).await?;

        let relay = StdioRelay::start(
            tokio::io::stdin(),
            tokio::io::stdout(),
            target_in,
            target_out,
            log_sink,
        );

        Ok(Self {
            conn: connection,
            child,
            relay: Some(relay),
            trace,
            resolver: Resolver::default(),
            history: FrameHistory::default(),
            breakpoints: BreakpointRegistry::default(),
            method_name: method_name.to_string(),
            target_class: None,
            state: StepState::Unresolved,
            disposed: false,
        })
    }

    /// Drive the event loop until the target disconnects or exits. The
    /// target is resumed after every event set, never mid-set.
    pub async fn run(&mut self) -> Result<()> {
        while self.state != StepState::Done {
            match tokio::time::timeout(EVENT_WAIT, self.conn.recv_event()).await {
                Err(_) => {
                    debug!("no debug events within {:?}, waiting", EVENT_WAIT);
                }
                Ok(None) => {
                    info!("target disconnected");
                    self.state = StepState::Done;
                }
                Ok(Some(set)) => {
                    for event in set.events {
                        self.handle_event(event).await?;
                    }
                    if self.state != StepState::Done {
                        if let Err(e) = self.conn.resume_all().await {
                            debug!("resume after event set failed: {}", e);
                            self.state = StepState::Done;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: Event) -> Result<()> {
        match event.details {
            EventKind::ClassPrepare {
                ref_type,
                signature,
                ..
            } => self.on_class_prepare(ref_type, &signature).await,
            EventKind::Breakpoint { thread, .. } => {
                self.on_breakpoint(event.request_id, thread).await
            }
            EventKind::Step { thread, .. } => {
                self.take_snapshot(thread).await;
                Ok(())
            }
            EventKind::VmStart { .. } => {
                debug!("target VM started");
                Ok(())
            }
            EventKind::VmDeath => {
                info!("target VM exited");
                self.state = StepState::Done;
                Ok(())
            }
            EventKind::ThreadStart { .. } | EventKind::ThreadDeath { .. } => Ok(()),
            EventKind::Unknown { kind } => {
                warn!("unhandled event kind {}, skipping", kind);
                Ok(())
            }
        }
    }

    /// The target class is loaded: set one breakpoint per entry location of
    /// the requested method. Zero armable locations is a configuration
    /// error; the session cannot trace anything.
    async fn on_class_prepare(&mut self, ref_type: ReferenceTypeId, signature: &str) -> Result<()> {
        if self.state != StepState::Unresolved {
            debug!("another class prepared ({}) while {}", signature, self.state);
            return Ok(());
        }

        let class_name = pretty_type_name(signature);
        let methods = self.conn.methods(ref_type).await?;

        for method in methods.iter().filter(|m| m.name == self.method_name) {
            let table = match self.conn.line_table(ref_type, method.method_id).await {
                Ok(table) => table,
                Err(e) if e.is_absent_information() => {
                    debug!("{}.{} has no line info, skipping", class_name, method.name);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let Some(entry) = table.entry() else {
                continue;
            };

            let request_id = self
                .conn
                .set_breakpoint(
                    ref_type,
                    method.method_id,
                    entry.line_code_index,
                    SuspendPolicy::All,
                )
                .await?;
            self.breakpoints.arm(request_id, entry.line_number);
            info!(
                "breakpoint armed at {}:{} (request {})",
                class_name, entry.line_number, request_id
            );
        }

        if self.breakpoints.armed_count() == 0 {
            bail!(
                "method {}.{} resolves to no breakable location",
                class_name,
                self.method_name
            );
        }

        self.target_class = Some(class_name);
        self.state = StepState::Armed;
        Ok(())
    }

    /// A breakpoint fired: retire it, snapshot, and once the final entry
    /// location has been seen, switch to line stepping scoped to the
    /// target class.
    async fn on_breakpoint(&mut self, request_id: i32, thread: ThreadId) -> Result<()> {
        let Some(line) = self.breakpoints.fire(request_id) else {
            debug!("breakpoint request {} already retired, ignoring", request_id);
            return Ok(());
        };

        if let Err(e) = self
            .conn
            .clear_request(event_kinds::BREAKPOINT, request_id)
            .await
        {
            warn!("failed to clear breakpoint request {}: {}", request_id, e);
        }

        self.take_snapshot(thread).await;

        if self.state == StepState::Armed && self.breakpoints.is_final(line) {
            let class = self
                .target_class
                .clone()
                .context("breakpoint hit before class resolution")?;
            self.conn
                .set_step(thread, &class, SuspendPolicy::All)
                .await?;
            self.state = StepState::Stepping;
            info!("stepping armed in {} from line {}", class, line);
        }

        Ok(())
    }

    /// Snapshot the event thread's top frame. Introspection failures are
    /// logged and the session continues; a thread that cannot be inspected
    /// at this instant just skips the program point.
    async fn take_snapshot(&mut self, thread: ThreadId) {
        let Some(target_class) = self.target_class.clone() else {
            return;
        };

        let result = snapshot::capture(
            &mut self.conn,
            &mut self.resolver,
            &mut self.history,
            thread,
            &target_class,
        )
        .await;

        match result {
            Ok(Some(record)) => {
                if let Err(e) = self.trace.write_point(&record).await {
                    warn!("failed to append trace record: {:#}", e);
                }
            }
            Ok(None) => {}
            Err(e) => {
                let thread_state = e
                    .downcast_ref::<JdwpError>()
                    .is_some_and(JdwpError::is_thread_not_suspended);
                if thread_state {
                    debug!("thread {} not inspectable here, skipping snapshot", thread);
                } else {
                    warn!("variable snapshot failed: {:#}", e);
                }
            }
        }
    }

    /// Tear the session down: join the relay pumps, close the trace
    /// document, release the protocol session, and reap the child. Safe to
    /// call repeatedly and after the target has already disconnected.
    pub async fn shutdown(&mut self) {
        if let Some(mut relay) = self.relay.take() {
            relay.stop().await;
        }

        if let Err(e) = self.trace.close().await {
            warn!("failed to close trace document: {:#}", e);
        }

        if !self.disposed {
            self.disposed = true;
            if let Err(e) = self.conn.dispose().await {
                debug!("dispose failed, target likely gone: {}", e);
            }
        }

        if self.state != StepState::Done {
            // Startup failed; do not leave a suspended JVM behind
            if let Err(e) = self.child.start_kill() {
                debug!("target already finished: {}", e);
            }
        }

        match tokio::time::timeout(Duration::from_secs(2), self.child.wait()).await {
            Ok(Ok(status)) => debug!("target exited with {}", status),
            Ok(Err(e)) => debug!("failed to reap target: {}", e),
            Err(_) => warn!("target did not exit within shutdown grace period"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breakpoint_fires_once() {
        let mut registry = BreakpointRegistry::default();
        registry.arm(1, 5);

        assert_eq!(registry.fire(1), Some(5));
        assert_eq!(registry.fire(1), None);
        assert_eq!(registry.fire(99), None);
    }

    #[test]
    fn test_final_line_is_highest_armed() {
        // Two overloaded entry locations at lines 5 and 9: only the hit at
        // line 9 may start stepping.
        let mut registry = BreakpointRegistry::default();
        registry.arm(1, 5);
        registry.arm(2, 9);

        let first = registry.fire(1).unwrap();
        assert!(!registry.is_final(first));

        let second = registry.fire(2).unwrap();
        assert!(registry.is_final(second));
    }

    #[test]
    fn test_final_line_ignores_arm_order() {
        let mut registry = BreakpointRegistry::default();
        registry.arm(2, 9);
        registry.arm(1, 5);

        assert!(registry.is_final(9));
        assert!(!registry.is_final(5));
    }

    #[test]
    fn test_armed_count_tracks_retirements() {
        let mut registry = BreakpointRegistry::default();
        assert_eq!(registry.armed_count(), 0);
        registry.arm(1, 5);
        registry.arm(2, 9);
        assert_eq!(registry.armed_count(), 2);
        registry.fire(1);
        assert_eq!(registry.armed_count(), 1);
    }
}
