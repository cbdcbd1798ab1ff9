//! Process-execution tracer: loads a CO-RE eBPF object, attaches the execve
//! tracepoints, and pumps the kernel ring buffer into an event channel.
//!
//! This is the one natively continuous collector; there is no point variant
//! to adapt because exec events only exist as a stream.

use aya::maps::RingBuf;
use aya::programs::TracePoint;
use aya::{Btf, EbpfLoader};
use aya_log::EbpfLogger;
use caps::{CapSet, Capability};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use antimetal_ebpf_common::{
    ExecEventHeader, EXEC_EVENT_HEADER_SIZE, MAP_EVENTS, PROG_SYS_ENTER_EXECVE,
    PROG_SYS_EXIT_EXECVE, TRACEPOINT_CATEGORY, TRACEPOINT_SYS_ENTER_EXECVE,
    TRACEPOINT_SYS_EXIT_EXECVE,
};

use crate::bpf_probe::{CoreProbe, CoreSupport};
use crate::collector::{
    check_startable, Capabilities, Collector, CollectorBase, CollectorStatus, ContinuousCollector,
    ContinuousState, MetricKind,
};
use crate::config::CollectionConfig;
use crate::error::{AgentError, Result};
use crate::payload::MetricPayload;

const ENV_BPF_PATH: &str = "ANTIMETAL_BPF_PATH";

const BPF_OBJECT_CANDIDATES: [&str; 2] = [
    "/usr/local/share/antimetal/execsnoop.bpf.o",
    "/usr/share/antimetal/execsnoop.bpf.o",
];

/// Deliberately small: exec bursts (build systems, shell scripts) can exceed
/// any consumer; freshness beats completeness here, so a full channel drops.
const EVENT_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct ExecEvent {
    pub pid: u32,
    pub ppid: u32,
    pub uid: u32,
    pub retval: i32,
    /// Command name after the argv[0] heuristic (see `parse_event`).
    pub command: String,
    pub args: Vec<String>,
    /// Wall-clock time taken at parse time, not in the kernel.
    pub timestamp: DateTime<Utc>,
}

pub struct ExecTracer {
    base: CollectorBase,
    config: CollectionConfig,
    object_path: Option<PathBuf>,
    state: Arc<ContinuousState>,
    stop: Option<CancellationToken>,
}

impl ExecTracer {
    pub fn new(config: &CollectionConfig, object_path: Option<PathBuf>) -> Self {
        Self {
            base: CollectorBase::new(
                MetricKind::Process,
                "process",
                Capabilities {
                    supports_one_shot: false,
                    supports_continuous: true,
                    requires_root: true,
                    requires_ebpf: true,
                    min_kernel_version: Some("4.18"),
                },
            ),
            config: config.clone(),
            object_path,
            state: ContinuousState::new(),
            stop: None,
        }
    }
}

pub fn factory(config: &CollectionConfig) -> Result<Box<dyn ContinuousCollector>> {
    Ok(Box::new(ExecTracer::new(config, None)))
}

impl Collector for ExecTracer {
    fn kind(&self) -> MetricKind {
        self.base.kind
    }
    fn name(&self) -> &str {
        self.base.name
    }
    fn capabilities(&self) -> Capabilities {
        self.base.capabilities
    }
}

impl ContinuousCollector for ExecTracer {
    fn start(&mut self, cancel: CancellationToken) -> Result<mpsc::Receiver<MetricPayload>> {
        check_startable(self.state.status())?;

        match self.setup(cancel) {
            Ok(rx) => {
                self.state.clear_error();
                Ok(rx)
            }
            Err(err) => {
                self.state.fail(err.clone());
                Err(err)
            }
        }
    }

    fn stop(&mut self) -> Result<()> {
        if self.state.status() == CollectorStatus::Disabled {
            return Ok(());
        }
        if let Some(stop) = self.stop.take() {
            stop.cancel();
        }
        // The pump drops the loaded object on exit, which detaches both
        // tracepoints and closes the ring buffer reader.
        self.state.set_status(CollectorStatus::Disabled);
        Ok(())
    }

    fn status(&self) -> CollectorStatus {
        self.state.status()
    }

    fn last_error(&self) -> Option<AgentError> {
        self.state.last_error()
    }
}

impl ExecTracer {
    fn setup(&mut self, cancel: CancellationToken) -> Result<mpsc::Receiver<MetricPayload>> {
        if !has_bpf_capability() {
            return Err(AgentError::Permission(
                "CAP_BPF or CAP_SYS_ADMIN required for the exec tracer".to_string(),
            ));
        }

        // Unprivileged-ish processes hit the memlock limit when the verifier
        // maps program memory; lifting it is the standard loader prelude.
        bump_memlock_rlimit();

        let probe = CoreProbe::detect(&self.config)?;
        if probe.support == CoreSupport::None {
            return Err(AgentError::Platform(format!(
                "kernel too old for CO-RE: {}",
                probe.kernel_version
            )));
        }
        info!(
            "exec: CO-RE support {:?}, btf {}",
            probe.support,
            if probe.btf_path.is_some() {
                "present"
            } else {
                "absent"
            }
        );

        let (bpf_bytes, chosen_path) = read_bpf_bytes(self.object_path.as_deref())?;
        info!("exec: using BPF object {chosen_path}");

        let btf = Btf::from_sys_fs().ok();
        let mut loader = EbpfLoader::new();
        loader.btf(btf.as_ref());
        let mut ebpf = loader
            .load(&bpf_bytes)
            .map_err(|e| AgentError::Platform(format!("failed to load BPF object: {e}")))?;

        let logger = match EbpfLogger::init(&mut ebpf) {
            Ok(logger) => {
                info!("exec: BPF logger initialized");
                Some(logger)
            }
            Err(e) => {
                debug!("exec: BPF logger not active: {e}");
                None
            }
        };

        for (program, tracepoint) in [
            (PROG_SYS_ENTER_EXECVE, TRACEPOINT_SYS_ENTER_EXECVE),
            (PROG_SYS_EXIT_EXECVE, TRACEPOINT_SYS_EXIT_EXECVE),
        ] {
            let tp: &mut TracePoint = ebpf
                .program_mut(program)
                .ok_or_else(|| AgentError::not_found(format!("BPF program {program}")))?
                .try_into()
                .map_err(|e| AgentError::Platform(format!("{program} is not a tracepoint: {e}")))?;
            tp.load()
                .map_err(|e| AgentError::Platform(format!("loading {program}: {e}")))?;
            tp.attach(TRACEPOINT_CATEGORY, tracepoint)
                .map_err(|e| AgentError::Platform(format!("attaching {program}: {e}")))?;
        }

        let events_map = ebpf
            .take_map(MAP_EVENTS)
            .ok_or_else(|| AgentError::not_found(format!("BPF map {MAP_EVENTS}")))?;
        let ring = RingBuf::try_from(events_map)
            .map_err(|e| AgentError::Platform(format!("{MAP_EVENTS} is not a ring buffer: {e}")))?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let stop = CancellationToken::new();
        let state = Arc::clone(&self.state);
        let stop_signal = stop.clone();
        let guards = BpfRuntimeGuards {
            _ebpf: ebpf,
            _logger: logger,
        };

        // The ring buffer read is a native blocking interface; pump it off
        // the async runtime like the other kernel readers.
        tokio::task::spawn_blocking(move || {
            pump(guards, ring, tx, state, cancel, stop_signal);
        });

        self.stop = Some(stop);
        self.state.set_status(CollectorStatus::Active);
        Ok(rx)
    }
}

/// Keeps the loaded object (and with it the attached tracepoint links) and
/// the BPF-side logger alive for as long as the pump runs.
struct BpfRuntimeGuards {
    _ebpf: aya::Ebpf,
    _logger: Option<EbpfLogger>,
}

fn pump(
    guards: BpfRuntimeGuards,
    mut ring: RingBuf<aya::maps::MapData>,
    tx: mpsc::Sender<MetricPayload>,
    state: Arc<ContinuousState>,
    cancel: CancellationToken,
    stop: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() || stop.is_cancelled() {
            break;
        }
        match ring.next() {
            Some(item) => {
                match parse_event(&item, Utc::now()) {
                    Ok(event) => match tx.try_send(MetricPayload::Process(event)) {
                        Ok(()) => {}
                        // Freshness over completeness: a full channel sheds
                        // the event instead of stalling the ring buffer.
                        Err(TrySendError::Full(_)) => {
                            debug!("exec: event channel full, dropping event");
                        }
                        Err(TrySendError::Closed(_)) => break,
                    },
                    Err(err) => debug!("exec: skipping malformed event: {err}"),
                }
            }
            None => thread::sleep(Duration::from_millis(1)),
        }
    }
    state.set_status(CollectorStatus::Disabled);
    drop(guards);
}

/// Decode one ring-buffer record: fixed little-endian header, then
/// `args_size` bytes of NUL-separated argv.
///
/// The kernel truncates its comm field to 16 bytes, but argv[0] usually
/// carries the full path. When argv[0] contains a `/` its basename wins;
/// otherwise the kernel comm stands, since a bare argv[0] is typically the
/// same truncated name.
pub fn parse_event(bytes: &[u8], timestamp: DateTime<Utc>) -> Result<ExecEvent> {
    if bytes.len() < EXEC_EVENT_HEADER_SIZE {
        return Err(AgentError::parse(format!(
            "exec event of {} bytes is smaller than the {EXEC_EVENT_HEADER_SIZE}-byte header",
            bytes.len()
        )));
    }
    let header: ExecEventHeader =
        bytemuck::pod_read_unaligned(&bytes[..EXEC_EVENT_HEADER_SIZE]);

    let args_size = header.args_size as usize;
    let tail = &bytes[EXEC_EVENT_HEADER_SIZE..];
    if args_size > tail.len() {
        return Err(AgentError::parse(format!(
            "exec event args_size {args_size} exceeds available {} bytes",
            tail.len()
        )));
    }

    let args: Vec<String> = tail[..args_size]
        .split(|&b| b == 0)
        .filter(|chunk| !chunk.is_empty())
        .take(header.args_count as usize)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect();

    let command = match args.first() {
        Some(argv0) if argv0.contains('/') => argv0
            .rsplit('/')
            .next()
            .unwrap_or(argv0.as_str())
            .to_string(),
        _ => header.comm_str().to_string(),
    };

    Ok(ExecEvent {
        pid: header.pid,
        ppid: header.ppid,
        uid: header.uid,
        retval: header.retval,
        command,
        args,
        timestamp,
    })
}

/// Resolve and read the compiled object: explicit path, then the
/// `ANTIMETAL_BPF_PATH` environment variable, then the install locations.
fn read_bpf_bytes(explicit: Option<&Path>) -> Result<(Vec<u8>, String)> {
    if let Some(path) = explicit {
        let data = fs::read(path).map_err(|e| AgentError::from_open(path, &e))?;
        return Ok((data, path.display().to_string()));
    }
    if let Ok(path) = std::env::var(ENV_BPF_PATH) {
        let path = PathBuf::from(path);
        let data = fs::read(&path).map_err(|e| AgentError::from_open(&path, &e))?;
        return Ok((data, path.display().to_string()));
    }
    for candidate in BPF_OBJECT_CANDIDATES {
        if Path::new(candidate).exists() {
            let data = fs::read(candidate)
                .map_err(|e| AgentError::from_open(Path::new(candidate), &e))?;
            return Ok((data, candidate.to_string()));
        }
    }
    Err(AgentError::not_found(format!(
        "BPF object (set {ENV_BPF_PATH} or install to {})",
        BPF_OBJECT_CANDIDATES[0]
    )))
}

fn has_bpf_capability() -> bool {
    let effective =
        |cap| caps::has_cap(None, CapSet::Effective, cap).unwrap_or(false);
    effective(Capability::CAP_BPF) || effective(Capability::CAP_SYS_ADMIN)
}

fn bump_memlock_rlimit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        warn!("exec: failed to remove memlock rlimit, BPF loading may fail");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use antimetal_ebpf_common::TASK_COMM_LEN;

    fn encode(header: &ExecEventHeader, args: &[&str]) -> Vec<u8> {
        let mut bytes = bytemuck::bytes_of(header).to_vec();
        for arg in args {
            bytes.extend_from_slice(arg.as_bytes());
            bytes.push(0);
        }
        bytes
    }

    fn header(pid: u32, comm: &str, args_count: u32, args_size: u32) -> ExecEventHeader {
        let mut comm_bytes = [0u8; TASK_COMM_LEN];
        comm_bytes[..comm.len()].copy_from_slice(comm.as_bytes());
        ExecEventHeader {
            pid,
            ppid: 1,
            uid: 1000,
            retval: 0,
            args_count,
            args_size,
            comm: comm_bytes,
        }
    }

    #[test]
    fn basename_of_argv0_beats_truncated_comm() {
        let args = ["/usr/bin/very-long-command-name", "--flag"];
        let args_size: u32 = args.iter().map(|a| a.len() as u32 + 1).sum();
        let header = header(9999, "very-long-cmd-na", 2, args_size);
        let event = encode(&header, &args);

        let parsed = parse_event(&event, Utc::now()).unwrap();
        assert_eq!(parsed.pid, 9999);
        assert_eq!(parsed.command, "very-long-command-name");
        assert_eq!(parsed.args.len(), 2);
        assert_eq!(parsed.args[0], "/usr/bin/very-long-command-name");
    }

    #[test]
    fn bare_argv0_keeps_kernel_comm() {
        let args = ["bash", "-c", "true"];
        let args_size: u32 = args.iter().map(|a| a.len() as u32 + 1).sum();
        let header = header(42, "bash", 3, args_size);
        let parsed = parse_event(&encode(&header, &args), Utc::now()).unwrap();
        assert_eq!(parsed.command, "bash");
        assert_eq!(parsed.args, vec!["bash", "-c", "true"]);
    }

    #[test]
    fn empty_argv_falls_back_to_comm() {
        let header = header(7, "kworker", 0, 0);
        let parsed = parse_event(&encode(&header, &[]), Utc::now()).unwrap();
        assert_eq!(parsed.command, "kworker");
        assert!(parsed.args.is_empty());
    }

    #[test]
    fn args_count_bounds_the_array() {
        let args = ["a", "b", "c", "d"];
        let args_size: u32 = args.iter().map(|a| a.len() as u32 + 1).sum();
        // Kernel claims only two captured args; the rest of the blob is
        // ignored.
        let header = header(1, "sh", 2, args_size);
        let parsed = parse_event(&encode(&header, &args), Utc::now()).unwrap();
        assert_eq!(parsed.args, vec!["a", "b"]);
        assert!(header.args_count as usize >= parsed.args.len());
    }

    #[test]
    fn emitted_args_contain_no_nul_bytes() {
        let args = ["/bin/cat", "file with spaces"];
        let args_size: u32 = args.iter().map(|a| a.len() as u32 + 1).sum();
        let header = header(1, "cat", 2, args_size);
        let parsed = parse_event(&encode(&header, &args), Utc::now()).unwrap();
        for arg in &parsed.args {
            assert!(!arg.as_bytes().contains(&0));
        }
    }

    #[test]
    fn short_records_are_rejected() {
        assert!(matches!(
            parse_event(&[0u8; 10], Utc::now()),
            Err(AgentError::Parse(_))
        ));
    }

    #[test]
    fn args_size_beyond_the_tail_is_rejected() {
        // Header claims 100 bytes of argv but the record carries none.
        let header = header(1, "sh", 1, 100);
        let bytes = bytemuck::bytes_of(&header).to_vec();
        assert!(matches!(
            parse_event(&bytes, Utc::now()),
            Err(AgentError::Parse(_))
        ));
    }

    #[test]
    fn explicit_object_path_is_read() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"\x7fELF").unwrap();
        let (bytes, path) = read_bpf_bytes(Some(file.path())).unwrap();
        assert_eq!(bytes, b"\x7fELF");
        assert_eq!(path, file.path().display().to_string());
    }

    #[test]
    fn missing_explicit_object_is_not_found() {
        assert!(matches!(
            read_bpf_bytes(Some(Path::new("/nonexistent/object.o"))),
            Err(AgentError::NotFound(_))
        ));
    }

    #[test]
    fn tracer_advertises_its_requirements() {
        let mut config = CollectionConfig::default();
        config.apply_defaults();
        let tracer = ExecTracer::new(&config, None);
        let caps = tracer.capabilities();
        assert!(caps.requires_root);
        assert!(caps.requires_ebpf);
        assert!(!caps.supports_one_shot);
        assert_eq!(caps.min_kernel_version, Some("4.18"));
        assert_eq!(tracer.status(), CollectorStatus::Disabled);
    }

    #[tokio::test]
    async fn stop_of_disabled_tracer_is_a_noop() {
        let mut config = CollectionConfig::default();
        config.apply_defaults();
        let mut tracer = ExecTracer::new(&config, None);
        assert!(tracer.stop().is_ok());
        assert_eq!(tracer.status(), CollectorStatus::Disabled);
    }
}
