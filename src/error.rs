use std::io;
use std::process::Output;
use thiserror;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("invalid candidate payload")]
    InvalidCandidate(#[from] serde_json::Error),
    #[error("handshake name is not valid UTF-8")]
    MalformedName(#[from] std::string::FromUtf8Error),
    #[error("unknown job kind tag: {0}")]
    UnknownJobKind(u8),
    #[error("unknown result kind tag: {0}")]
    UnknownResultKind(u8),
    #[error("slot index {slot} out of range, {num_slots} slots configured")]
    SlotOutOfRange { slot: usize, num_slots: usize },
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },
    #[error("item count {count} exceeds limit of {max}")]
    TooManyItems { count: usize, max: usize },
    #[error("received a result frame but no job is outstanding")]
    UnexpectedResult,
    #[error("transport compression requested but not compiled in")]
    CompressionUnavailable,
    #[error("monitor shut down")]
    MonitorShutDown,
    #[error("master address {0:?} did not resolve")]
    AddressUnresolved(String),
    #[error("max jobs per worker must be strictly positive")]
    ZeroMaxJobsPerWorker,
    #[error("number of evaluation threads must be strictly positive")]
    ZeroEvalThreads,
    #[error("worker name must not be empty")]
    EmptyWorkerName,
    #[error("unable to launch evaluation child process: {}", .0)]
    UnableToLaunchEvalProcess(io::Error),
    #[error("unsuccessful termination of evaluation child process.{}",
            .0.status.code().map(|code| format!(" Status code: {}", code))
            .unwrap_or_else(|| "".to_string()))]
    EvalProcFailed(Output),
    #[error("invalid output from evaluation child process")]
    EvalProcInvalidOutput(Output),
    #[error("evaluation child process timed out")]
    EvalTimedOut,
    #[error("grouped jobs not supported by process-backed evaluation")]
    GroupedNotSupported,
    #[error("evaluation failed: {0}")]
    EvalFailed(String),
}
