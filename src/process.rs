use crate::candidate::JsonCandidate;
use crate::error::Error;
use crate::worker::Evaluator;
use async_process::{Child, Command};
use async_trait::async_trait;
use futures::pin_mut;
use futures::FutureExt;
use futures_timer::Delay;
use log::trace;
use serde::Deserialize;
use std::process::Stdio;
use std::{ffi::OsString, time::Duration};

/// Evaluation by child process: the candidate's genome is passed as a JSON
/// argument and the fitness is read back from the program's stdout.
pub struct EvalProcessDef {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub kill_after: Option<Duration>,
}

impl EvalProcessDef {
    pub fn new(program: OsString, args: Vec<OsString>, kill_after: Option<Duration>) -> Self {
        Self {
            program,
            args,
            kill_after,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EvalProcessResult {
    fitness: f64,
}

async fn child_fitness(child: Child) -> Result<f64, Error> {
    let output = child.output().await?;
    if output.status.success() {
        match serde_json::from_slice::<EvalProcessResult>(&output.stdout) {
            Ok(result) => Ok(result.fitness),
            Err(_) => Err(Error::EvalProcInvalidOutput(output)),
        }
    } else {
        trace!(
            "child terminated unsuccessfully, status: {:?}",
            output.status
        );
        Err(Error::EvalProcFailed(output))
    }
}

#[async_trait]
impl Evaluator<JsonCandidate> for EvalProcessDef {
    async fn evaluate(&self, candidate: &mut JsonCandidate, _slot: usize) -> Result<(), Error> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .arg(serde_json::to_string(&candidate.genome)?)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(Error::UnableToLaunchEvalProcess)?;

        trace!("spawned evaluation process, pid: {:?}", child.id());

        let fitness = match self.kill_after {
            None => child_fitness(child).await?,
            Some(kill_after) => {
                let timed_out = {
                    let timeout_fut = Delay::new(kill_after).fuse();
                    let status_fut = child.status().fuse();
                    pin_mut!(timeout_fut, status_fut);
                    futures::select! {
                        () = timeout_fut => true,
                        _ = status_fut => false,
                    }
                };

                if timed_out {
                    trace!("timeout on child with PID {:?}, killing", child.id());
                    child.kill().ok();
                    child.status().await?;
                    return Err(Error::EvalTimedOut);
                }
                child_fitness(child).await?
            }
        };

        candidate.fitness = fitness;
        Ok(())
    }

    async fn evaluate_group(
        &self,
        _candidates: &mut [JsonCandidate],
        _slots: &[usize],
        _count_victories_only: bool,
    ) -> Result<(), Error> {
        // One child per candidate cannot express an interacting group.
        Err(Error::GroupedNotSupported)
    }
}
